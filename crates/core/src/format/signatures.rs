//! Static signature, MIME and extension tables.

use super::types::FormatId;

/// Number of leading bytes inspected by content probes.
pub const HEADER_LEN: usize = 8192;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";
const OLE2_MAGIC: &[u8] = &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// Leading-byte signatures checked in order.
const PREFIX_SIGNATURES: &[(&[u8], &str)] = &[
    (b"%PDF-", "pdf"),
    (b"\x89PNG\r\n\x1a\n", "png"),
    (&[0xFF, 0xD8, 0xFF], "jpg"),
    (b"GIF87a", "gif"),
    (b"GIF89a", "gif"),
    (b"II*\x00", "tiff"),
    (b"MM\x00*", "tiff"),
    (b"%!PS", "ps"),
    (b"{\\rtf", "rtf"),
    (&[0x1F, 0x8B], "gz"),
    (OLE2_MAGIC, "doc"),
];

/// Static extension table used as the last detection resort.
const EXTENSIONS: &[(&str, &str)] = &[
    ("pdf", "pdf"),
    ("epub", "epub"),
    ("mobi", "mobi"),
    ("azw3", "azw3"),
    ("fb2", "fb2"),
    ("docx", "docx"),
    ("doc", "doc"),
    ("odt", "odt"),
    ("rtf", "rtf"),
    ("txt", "txt"),
    ("text", "txt"),
    ("md", "markdown"),
    ("markdown", "markdown"),
    ("rst", "rst"),
    ("org", "org"),
    ("tex", "tex"),
    ("html", "html"),
    ("htm", "html"),
    ("xhtml", "html"),
    ("xml", "xml"),
    ("json", "json"),
    ("csv", "csv"),
    ("yaml", "yaml"),
    ("yml", "yaml"),
    ("xlsx", "xlsx"),
    ("ods", "ods"),
    ("pptx", "pptx"),
    ("odp", "odp"),
    ("svg", "svg"),
    ("png", "png"),
    ("jpg", "jpg"),
    ("jpeg", "jpg"),
    ("gif", "gif"),
    ("bmp", "bmp"),
    ("tif", "tiff"),
    ("tiff", "tiff"),
    ("webp", "webp"),
    ("djvu", "djvu"),
    ("djv", "djvu"),
    ("ps", "ps"),
];

/// MIME types that identify a format on their own.
const MIME_TYPES: &[(&str, &str)] = &[
    ("application/pdf", "pdf"),
    ("application/epub+zip", "epub"),
    ("application/x-mobipocket-ebook", "mobi"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
        "xlsx",
    ),
    (
        "application/vnd.openxmlformats-officedocument.presentationml.presentation",
        "pptx",
    ),
    ("application/msword", "doc"),
    ("application/vnd.oasis.opendocument.text", "odt"),
    ("application/vnd.oasis.opendocument.spreadsheet", "ods"),
    ("application/vnd.oasis.opendocument.presentation", "odp"),
    ("application/rtf", "rtf"),
    ("text/rtf", "rtf"),
    ("text/html", "html"),
    ("text/markdown", "markdown"),
    ("text/x-markdown", "markdown"),
    ("text/csv", "csv"),
    ("application/json", "json"),
    ("text/xml", "xml"),
    ("application/xml", "xml"),
    ("text/x-tex", "tex"),
    ("image/svg+xml", "svg"),
    ("image/png", "png"),
    ("image/jpeg", "jpg"),
    ("image/gif", "gif"),
    ("image/bmp", "bmp"),
    ("image/tiff", "tiff"),
    ("image/webp", "webp"),
    ("image/vnd.djvu", "djvu"),
    ("image/x-djvu", "djvu"),
    ("application/postscript", "ps"),
];

fn contains(haystack: &[u8], needle: &[u8]) -> bool {
    haystack.windows(needle.len()).any(|w| w == needle)
}

fn slice_eq(header: &[u8], offset: usize, expected: &[u8]) -> bool {
    header
        .get(offset..offset + expected.len())
        .is_some_and(|s| s == expected)
}

/// Identifies ZIP-based containers from the local file headers in `header`.
fn refine_zip(header: &[u8]) -> &'static str {
    // The first entry of EPUB and ODF packages is an uncompressed `mimetype` file.
    if slice_eq(header, 30, b"mimetypeapplication/epub+zip") {
        return "epub";
    }
    if slice_eq(header, 30, b"mimetypeapplication/vnd.oasis.opendocument.text") {
        return "odt";
    }
    if slice_eq(header, 30, b"mimetypeapplication/vnd.oasis.opendocument.spreadsheet") {
        return "ods";
    }
    if slice_eq(header, 30, b"mimetypeapplication/vnd.oasis.opendocument.presentation") {
        return "odp";
    }
    if contains(header, b"word/") {
        return "docx";
    }
    if contains(header, b"xl/") {
        return "xlsx";
    }
    if contains(header, b"ppt/") {
        return "pptx";
    }
    "zip"
}

/// Content-signature probe over the leading bytes of a file.
pub fn sniff_magic(header: &[u8]) -> Option<FormatId> {
    if header.starts_with(ZIP_MAGIC) {
        return Some(FormatId::new(refine_zip(header)));
    }
    if header.starts_with(b"AT&TFORM")
        && (slice_eq(header, 12, b"DJVU") || slice_eq(header, 12, b"DJVM"))
    {
        return Some(FormatId::new("djvu"));
    }
    if header.starts_with(b"RIFF") && slice_eq(header, 8, b"WEBP") {
        return Some(FormatId::new("webp"));
    }
    // BMP: "BM" followed by the file size and two zeroed reserved words.
    if header.starts_with(b"BM") && slice_eq(header, 6, &[0, 0, 0, 0]) && header.len() >= 26 {
        return Some(FormatId::new("bmp"));
    }
    if slice_eq(header, 60, b"BOOKMOBI") {
        return Some(FormatId::new("mobi"));
    }
    PREFIX_SIGNATURES
        .iter()
        .find(|(magic, _)| header.starts_with(magic))
        .map(|(_, tag)| FormatId::new(tag))
}

/// Maps a MIME type to a format. Generic types return `None`.
pub fn format_for_mime(mime: &str) -> Option<FormatId> {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    MIME_TYPES
        .iter()
        .find(|(m, _)| *m == essence)
        .map(|(_, tag)| FormatId::new(tag))
}

/// Looks a filename extension up in the static table.
pub fn format_for_extension(ext: &str) -> Option<FormatId> {
    let ext = ext.to_ascii_lowercase();
    EXTENSIONS
        .iter()
        .find(|(e, _)| *e == ext)
        .map(|(_, tag)| FormatId::new(tag))
}

/// Signatures a produced artifact must start with, per format.
const ARTIFACT_SIGNATURES: &[(&str, &[&[u8]])] = &[
    ("pdf", &[b"%PDF"]),
    ("docx", &[ZIP_MAGIC]),
    ("xlsx", &[ZIP_MAGIC]),
    ("pptx", &[ZIP_MAGIC]),
    ("epub", &[ZIP_MAGIC]),
    ("odt", &[ZIP_MAGIC]),
    ("ods", &[ZIP_MAGIC]),
    ("odp", &[ZIP_MAGIC]),
    ("zip", &[ZIP_MAGIC]),
    ("png", &[b"\x89PNG"]),
    ("jpg", &[&[0xFF, 0xD8, 0xFF]]),
    ("gif", &[b"GIF8"]),
    ("tiff", &[b"II*\x00", b"MM\x00*"]),
    ("djvu", &[b"AT&TFORM"]),
    ("rtf", &[b"{\\rtf"]),
    ("ps", &[b"%!"]),
    ("doc", &[OLE2_MAGIC]),
];

/// Structural check of a freshly produced artifact.
///
/// Formats with a well-known signature must start with it; every artifact
/// must be non-empty.
pub fn artifact_looks_valid(format: &FormatId, header: &[u8]) -> Result<(), String> {
    if header.is_empty() {
        return Err("artifact is empty".to_string());
    }
    let expected = ARTIFACT_SIGNATURES
        .iter()
        .find(|(tag, _)| *tag == format.as_str())
        .map(|(_, prefixes)| *prefixes);
    if let Some(prefixes) = expected {
        if !prefixes.iter().any(|p| header.starts_with(p)) {
            return Err(format!("artifact does not carry a {} signature", format));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn zip_with_first_entry(name_and_content: &[u8]) -> Vec<u8> {
        let mut bytes = ZIP_MAGIC.to_vec();
        bytes.resize(30, 0);
        bytes.extend_from_slice(name_and_content);
        bytes
    }

    #[test]
    fn test_sniff_prefix_signatures() {
        assert_eq!(sniff_magic(b"%PDF-1.7\n").unwrap().as_str(), "pdf");
        assert_eq!(sniff_magic(b"\x89PNG\r\n\x1a\n....").unwrap().as_str(), "png");
        assert_eq!(sniff_magic(b"{\\rtf1\\ansi").unwrap().as_str(), "rtf");
        assert_eq!(sniff_magic(OLE2_MAGIC).unwrap().as_str(), "doc");
        assert!(sniff_magic(b"# Title\ntext").is_none());
    }

    #[test]
    fn test_sniff_djvu_and_webp() {
        assert_eq!(
            sniff_magic(b"AT&TFORM\x00\x00\x10\x00DJVUINFO").unwrap().as_str(),
            "djvu"
        );
        assert_eq!(sniff_magic(b"RIFF\x10\x00\x00\x00WEBPVP8 ").unwrap().as_str(), "webp");
    }

    #[test]
    fn test_sniff_zip_containers() {
        let epub = zip_with_first_entry(b"mimetypeapplication/epub+zip");
        assert_eq!(sniff_magic(&epub).unwrap().as_str(), "epub");

        let odt = zip_with_first_entry(b"mimetypeapplication/vnd.oasis.opendocument.text");
        assert_eq!(sniff_magic(&odt).unwrap().as_str(), "odt");

        let docx = zip_with_first_entry(b"[Content_Types].xml....word/document.xml");
        assert_eq!(sniff_magic(&docx).unwrap().as_str(), "docx");

        let plain = zip_with_first_entry(b"readme.txt");
        assert_eq!(sniff_magic(&plain).unwrap().as_str(), "zip");
    }

    #[test]
    fn test_mobi_offset() {
        let mut bytes = vec![0u8; 60];
        bytes.extend_from_slice(b"BOOKMOBI");
        assert_eq!(sniff_magic(&bytes).unwrap().as_str(), "mobi");
    }

    #[test]
    fn test_mime_lookup() {
        assert_eq!(format_for_mime("application/pdf").unwrap().as_str(), "pdf");
        assert_eq!(
            format_for_mime("text/html; charset=utf-8").unwrap().as_str(),
            "html"
        );
        assert!(format_for_mime("text/plain").is_none());
        assert!(format_for_mime("application/octet-stream").is_none());
    }

    #[test]
    fn test_extension_lookup() {
        assert_eq!(format_for_extension("MD").unwrap().as_str(), "markdown");
        assert_eq!(format_for_extension("tif").unwrap().as_str(), "tiff");
        assert!(format_for_extension("xyz").is_none());
    }

    #[test]
    fn test_artifact_validation() {
        let pdf = FormatId::new("pdf");
        assert!(artifact_looks_valid(&pdf, b"%PDF-1.4").is_ok());
        assert!(artifact_looks_valid(&pdf, b"<html>").is_err());
        assert!(artifact_looks_valid(&pdf, b"").is_err());

        let txt = FormatId::new("txt");
        assert!(artifact_looks_valid(&txt, b"anything").is_ok());
        assert!(artifact_looks_valid(&txt, b"").is_err());

        let docx = FormatId::new("docx");
        assert!(artifact_looks_valid(&docx, b"PK\x03\x04rest").is_ok());
    }
}
