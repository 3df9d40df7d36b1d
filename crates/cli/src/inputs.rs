//! Expansion of command-line inputs into individual files.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use metamorph_core::{ConversionRequest, FormatId};

/// A file to convert, with its directory relative to the root it was found
/// under (empty for files named directly).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputFile {
    pub path: PathBuf,
    pub relative_dir: PathBuf,
    /// Found by walking a directory rather than named on the command line.
    pub walked: bool,
}

impl InputFile {
    fn direct(path: PathBuf) -> Self {
        Self {
            path,
            relative_dir: PathBuf::new(),
            walked: false,
        }
    }

    /// Where the output goes when an output directory was given; the
    /// directory layout below a walked root is mirrored.
    pub fn output_dir(&self, base: &Path) -> PathBuf {
        base.join(&self.relative_dir)
    }
}

fn is_hidden(entry: &DirEntry) -> bool {
    entry.depth() > 0
        && entry
            .file_name()
            .to_str()
            .map(|name| name.starts_with('.'))
            .unwrap_or(false)
}

/// Expands `inputs` in order. Directories are walked only when `recursive`
/// is set, skipping hidden entries; otherwise they are passed through and
/// fail validation like any other non-file.
pub fn expand_inputs(inputs: &[PathBuf], recursive: bool) -> Vec<InputFile> {
    let mut files = Vec::new();
    for input in inputs {
        if !(recursive && input.is_dir()) {
            files.push(InputFile::direct(input.clone()));
            continue;
        }

        let walker = WalkDir::new(input)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !is_hidden(e));
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!("Skipping unreadable entry under {}: {}", input.display(), e);
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            let relative_dir = entry
                .path()
                .parent()
                .and_then(|parent| parent.strip_prefix(input).ok())
                .map(Path::to_path_buf)
                .unwrap_or_default();
            files.push(InputFile {
                path: entry.into_path(),
                relative_dir,
                walked: true,
            });
        }
    }
    debug!("{} inputs expanded to {} files", inputs.len(), files.len());
    files
}

/// Drops walked files that would convert onto themselves, which is what
/// outputs of an earlier run look like. Files named directly are kept.
pub fn skip_own_outputs(
    files: Vec<InputFile>,
    target: &FormatId,
    output_base: Option<&Path>,
) -> Vec<InputFile> {
    files
        .into_iter()
        .filter(|file| {
            if !file.walked {
                return true;
            }
            let mut request = ConversionRequest::new(&file.path, target.clone());
            if let Some(base) = output_base {
                request = request.with_output_dir(file.output_dir(base));
            }
            let own = request.resolved_output_path() == file.path;
            if own {
                debug!("Skipping {}: already a {} file", file.path.display(), target);
            }
            !own
        })
        .collect()
}
