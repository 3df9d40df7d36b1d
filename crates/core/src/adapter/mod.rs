//! Tool adapters: the narrow interface between the engine and external
//! converters.
//!
//! The engine only sees [`ToolAdapter`]. [`CommandAdapter`] implements it for
//! any command-line program described by a [`CommandSpec`], and
//! [`builtin_specs`] lists the converters known out of the box.

mod builtin;
mod command;
mod error;
mod traits;
mod types;

pub use builtin::{build_catalog, builtin_specs};
pub use command::{CommandAdapter, CommandSpec, OutputMode};
pub use error::AdapterError;
pub use traits::ToolAdapter;
pub use types::{ConversionOptions, ExitStatus, Invocation};
