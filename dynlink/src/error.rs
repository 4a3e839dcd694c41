//! Errors that stop a patch, restore, or library generation.
//!
//! Operations return `anyhow::Result`; the failures that callers may want to tell apart are
//! raised as [`PatchError`] and can be recovered with `downcast_ref`.

use std::fmt::Display;
use std::path::PathBuf;

#[derive(Clone, Debug)]
pub enum PatchError {
    /// The image has no import directory, so there is nothing to split.
    MissingImportDirectory,
    /// A manifest pointer is neither a hex offset nor a byte signature.
    InvalidPointer { symbol: String, pointer: String },
    InvalidVersion(String),
    InvalidArchitecture(String),
    /// A manifest entry failed validation.
    InvalidManifest { index: usize, symbol: String, reason: String },
    /// The image is of a kind that cannot be patched.
    UnsupportedImage(String),
    /// The Visual C++ tools could not be found.
    ToolchainNotFound(PathBuf),
    /// An external tool ran but failed.
    ToolFailed { tool: String, status: Option<i32> },
    /// A side-table section that is present could not be decoded.
    MalformedSideTable(&'static str),
}

impl std::error::Error for PatchError {}

impl Display for PatchError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            Self::MissingImportDirectory => {
                fmt.write_str("The PE image does not have an import directory.")
            }
            Self::InvalidPointer { symbol, pointer } => write!(
                fmt,
                "The pointer {pointer:?} of symbol {symbol} is neither an offset (0x...) nor a byte signature."
            ),
            Self::InvalidVersion(s) => write!(fmt, "Invalid version: {s:?}"),
            Self::InvalidArchitecture(s) => write!(fmt, "Invalid architecture: {s:?}"),
            Self::InvalidManifest {
                index,
                symbol,
                reason,
            } => write!(fmt, "Invalid manifest symbol #{index} ({symbol}): {reason}"),
            Self::UnsupportedImage(reason) => write!(fmt, "Unsupported PE image: {reason}"),
            Self::ToolchainNotFound(path) => write!(
                fmt,
                "The Visual C++ tools were not found (looked in {}).",
                path.display()
            ),
            Self::ToolFailed { tool, status } => match status {
                Some(code) => write!(fmt, "{tool} failed with exit code {code}."),
                None => write!(fmt, "{tool} was terminated."),
            },
            Self::MalformedSideTable(section) => {
                write!(fmt, "The side-table section {section} is malformed.")
            }
        }
    }
}
