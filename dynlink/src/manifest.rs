//! The JSON manifest that lists the symbols of a dynamically linked module.
//!
//! ```json
//! {
//!     "target": "foo.dll",
//!     "default_version": "1.0.*",
//!     "symbols": [
//!         { "architecture": "x64", "symbol": "?Bar@@YAXXZ", "pointer": "0x1a2b" },
//!         { "version": "ignore", "symbol": "Baz", "pointer": "48 8B ? 89" }
//!     ]
//! }
//! ```
//!
//! The manifest is validated completely when it is loaded. Nothing that reads a
//! [`DynamicImportModel`] needs to check it again.


use crate::error::PatchError;
use crate::symbols::Pointer;
use crate::version::{Architecture, Version, VersionSpec};
use anyhow::Context;
use serde::Deserialize;
use std::path::Path;
use tracing::{debug, trace};

fn default_version() -> String {
    "*".to_string()
}

fn default_architecture() -> String {
    "x64".to_string()
}

#[derive(Deserialize)]
struct RawModel {
    target: String,
    #[serde(default = "default_version")]
    default_version: String,
    symbols: Vec<RawSymbol>,
}

#[derive(Deserialize)]
struct RawSymbol {
    #[serde(default)]
    version: String,
    #[serde(default = "default_architecture")]
    architecture: String,
    symbol: String,
    pointer: String,
}

/// A validated manifest.
#[derive(Clone, Debug)]
pub struct DynamicImportModel {
    /// The name of the imported module, as it appears in the import directory.
    pub target: String,
    pub default_version: VersionSpec,
    pub symbols: Vec<DynamicSymbol>,
}

/// One symbol of the manifest.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct DynamicSymbol {
    pub version: VersionSpec,
    pub architecture: Architecture,
    pub symbol: String,
    pub pointer: Pointer,
}

impl DynamicImportModel {
    /// Parses and validates a manifest.
    pub fn parse(json: &str) -> anyhow::Result<Self> {
        let raw: RawModel =
            serde_json::from_str(json).context("The manifest is not valid JSON for this format")?;
        Ok(Self::validate(raw)?)
    }

    /// Reads, parses and validates the manifest at `path`.
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let model =
            Self::parse(&json).with_context(|| format!("Invalid manifest {}", path.display()))?;
        debug!(
            module = %model.target,
            symbols = model.symbols.len(),
            "loaded manifest"
        );
        Ok(model)
    }

    fn validate(raw: RawModel) -> Result<Self, PatchError> {
        if raw.target.trim().is_empty() {
            return Err(PatchError::InvalidManifest {
                index: 0,
                symbol: String::new(),
                reason: "the target module name is empty".to_string(),
            });
        }
        if raw.target.contains('\0') {
            return Err(PatchError::InvalidManifest {
                index: 0,
                symbol: String::new(),
                reason: "the target module name contains a NUL character".to_string(),
            });
        }

        let default_version: VersionSpec = raw.default_version.parse()?;

        let mut symbols = Vec::with_capacity(raw.symbols.len());
        for (index, s) in raw.symbols.into_iter().enumerate() {
            let invalid = |reason: String| PatchError::InvalidManifest {
                index,
                symbol: s.symbol.clone(),
                reason,
            };

            if s.symbol.is_empty() {
                return Err(invalid("the symbol name is empty".to_string()));
            }
            // Names are stored NUL-terminated.
            if s.symbol.contains('\0') {
                return Err(invalid("the symbol name contains a NUL character".to_string()));
            }

            let version = if s.version.trim().is_empty() {
                default_version
            } else {
                s.version
                    .parse::<VersionSpec>()
                    .map_err(|e| invalid(e.to_string()))?
            };

            let architecture = s
                .architecture
                .parse::<Architecture>()
                .map_err(|e| invalid(e.to_string()))?;

            let Some(pointer) = Pointer::classify(&s.pointer) else {
                return Err(PatchError::InvalidPointer {
                    symbol: s.symbol,
                    pointer: s.pointer,
                });
            };

            symbols.push(DynamicSymbol {
                version,
                architecture,
                symbol: s.symbol,
                pointer,
            });
        }

        Ok(Self {
            target: raw.target,
            default_version,
            symbols,
        })
    }

    /// The symbols that apply to an image of architecture `arch` at version `version`, in
    /// manifest order.
    pub fn select<'a>(
        &'a self,
        arch: Architecture,
        version: &'a Version,
    ) -> impl Iterator<Item = &'a DynamicSymbol> + 'a {
        self.symbols.iter().filter(move |s| {
            let selected = s.architecture == arch && s.version.selects(version);
            if !selected {
                trace!(symbol = %s.symbol, "symbol does not apply to this target");
            }
            selected
        })
    }
}
