//! Moves imports of PE images into dynamic import side-tables, and back.
//!
//! A patch takes a [`DynamicImportModel`] (a JSON manifest naming one imported module and the
//! symbols to resolve in it), removes that module from the import directory so that the loader
//! no longer binds it, and records the module and its symbols in a family of read-only sections.
//! A loader inside the process can then find the module's symbols by offset or by byte signature.
//!
//! The sections are:
//!
//! * `.idnew`: the import directory without the dynamically linked modules, preceded by the
//!   location of the original import directory.
//! * `.didata`: the import directory entries of the dynamically linked modules.
//! * `.dlnkdt`, `.symidx`, `.symsdt`, `.symsnt`, `.symsdn`, `.sympst`: the side-tables, see
//!   [`side_tables`].
//!
//! [`patch::restore`] removes all of them and puts the import directory back.

#![forbid(unsafe_code)]
#![forbid(unused_must_use)]

pub mod encoder;
pub mod error;
pub mod exports;
pub mod import_dir;
pub mod manifest;
pub mod parser;
pub mod patch;
pub mod records;
pub mod sections;
pub mod side_tables;
pub mod symbols;
pub mod tables;
pub mod toolchain;
pub mod version;

pub use dynlink_coff as coff;

pub use error::PatchError;
pub use manifest::{DynamicImportModel, DynamicSymbol};
pub use patch::{
    Inspection, PatchOptions, PatchReport, PatchState, RestoreReport, inspect, patch, restore,
};
pub use symbols::{Pointer, ResolvedDynamicLinkDescriptor, ResolvedDynamicSymbolDescriptor};
pub use toolchain::{BuiltinDemangler, Demangler, Toolchain, ToolchainConfig};
pub use version::{Architecture, Version, VersionSpec};
