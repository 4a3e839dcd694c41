//! Names of the sections that a patch adds to an image.

/// The import directory without the dynamically linked modules, preceded by a
/// [`NormalImportsHeader`](crate::records::NormalImportsHeader).
pub const NORMAL_IMPORTS: &str = ".idnew";
/// The import directory entries of the dynamically linked modules.
pub const DYNAMIC_IMPORTS: &str = ".didata";

pub const LINK_DESCRIPTORS: &str = ".dlnkdt";
pub const SYMBOL_INDEXER: &str = ".symidx";
pub const SYMBOL_DESCRIPTORS: &str = ".symsdt";
pub const SYMBOL_NAMES: &str = ".symsnt";
pub const SYMBOL_DEMANGLED_NAMES: &str = ".symsdn";
pub const SYMBOL_SIGNATURES: &str = ".sympst";

/// Loader code injected by other tools. It is never written here, but restore removes it.
pub const DYNAMIC_LOADER: &str = ".dlnkldr";

/// The six sections that together describe the dynamically linked symbols. They are only
/// decoded when all of them are present.
pub const SIDE_TABLES: [&str; 6] = [
    LINK_DESCRIPTORS,
    SYMBOL_INDEXER,
    SYMBOL_DESCRIPTORS,
    SYMBOL_NAMES,
    SYMBOL_DEMANGLED_NAMES,
    SYMBOL_SIGNATURES,
];

/// Every section that restore removes.
pub const ALL: [&str; 9] = [
    NORMAL_IMPORTS,
    DYNAMIC_IMPORTS,
    LINK_DESCRIPTORS,
    SYMBOL_INDEXER,
    SYMBOL_DESCRIPTORS,
    SYMBOL_NAMES,
    SYMBOL_DEMANGLED_NAMES,
    SYMBOL_SIGNATURES,
    DYNAMIC_LOADER,
];
