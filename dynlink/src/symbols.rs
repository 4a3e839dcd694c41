//! Symbol classification, merging, and demangling.


use crate::manifest::DynamicSymbol;
use crate::toolchain::Demangler;
use crate::version::Architecture;
use rayon::prelude::*;
use regex::Regex;
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::hash::Hash;
use std::sync::LazyLock;
use tracing::{debug, debug_span, trace, warn};

static OFFSET_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^0x[0-9a-fA-F]{1,16}$").unwrap());

static SIGNATURE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^([0-9A-Fa-f]{2}|\?)(\s([0-9A-Fa-f]{2}|\?))*$").unwrap());

/// How the runtime finds a symbol.
#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub enum Pointer {
    /// A fixed offset from the module base.
    Offset(u64),
    /// A byte pattern, with `?` for bytes that may have any value.
    Signature(String),
}

impl Pointer {
    /// Classifies a manifest pointer. Returns `None` if it is neither an offset nor a signature.
    pub fn classify(s: &str) -> Option<Self> {
        if OFFSET_REGEX.is_match(s) {
            // At most 16 hex digits, so this cannot overflow.
            u64::from_str_radix(&s[2..], 16).ok().map(Self::Offset)
        } else if SIGNATURE_REGEX.is_match(s) {
            Some(Self::Signature(s.to_string()))
        } else {
            None
        }
    }
}

/// A module whose symbols are resolved at runtime, as decoded from (or about to be written to)
/// the side-tables.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedDynamicLinkDescriptor {
    pub target_name: String,
    pub resolved_symbols: Vec<ResolvedDynamicSymbolDescriptor>,
}

/// One symbol of a [`ResolvedDynamicLinkDescriptor`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ResolvedDynamicSymbolDescriptor {
    pub name: String,
    /// Empty if the name could not be demangled.
    pub demangled_name: String,
    pub signature: Option<String>,
    /// Offset from the module base. A signature takes precedence over an address.
    pub address: Option<u64>,
}

impl ResolvedDynamicSymbolDescriptor {
    pub fn from_manifest(symbol: &DynamicSymbol) -> Self {
        let (signature, address) = match &symbol.pointer {
            Pointer::Offset(a) => (None, Some(*a)),
            Pointer::Signature(s) => (Some(s.clone()), None),
        };
        Self {
            name: symbol.symbol.clone(),
            demangled_name: String::new(),
            signature,
            address,
        }
    }
}

/// Removes items with duplicate keys. Each key keeps the position where it was first seen and
/// the value that was seen last.
pub fn dedup_last_wins<T, K, F>(items: Vec<T>, key: F) -> Vec<T>
where
    K: Eq + Hash,
    F: Fn(&T) -> K,
{
    let mut positions: HashMap<K, usize> = HashMap::with_capacity(items.len());
    let mut out: Vec<T> = Vec::with_capacity(items.len());
    for item in items {
        match positions.entry(key(&item)) {
            Entry::Occupied(e) => out[*e.get()] = item,
            Entry::Vacant(e) => {
                e.insert(out.len());
                out.push(item);
            }
        }
    }
    out
}

/// Merges previously applied descriptors with the descriptor built from the manifest.
///
/// Descriptors are deduplicated by target name, so the manifest's descriptor replaces an
/// existing descriptor for the same module while keeping its position. Symbols are then
/// deduplicated by name within each descriptor.
pub fn merge(
    existing: Vec<ResolvedDynamicLinkDescriptor>,
    target: &str,
    selected: &[&DynamicSymbol],
) -> Vec<ResolvedDynamicLinkDescriptor> {
    let _span = debug_span!("merge").entered();

    let mut all = existing;
    all.push(ResolvedDynamicLinkDescriptor {
        target_name: target.to_string(),
        resolved_symbols: selected
            .iter()
            .map(|s| ResolvedDynamicSymbolDescriptor::from_manifest(s))
            .collect(),
    });

    let mut merged = dedup_last_wins(all, |d| d.target_name.clone());
    for d in merged.iter_mut() {
        let before = d.resolved_symbols.len();
        d.resolved_symbols = dedup_last_wins(std::mem::take(&mut d.resolved_symbols), |s| {
            s.name.clone()
        });
        if d.resolved_symbols.len() != before {
            debug!(
                module = %d.target_name,
                removed = before - d.resolved_symbols.len(),
                "removed duplicate symbols"
            );
        }
    }
    merged
}

/// Fills in the demangled name of every symbol. Names are demangled in parallel; a name that
/// cannot be demangled gets an empty demangled name.
pub fn demangle_all(
    descriptors: &mut [ResolvedDynamicLinkDescriptor],
    demangler: &dyn Demangler,
    arch: Architecture,
) {
    let _span = debug_span!("demangle_all").entered();

    let symbols: Vec<&mut ResolvedDynamicSymbolDescriptor> = descriptors
        .iter_mut()
        .flat_map(|d| d.resolved_symbols.iter_mut())
        .collect();

    let failures: usize = symbols
        .into_par_iter()
        .map(|s| match demangler.demangle(&s.name, arch) {
            Some(demangled) => {
                trace!(name = %s.name, demangled = %demangled);
                s.demangled_name = demangled;
                0
            }
            None => {
                s.demangled_name.clear();
                1
            }
        })
        .sum();

    if failures != 0 {
        warn!(failures, "some symbol names could not be demangled");
    }
}
