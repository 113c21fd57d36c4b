//! Re-export collection: walks the module tree and emits path remappings.

use super::links::external_crate_name;
use super::{CrateDoc, ItemInner};

/// A `pub use` that re-surfaces an item under a different path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reexport {
    /// Path as seen from the re-exporting crate.
    pub local_prefix: String,
    /// Crate that defines the item.
    pub source_crate: String,
    /// Path in the source crate.
    pub source_prefix: String,
}

/// Walks the crate's module tree and returns all re-export mappings.
pub fn collect_reexports(doc: &CrateDoc, crate_name: &str) -> Vec<Reexport> {
    let mut reexports = Vec::new();
    walk_module(doc.root, doc, crate_name, &mut reexports);
    reexports
}

fn walk_module(module_id: u32, doc: &CrateDoc, crate_name: &str, reexports: &mut Vec<Reexport>) {
    let Some(module_item) = doc.index.get(&module_id) else {
        return;
    };
    let ItemInner::Module(module) = &module_item.inner else {
        return;
    };

    let module_path = doc
        .paths
        .get(&module_id)
        .map(|s| s.dotted_path())
        .unwrap_or_else(|| crate_name.to_string());

    for child_id in &module.items {
        let Some(child) = doc.index.get(child_id) else {
            continue;
        };

        match &child.inner {
            ItemInner::Module(_) => {
                walk_module(*child_id, doc, crate_name, reexports);
            }
            ItemInner::Use(use_item) => {
                let Some(target_id) = use_item.id else {
                    continue;
                };
                let Some(target) = doc.paths.get(&target_id) else {
                    continue;
                };

                let source_prefix = target.dotted_path();
                let source_crate = if target.crate_id == 0 {
                    crate_name.to_string()
                } else {
                    match external_crate_name(doc, target.crate_id) {
                        Some(name) => name,
                        None => continue,
                    }
                };

                // Glob re-exports surface items directly under the module;
                // named ones add their own path segment.
                let local_prefix = if use_item.is_glob {
                    module_path.clone()
                } else {
                    format!("{module_path}::{}", use_item.name)
                };

                // Identity is not a re-export.
                if local_prefix == source_prefix && source_crate == crate_name {
                    continue;
                }

                reexports.push(Reexport { local_prefix, source_crate, source_prefix });
            }
            _ => {}
        }
    }
}
