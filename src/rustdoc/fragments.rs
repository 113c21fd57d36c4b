//! Fragment generation: synthesized sub-documents rendered from an item's
//! type structure.
//!
//! Fragment names match docs.rs section anchors: `#fields`, `#variants`,
//! `#implementations`, `#implementors`, `#required-methods`,
//! `#provided-methods`, plus one index fragment per child-kind bucket for
//! modules (`#modules`, `#structs`, ...). Generation is deterministic: the
//! same item and crate always produce the same fragments.

use serde_json::Value;

use super::links::{external_crate_name, resolve_item_uri};
use super::sig::{collect_fn_uris, render_fn_sig, resolve_type_name};
use super::{CrateDoc, Fragment, ItemInner, ModuleInner, RustdocItem, StructKind};

pub const FRAG_FIELDS: &str = "fields";
pub const FRAG_VARIANTS: &str = "variants";
pub const FRAG_IMPLEMENTATIONS: &str = "implementations";
pub const FRAG_IMPLEMENTORS: &str = "implementors";
pub const FRAG_REQUIRED_METHODS: &str = "required-methods";
pub const FRAG_PROVIDED_METHODS: &str = "provided-methods";

/// Creates sub-documents for an item based on its kind.
pub fn generate_fragments(
    item: &RustdocItem,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Vec<Fragment> {
    match &item.inner {
        ItemInner::Struct(s) => {
            let mut fragments = Vec::new();
            if let Some(f) = fields_fragment(&s.kind, doc) {
                fragments.push(f);
            }
            if let Some(f) = impls_fragment(&s.impls, doc, crate_name, version) {
                fragments.push(f);
            }
            fragments
        }
        ItemInner::Enum(e) => {
            let mut fragments = Vec::new();
            if let Some(f) = variants_fragment(&e.variants, doc) {
                fragments.push(f);
            }
            if let Some(f) = impls_fragment(&e.impls, doc, crate_name, version) {
                fragments.push(f);
            }
            fragments
        }
        ItemInner::Trait(t) => {
            let mut fragments = trait_method_fragments(&t.items, doc, crate_name, version);
            if let Some(f) = implementors_fragment(&t.implementations, doc, crate_name, version) {
                fragments.push(f);
            }
            if let Some(f) = impls_fragment(&t.impls, doc, crate_name, version) {
                fragments.push(f);
            }
            fragments
        }
        ItemInner::Module(m) => module_fragments(m, item.id, doc, crate_name, version),
        _ => Vec::new(),
    }
}

/// `#fields` for a struct; named fields only.
fn fields_fragment(kind: &StructKind, doc: &CrateDoc) -> Option<Fragment> {
    let StructKind::Plain { fields, .. } = kind else {
        return None;
    };
    if fields.is_empty() {
        return None;
    }

    let mut out = String::from("# Fields\n\n");
    let mut count = 0;
    for field_id in fields {
        let Some(field) = doc.index.get(field_id) else {
            continue;
        };
        let name = field.name.as_deref().unwrap_or("<unnamed>");
        out.push_str(&format!("- **{name}**"));
        if let Some(first) = first_doc_line(field) {
            out.push_str(": ");
            out.push_str(first);
        }
        out.push('\n');
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some(Fragment { name: FRAG_FIELDS.to_string(), content: out })
}

/// `#variants` for an enum.
fn variants_fragment(variants: &[u32], doc: &CrateDoc) -> Option<Fragment> {
    if variants.is_empty() {
        return None;
    }

    let mut out = String::from("# Variants\n\n");
    let mut count = 0;
    for variant_id in variants {
        let Some(variant) = doc.index.get(variant_id) else {
            continue;
        };
        let name = variant.name.as_deref().unwrap_or("<unnamed>");
        out.push_str(&format!("- **{name}**"));
        if let Some(first) = first_doc_line(variant) {
            out.push_str(": ");
            out.push_str(first);
        }
        out.push('\n');
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some(Fragment { name: FRAG_VARIANTS.to_string(), content: out })
}

/// `#implementations`: methods grouped by impl block, with a heading per
/// `impl Type` or `impl Trait for Type`.
fn impls_fragment(
    impls: &[u32],
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Option<Fragment> {
    if impls.is_empty() {
        return None;
    }

    let mut out = String::from("# Implementations\n\n");
    let mut count = 0;
    let mut all_uris: Vec<String> = Vec::new();

    for impl_id in impls {
        let Some(ItemInner::Impl(imp)) = doc.index.get(impl_id).map(|i| &i.inner) else {
            continue;
        };

        let for_name = resolve_type_name(&imp.for_, doc, crate_name, version);
        let header = match trait_link(imp.trait_.as_ref(), doc, crate_name, version) {
            Some((link, uri)) => {
                if let Some(uri) = uri {
                    all_uris.push(uri);
                }
                if for_name.is_empty() {
                    format!("impl {link}")
                } else {
                    format!("impl {link} for {for_name}")
                }
            }
            None => {
                if for_name.is_empty() {
                    "impl".to_string()
                } else {
                    format!("impl {for_name}")
                }
            }
        };

        let methods = method_summaries(&imp.items, doc, crate_name, version);
        if methods.is_empty() {
            continue;
        }

        out.push_str(&format!("## {header}\n\n"));
        for m in &methods {
            let display = if m.sig.is_empty() { &m.name } else { &m.sig };
            out.push_str(&format!("- `{display}`"));
            if !m.docs.is_empty() {
                out.push_str(": ");
                out.push_str(&m.docs);
            }
            out.push('\n');
        }
        out.push('\n');
        count += 1;

        for item_id in &imp.items {
            if let Some(ItemInner::Function(f)) = doc.index.get(item_id).map(|i| &i.inner) {
                all_uris.extend(collect_fn_uris(f, doc, crate_name, version));
            }
        }
    }

    if count == 0 {
        return None;
    }
    append_types_used(&mut out, &all_uris);
    Some(Fragment { name: FRAG_IMPLEMENTATIONS.to_string(), content: out })
}

/// Renders the trait part of an impl header as `[Name](uri)` or plain name.
fn trait_link(
    trait_: Option<&Value>,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Option<(String, Option<String>)> {
    let trait_ = trait_?;
    let name = trait_
        .get("name")
        .or_else(|| trait_.get("path"))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())?;
    let id = trait_.get("id").and_then(Value::as_u64).map(|v| v as u32);
    match id.and_then(|id| resolve_item_uri(id, doc, crate_name, version)) {
        Some(uri) => Some((format!("[{name}]({uri})"), Some(uri))),
        None => Some((name.to_string(), None)),
    }
}

/// `#implementors` for a trait: the types implementing it.
fn implementors_fragment(
    implementations: &[u32],
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Option<Fragment> {
    if implementations.is_empty() {
        return None;
    }

    let mut out = String::from("# Implementors\n\n");
    let mut count = 0;
    for impl_id in implementations {
        let Some(ItemInner::Impl(imp)) = doc.index.get(impl_id).map(|i| &i.inner) else {
            continue;
        };
        let type_name = resolve_type_name(&imp.for_, doc, crate_name, version);
        if type_name.is_empty() {
            continue;
        }
        out.push_str(&format!("- {type_name}\n"));
        count += 1;
    }

    if count == 0 {
        return None;
    }
    Some(Fragment { name: FRAG_IMPLEMENTORS.to_string(), content: out })
}

struct TraitMethod {
    name: String,
    sig: String,
    docs: String,
}

/// `#required-methods` and `#provided-methods` for a trait, split by whether
/// the method has a default body. Associated types and constants list under
/// required.
fn trait_method_fragments(
    items: &[u32],
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Vec<Fragment> {
    let mut required: Vec<TraitMethod> = Vec::new();
    let mut provided: Vec<TraitMethod> = Vec::new();
    let mut required_uris: Vec<String> = Vec::new();
    let mut provided_uris: Vec<String> = Vec::new();

    for item_id in items {
        let Some(item) = doc.index.get(item_id) else {
            continue;
        };
        let Some(name) = item.name.clone() else {
            continue;
        };
        let docs = item.docs.clone().unwrap_or_default();

        if let ItemInner::Function(f) = &item.inner {
            let method = TraitMethod {
                sig: render_fn_sig(&name, f, doc, crate_name, version),
                name,
                docs,
            };
            let uris = collect_fn_uris(f, doc, crate_name, version);
            if f.has_body {
                provided.push(method);
                provided_uris.extend(uris);
            } else {
                required.push(method);
                required_uris.extend(uris);
            }
        } else {
            let sig = match item.inner.kind() {
                "type_alias" | "assoc_type" => format!("type {name}"),
                "constant" | "assoc_const" => format!("const {name}"),
                _ => String::new(),
            };
            required.push(TraitMethod { name, sig, docs });
        }
    }

    let mut fragments = Vec::new();
    if !required.is_empty() {
        let mut out = String::from("# Required Methods\n\n");
        write_trait_methods(&mut out, &required);
        append_types_used(&mut out, &required_uris);
        fragments.push(Fragment { name: FRAG_REQUIRED_METHODS.to_string(), content: out });
    }
    if !provided.is_empty() {
        let mut out = String::from("# Provided Methods\n\n");
        write_trait_methods(&mut out, &provided);
        append_types_used(&mut out, &provided_uris);
        fragments.push(Fragment { name: FRAG_PROVIDED_METHODS.to_string(), content: out });
    }
    fragments
}

fn write_trait_methods(out: &mut String, methods: &[TraitMethod]) {
    for m in methods {
        out.push_str(&format!("## {}\n\n", m.name));
        if !m.sig.is_empty() {
            out.push_str(&format!("```rust\n{}\n```\n\n", m.sig));
        }
        if !m.docs.is_empty() {
            out.push_str(&m.docs);
            out.push_str("\n\n");
        }
    }
}

struct MethodSummary {
    name: String,
    sig: String,
    docs: String,
}

/// Brief method info (signature + first docs line) for impl block listings.
fn method_summaries(
    item_ids: &[u32],
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Vec<MethodSummary> {
    let mut methods = Vec::new();
    for item_id in item_ids {
        let Some(item) = doc.index.get(item_id) else {
            continue;
        };
        let Some(name) = item.name.clone() else {
            continue;
        };
        let sig = match &item.inner {
            ItemInner::Function(f) => render_fn_sig(&name, f, doc, crate_name, version),
            _ => String::new(),
        };
        methods.push(MethodSummary {
            docs: first_doc_line(item).unwrap_or("").to_string(),
            name,
            sig,
        });
    }
    methods
}

/// Module child-kind buckets in emission order, mirroring docs.rs module
/// pages.
const MODULE_BUCKETS: &[(&str, &str)] = &[
    ("modules", "Modules"),
    ("structs", "Structs"),
    ("enums", "Enums"),
    ("traits", "Traits"),
    ("functions", "Functions"),
    ("type-aliases", "Type Aliases"),
    ("constants", "Constants"),
    ("statics", "Statics"),
    ("macros", "Macros"),
    ("attribute-macros", "Attribute Macros"),
    ("derive-macros", "Derive Macros"),
    ("unions", "Unions"),
    ("primitives", "Primitives"),
];

fn bucket_for_kind(kind: &str) -> Option<&'static str> {
    Some(match kind {
        "module" => "modules",
        "struct" => "structs",
        "enum" => "enums",
        "trait" => "traits",
        "function" => "functions",
        "type_alias" => "type-aliases",
        "constant" => "constants",
        "static" => "statics",
        "macro" | "proc_macro" => "macros",
        "proc_attribute" => "attribute-macros",
        "proc_derive" => "derive-macros",
        "union" => "unions",
        "primitive" => "primitives",
        _ => return None,
    })
}

/// Index fragments for a module: one fragment per non-empty child-kind
/// bucket. `use` children are resolved to their target for bucketing and
/// docs but listed under the re-export's local path.
fn module_fragments(
    module: &ModuleInner,
    module_id: u32,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Vec<Fragment> {
    let module_path = doc
        .paths
        .get(&module_id)
        .map(|s| s.dotted_path())
        .unwrap_or_else(|| crate_name.to_string());

    let mut buckets: Vec<(&'static str, Vec<String>)> = Vec::new();
    let mut push = |bucket: &'static str, line: String| {
        if let Some((_, lines)) = buckets.iter_mut().find(|(b, _)| *b == bucket) {
            lines.push(line);
        } else {
            buckets.push((bucket, vec![line]));
        }
    };

    for child_id in &module.items {
        let Some(child) = doc.index.get(child_id) else {
            continue;
        };

        if let ItemInner::Use(use_item) = &child.inner {
            // Globs have no single target item to list; the re-export table
            // still remaps their paths.
            if use_item.is_glob {
                continue;
            }
            let Some(target_id) = use_item.id else {
                continue;
            };

            let local_path = format!("{module_path}::{}", use_item.name);
            let uri = format!("doc://{crate_name}/{version}/{local_path}");

            if let Some(target) = doc.index.get(&target_id) {
                let Some(bucket) = bucket_for_kind(target.inner.kind()) else {
                    continue;
                };
                let mut line = format!("- [{}]({uri})", use_item.name);
                if let Some(first) = first_doc_line(target) {
                    line.push_str(": ");
                    line.push_str(first);
                }
                push(bucket, line);
            } else if let Some(summary) = doc.paths.get(&target_id) {
                // Target lives in a dependency: annotate with the source.
                let Some(bucket) = bucket_for_kind(&summary.kind) else {
                    continue;
                };
                let Some(dep_name) = external_crate_name(doc, summary.crate_id) else {
                    continue;
                };
                let source_path = summary.dotted_path();
                let line = format!(
                    "- [{}]({uri}) (from [{source_path}](doc://{dep_name}/latest/{source_path}))",
                    use_item.name
                );
                push(bucket, line);
            }
            continue;
        }

        let kind = doc
            .paths
            .get(child_id)
            .map(|s| s.kind.as_str())
            .unwrap_or_else(|| child.inner.kind());
        let Some(bucket) = bucket_for_kind(kind) else {
            continue;
        };
        // Children re-surfaced from other crates are not this module's items.
        if doc.paths.get(child_id).is_some_and(|s| s.crate_id != 0) {
            continue;
        }
        let Some(name) = child.name.as_deref() else {
            continue;
        };

        let mut line = match resolve_item_uri(*child_id, doc, crate_name, version) {
            Some(uri) => format!("- [{name}]({uri})"),
            None => format!("- {name}"),
        };
        if let Some(first) = first_doc_line(child) {
            line.push_str(": ");
            line.push_str(first);
        }
        push(bucket, line);
    }

    let mut fragments = Vec::new();
    for (bucket, heading) in MODULE_BUCKETS {
        let Some((_, lines)) = buckets.iter().find(|(b, _)| b == bucket) else {
            continue;
        };
        let mut content = format!("# {heading}\n\n");
        for line in lines {
            content.push_str(line);
            content.push('\n');
        }
        fragments.push(Fragment { name: bucket.to_string(), content });
    }
    fragments
}

fn first_doc_line(item: &RustdocItem) -> Option<&str> {
    let docs = item.docs.as_deref()?;
    if docs.is_empty() {
        return None;
    }
    Some(docs.lines().next().unwrap_or(docs))
}

/// Appends a `## Types Used` section with deduplicated bare URIs.
fn append_types_used(out: &mut String, uris: &[String]) {
    let mut unique: Vec<&String> = Vec::new();
    for uri in uris {
        if !unique.contains(&uri) {
            unique.push(uri);
        }
    }
    if unique.is_empty() {
        return;
    }
    out.push_str("## Types Used\n\n");
    for uri in unique {
        out.push_str("- ");
        out.push_str(uri);
        out.push('\n');
    }
}
