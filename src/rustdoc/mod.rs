//! Rustdoc JSON decoding and item normalization.
//!
//! The upstream format is an untagged mixture of shapes, so decoding is
//! deliberately lazy: the top level carries typed fields for everything the
//! indexer relies on (`paths`, `index`, `external_crates`, `crate_version`),
//! while each item's `inner` payload is a sum type with a fallthrough case
//! that keeps unknown kinds as raw JSON.

pub mod cache;
pub mod fragments;
pub mod links;
pub mod reexports;
pub mod sig;

use std::collections::HashMap;

use serde::Deserialize;

use crate::error::Result;
use links::DocSiteRewriter;

/// Top-level structure of rustdoc JSON output.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CrateDoc {
    #[serde(default)]
    pub root: u32,
    #[serde(default)]
    pub crate_version: Option<String>,
    #[serde(default)]
    pub index: HashMap<u32, RustdocItem>,
    #[serde(default)]
    pub paths: HashMap<u32, ItemSummary>,
    #[serde(default)]
    pub external_crates: HashMap<u32, ExternalCrate>,
    #[serde(default)]
    pub format_version: u32,
}

/// A dependency crate referenced from the index.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExternalCrate {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub html_root_url: Option<String>,
}

/// Path and kind summary for an item id.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ItemSummary {
    #[serde(default)]
    pub crate_id: u32,
    #[serde(default)]
    pub path: Vec<String>,
    #[serde(default)]
    pub kind: String,
}

impl ItemSummary {
    pub fn dotted_path(&self) -> String {
        self.path.join("::")
    }
}

/// A single item in the rustdoc index.
#[derive(Debug, Clone, Deserialize)]
pub struct RustdocItem {
    #[serde(default)]
    pub id: u32,
    #[serde(default)]
    pub crate_id: u32,
    pub name: Option<String>,
    pub docs: Option<String>,
    /// Markdown link target text → item id.
    #[serde(default)]
    pub links: HashMap<String, u32>,
    #[serde(default)]
    pub inner: ItemInner,
}

/// The kind-specific payload of an item. Variants the indexer inspects are
/// typed; everything else falls through as raw JSON.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemInner {
    Module(ModuleInner),
    Struct(StructInner),
    Enum(EnumInner),
    Trait(TraitInner),
    Function(FunctionInner),
    Use(UseInner),
    Impl(ImplInner),
    #[serde(untagged)]
    Other(serde_json::Value),
}

impl Default for ItemInner {
    fn default() -> Self {
        ItemInner::Other(serde_json::Value::Null)
    }
}

impl ItemInner {
    /// Kind string as rustdoc names it ("struct", "enum", "type_alias", ...).
    pub fn kind(&self) -> &str {
        match self {
            ItemInner::Module(_) => "module",
            ItemInner::Struct(_) => "struct",
            ItemInner::Enum(_) => "enum",
            ItemInner::Trait(_) => "trait",
            ItemInner::Function(_) => "function",
            ItemInner::Use(_) => "use",
            ItemInner::Impl(_) => "impl",
            ItemInner::Other(serde_json::Value::Object(map)) => {
                map.keys().next().map(String::as_str).unwrap_or("unknown")
            }
            ItemInner::Other(serde_json::Value::String(s)) => s.as_str(),
            ItemInner::Other(_) => "unknown",
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ModuleInner {
    #[serde(default)]
    pub items: Vec<u32>,
    #[serde(default)]
    pub is_stripped: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct StructInner {
    #[serde(default)]
    pub kind: StructKind,
    #[serde(default)]
    pub impls: Vec<u32>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StructKind {
    Unit,
    Tuple(serde_json::Value),
    Plain {
        #[serde(default)]
        fields: Vec<u32>,
        #[serde(default)]
        has_stripped_fields: bool,
    },
}

impl Default for StructKind {
    fn default() -> Self {
        StructKind::Unit
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct EnumInner {
    #[serde(default)]
    pub variants: Vec<u32>,
    #[serde(default)]
    pub impls: Vec<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct TraitInner {
    #[serde(default)]
    pub items: Vec<u32>,
    #[serde(default)]
    pub implementations: Vec<u32>,
    #[serde(default)]
    pub impls: Vec<u32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FunctionInner {
    #[serde(default)]
    pub sig: FnSig,
    #[serde(default)]
    pub generics: Generics,
    #[serde(default)]
    pub header: FnHeader,
    #[serde(default)]
    pub has_body: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FnSig {
    /// (parameter name, type JSON) pairs; type shapes decode on demand.
    #[serde(default)]
    pub inputs: Vec<(String, serde_json::Value)>,
    #[serde(default)]
    pub output: Option<serde_json::Value>,
    #[serde(default)]
    pub is_c_variadic: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct Generics {
    #[serde(default)]
    pub params: Vec<GenericParamDef>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GenericParamDef {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub kind: serde_json::Value,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct FnHeader {
    #[serde(default)]
    pub is_const: bool,
    #[serde(default)]
    pub is_unsafe: bool,
    #[serde(default)]
    pub is_async: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct UseInner {
    #[serde(default)]
    pub source: String,
    #[serde(default)]
    pub name: String,
    pub id: Option<u32>,
    #[serde(default)]
    pub is_glob: bool,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ImplInner {
    #[serde(rename = "trait", default)]
    pub trait_: Option<serde_json::Value>,
    #[serde(rename = "for", default)]
    pub for_: serde_json::Value,
    #[serde(default)]
    pub items: Vec<u32>,
}

/// A synthesized sub-document generated from an item (e.g. #fields).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fragment {
    pub name: String,
    pub content: String,
}

/// A normalized doc item ready for indexing.
#[derive(Debug, Clone)]
pub struct ParsedItem {
    pub source_id: u32,
    pub name: String,
    pub path: String,
    pub kind: String,
    pub docs: String,
    pub signature: String,
    /// Resolved: markdown target or upstream URL → doc:// URI.
    pub doc_links: HashMap<String, String>,
    pub fragments: Vec<Fragment>,
}

/// Decodes rustdoc JSON bytes into the crate structure plus a normalized
/// item stream. `crate_name` and `version` feed the `doc://` URIs resolved
/// during parsing; `docs_host` is the registry host recognized in doc text.
pub fn parse(
    data: &[u8],
    crate_name: &str,
    version: &str,
    docs_host: &str,
) -> Result<(CrateDoc, Vec<ParsedItem>)> {
    let doc: CrateDoc = serde_json::from_slice(data)?;
    let rewriter = DocSiteRewriter::new(docs_host);

    // Sorted id order keeps the item stream deterministic.
    let mut ids: Vec<u32> = doc.index.keys().copied().collect();
    ids.sort_unstable();

    let mut items = Vec::new();
    for id in ids {
        let item = &doc.index[&id];
        // Foreign-crate overflow entries carry no local docs.
        if item.crate_id != 0 {
            continue;
        }
        let Some(mut parsed) = parse_item(id, item, &doc, crate_name, version) else {
            continue;
        };

        parsed.doc_links = links::resolve_doc_links(item, &doc, crate_name, version);
        for (url, uri) in rewriter.resolve(&parsed.docs) {
            parsed.doc_links.insert(url, uri);
        }
        items.push(parsed);
    }

    // Fragments need the full crate context, so they come after all items
    // are parsed.
    for parsed in &mut items {
        if let Some(item) = doc.index.get(&parsed.source_id) {
            parsed.fragments = fragments::generate_fragments(item, &doc, crate_name, version);
        }
    }

    Ok((doc, items))
}

fn parse_item(
    id: u32,
    item: &RustdocItem,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Option<ParsedItem> {
    let name = item.name.clone()?;

    let (path, kind) = match doc.paths.get(&id) {
        Some(summary) => (summary.dotted_path(), summary.kind.clone()),
        None => (name.clone(), item.inner.kind().to_string()),
    };

    // Impl blocks have no meaningful standalone docs.
    if kind == "impl" {
        return None;
    }

    let signature = match &item.inner {
        ItemInner::Function(f) => sig::render_fn_sig(&name, f, doc, crate_name, version),
        _ => String::new(),
    };

    Some(ParsedItem {
        source_id: id,
        name,
        path,
        kind,
        docs: item.docs.clone().unwrap_or_default(),
        signature,
        doc_links: HashMap::new(),
        fragments: Vec::new(),
    })
}
