//! Plain-text signature rendering and type-name resolution from structured
//! rustdoc JSON.

use std::sync::LazyLock;

use regex::Regex;
use serde_json::Value;

use super::links::resolve_item_uri;
use super::{CrateDoc, FunctionInner};

/// Builds a plain-text Rust function signature.
///
/// Example output: `fn record_debug(&mut self, field: &Field, value: &dyn Debug)`.
pub fn render_fn_sig(
    name: &str,
    f: &FunctionInner,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> String {
    let mut out = String::new();

    if f.header.is_const {
        out.push_str("const ");
    }
    if f.header.is_unsafe {
        out.push_str("unsafe ");
    }
    if f.header.is_async {
        out.push_str("async ");
    }

    out.push_str("fn ");
    out.push_str(name);

    let generic_names: Vec<&str> = f
        .generics
        .params
        .iter()
        .filter(|p| !p.name.is_empty())
        .map(|p| p.name.as_str())
        .collect();
    if !generic_names.is_empty() {
        out.push('<');
        out.push_str(&generic_names.join(", "));
        out.push('>');
    }

    out.push('(');
    let mut params = Vec::new();
    for (param_name, type_json) in &f.sig.inputs {
        if param_name == "self" {
            params.push(self_shorthand(type_json));
        } else {
            let type_str = plain_type(&resolve_type_name(type_json, doc, crate_name, version));
            params.push(format!("{param_name}: {type_str}"));
        }
    }
    out.push_str(&params.join(", "));
    out.push(')');

    if let Some(output) = &f.sig.output {
        if !output.is_null() {
            let ret = plain_type(&resolve_type_name(output, doc, crate_name, version));
            if !ret.is_empty() {
                out.push_str(" -> ");
                out.push_str(&ret);
            }
        }
    }

    out
}

/// Renders a self parameter with Rust shorthand: `self`, `&self`,
/// `&mut self`, `&'a self`, `&'a mut self`.
pub fn self_shorthand(type_json: &Value) -> String {
    let Some(map) = type_json.as_object() else {
        return "self".to_string();
    };
    if map.contains_key("generic") {
        return "self".to_string();
    }
    if let Some(borrowed) = map.get("borrowed_ref") {
        let lifetime = borrowed
            .get("lifetime")
            .and_then(Value::as_str)
            .unwrap_or("");
        let is_mutable = borrowed
            .get("is_mutable")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let mut out = String::from("&");
        if !lifetime.is_empty() {
            out.push_str(lifetime);
            out.push(' ');
        }
        if is_mutable {
            out.push_str("mut ");
        }
        out.push_str("self");
        return out;
    }
    "self".to_string()
}

static MD_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\[([^\]]+)\]\([^)]+\)").unwrap());

/// Strips markdown formatting from a type string, leaving plain Rust syntax.
pub fn plain_type(s: &str) -> String {
    MD_LINK_RE.replace_all(s, "$1").replace(r"\<", "<")
}

/// Extracts a type name from a rustdoc Type JSON, formatted as a markdown
/// link when the type resolves to a `doc://` URI.
pub fn resolve_type_name(
    type_json: &Value,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> String {
    let Some(map) = type_json.as_object() else {
        return String::new();
    };

    if let Some(resolved) = map.get("resolved_path") {
        return format_resolved_path(resolved, doc, crate_name, version);
    }
    if let Some(name) = map.get("primitive").and_then(Value::as_str) {
        return name.to_string();
    }
    if let Some(dt) = map.get("dyn_trait") {
        return format_dyn_trait(dt, doc, crate_name, version);
    }
    if let Some(borrowed) = map.get("borrowed_ref") {
        return format_borrowed_ref(borrowed, doc, crate_name, version);
    }
    if let Some(slice) = map.get("slice") {
        let inner = resolve_type_name(slice, doc, crate_name, version);
        if !inner.is_empty() {
            return format!("[{inner}]");
        }
    }
    if let Some(name) = map.get("generic").and_then(Value::as_str) {
        return name.to_string();
    }
    if let Some(qp) = map.get("qualified_path") {
        return format_qualified_path(qp, doc, crate_name, version);
    }
    if let Some(types) = map.get("tuple").and_then(Value::as_array) {
        let parts: Vec<String> = types
            .iter()
            .map(|t| resolve_type_name(t, doc, crate_name, version))
            .filter(|s| !s.is_empty())
            .collect();
        return format!("({})", parts.join(", "));
    }

    String::new()
}

fn format_resolved_path(resolved: &Value, doc: &CrateDoc, crate_name: &str, version: &str) -> String {
    // The path field was called "name" in older format versions.
    let mut name = resolved
        .get("path")
        .or_else(|| resolved.get("name"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let id = resolved.get("id").and_then(Value::as_u64).map(|v| v as u32);

    if name.is_empty() {
        if let Some(id) = id {
            if let Some(summary) = doc.paths.get(&id) {
                if let Some(last) = summary.path.last() {
                    name = last.clone();
                }
            }
        }
    }
    if name.is_empty() {
        return String::new();
    }

    let mut base = match id.and_then(|id| resolve_item_uri(id, doc, crate_name, version)) {
        Some(uri) => format!("[{name}]({uri})"),
        None => name,
    };

    if let Some(args) = resolved.get("args") {
        base.push_str(&format_generic_args(args, doc, crate_name, version));
    }

    base
}

fn format_generic_args(args: &Value, doc: &CrateDoc, crate_name: &str, version: &str) -> String {
    let Some(angle) = args.get("angle_bracketed") else {
        return String::new();
    };
    let Some(list) = angle.get("args").and_then(Value::as_array) else {
        return String::new();
    };

    let mut parts = Vec::new();
    for arg in list {
        if let Some(type_json) = arg.get("type") {
            let t = resolve_type_name(type_json, doc, crate_name, version);
            if !t.is_empty() {
                parts.push(t);
            }
        } else if let Some(lifetime) = arg.get("lifetime").and_then(Value::as_str) {
            parts.push(lifetime.to_string());
        }
    }

    if parts.is_empty() {
        return String::new();
    }
    // Escaped so the angle bracket survives markdown rendering.
    format!(r"\<{}>", parts.join(", "))
}

fn format_dyn_trait(dt: &Value, doc: &CrateDoc, crate_name: &str, version: &str) -> String {
    let Some(traits) = dt.get("traits").and_then(Value::as_array) else {
        return String::new();
    };
    if traits.is_empty() {
        return String::new();
    }

    let mut parts = Vec::new();
    for entry in traits {
        let Some(trait_path) = entry.get("trait") else {
            continue;
        };
        let name = trait_path
            .get("name")
            .or_else(|| trait_path.get("path"))
            .and_then(Value::as_str)
            .unwrap_or("");
        if name.is_empty() {
            continue;
        }
        let id = trait_path.get("id").and_then(Value::as_u64).map(|v| v as u32);
        match id.and_then(|id| resolve_item_uri(id, doc, crate_name, version)) {
            Some(uri) => parts.push(format!("[{name}]({uri})")),
            None => parts.push(name.to_string()),
        }
    }
    if let Some(lifetime) = dt.get("lifetime").and_then(Value::as_str) {
        if !lifetime.is_empty() {
            parts.push(lifetime.to_string());
        }
    }

    if parts.is_empty() {
        return String::new();
    }
    format!("dyn {}", parts.join(" + "))
}

fn format_borrowed_ref(borrowed: &Value, doc: &CrateDoc, crate_name: &str, version: &str) -> String {
    let Some(type_json) = borrowed.get("type") else {
        return String::new();
    };
    let inner = resolve_type_name(type_json, doc, crate_name, version);
    if inner.is_empty() {
        return String::new();
    }

    let lifetime = borrowed.get("lifetime").and_then(Value::as_str).unwrap_or("");
    let is_mutable = borrowed
        .get("is_mutable")
        .and_then(Value::as_bool)
        .unwrap_or(false);

    let mut out = String::from("&");
    if !lifetime.is_empty() {
        out.push_str(lifetime);
        out.push(' ');
    }
    if is_mutable {
        out.push_str("mut ");
    }
    out.push_str(&inner);
    out
}

fn format_qualified_path(qp: &Value, doc: &CrateDoc, crate_name: &str, version: &str) -> String {
    let name = qp.get("name").and_then(Value::as_str).unwrap_or("");
    let Some(self_type) = qp.get("self_type") else {
        return String::new();
    };
    let self_name = resolve_type_name(self_type, doc, crate_name, version);
    if self_name.is_empty() {
        return String::new();
    }

    if let Some(trait_name) = qp
        .get("trait")
        .and_then(|t| t.get("name").or_else(|| t.get("path")))
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        return format!("<{self_name} as {trait_name}>::{name}");
    }
    format!("{self_name}::{name}")
}

static DOC_URI_LINK_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\]\((doc://[^)]+)\)").unwrap());

/// Extracts `doc://` URIs from markdown link syntax.
pub fn extract_doc_uris(markdown: &str) -> Vec<String> {
    DOC_URI_LINK_RE
        .captures_iter(markdown)
        .map(|caps| caps[1].to_string())
        .collect()
}

/// Extracts `doc://` URIs referenced by a function's parameter and return
/// types.
pub fn collect_fn_uris(
    f: &FunctionInner,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Vec<String> {
    let mut uris = Vec::new();
    for (param_name, type_json) in &f.sig.inputs {
        if param_name == "self" {
            continue;
        }
        uris.extend(extract_doc_uris(&resolve_type_name(
            type_json, doc, crate_name, version,
        )));
    }
    if let Some(output) = &f.sig.output {
        uris.extend(extract_doc_uris(&resolve_type_name(
            output, doc, crate_name, version,
        )));
    }
    uris
}
