//! Intra-doc link and doc-site URL resolution to `doc://` URIs.

use std::collections::HashMap;
use std::sync::LazyLock;

use regex::Regex;

use super::{CrateDoc, RustdocItem};

/// Resolves rustdoc intra-doc links to `doc://` URIs.
///
/// The item's `links` field maps markdown target text (e.g. `Value::as_str`)
/// to item ids in the crate index; each id is looked up in the paths table
/// for the full Rust path and crate origin.
pub fn resolve_doc_links(
    item: &RustdocItem,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> HashMap<String, String> {
    let mut resolved = HashMap::new();
    for (target, item_id) in &item.links {
        if let Some(uri) = resolve_item_uri(*item_id, doc, crate_name, version) {
            resolved.insert(target.clone(), uri);
        }
    }
    resolved
}

/// Builds a `doc://` URI for a rustdoc item id, or `None` if the id can't be
/// resolved.
pub fn resolve_item_uri(
    item_id: u32,
    doc: &CrateDoc,
    crate_name: &str,
    version: &str,
) -> Option<String> {
    let summary = doc.paths.get(&item_id)?;
    let full_path = summary.dotted_path();
    if summary.crate_id == 0 {
        return Some(format!("doc://{crate_name}/{version}/{full_path}"));
    }
    let dep_name = external_crate_name(doc, summary.crate_id)?;
    Some(format!("doc://{dep_name}/latest/{full_path}"))
}

// Extracts the crate name from a docs.rs html_root_url, e.g.
// "https://docs.rs/tracing-core/0.1.36/x86_64-unknown-linux-gnu/" → "tracing-core".
static REGISTRY_CRATE_NAME_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^https?://docs\.rs/([^/]+)/").unwrap());

/// Registry package name for a dependency by crate id.
///
/// Prefers the first path segment of the registry root URL: the lib name
/// uses underscores while the registry name may use hyphens. Falls back to
/// the declared lib name.
pub fn external_crate_name(doc: &CrateDoc, crate_id: u32) -> Option<String> {
    let ext = doc.external_crates.get(&crate_id)?;
    if let Some(root_url) = &ext.html_root_url {
        if let Some(caps) = REGISTRY_CRATE_NAME_RE.captures(root_url) {
            return Some(caps[1].to_string());
        }
    }
    if ext.name.is_empty() {
        return None;
    }
    Some(ext.name.clone())
}

/// Scans doc text for documentation-site URLs and maps each to its `doc://`
/// equivalent.
pub struct DocSiteRewriter {
    url_re: Regex,
    host: String,
}

impl DocSiteRewriter {
    pub fn new(host: &str) -> Self {
        let url_re = Regex::new(&format!(
            r"https?://{}/[^\s)\]>]+",
            regex::escape(host)
        ))
        .expect("doc-site URL pattern");
        Self { url_re, host: host.to_string() }
    }

    /// Returns a mapping from each recognized URL in `docs` to its
    /// `doc://` URI.
    pub fn resolve(&self, docs: &str) -> HashMap<String, String> {
        let mut resolved = HashMap::new();
        for m in self.url_re.find_iter(docs) {
            let url = m.as_str();
            if let Some(uri) = self.url_to_uri(url) {
                resolved.insert(url.to_string(), uri);
            }
        }
        resolved
    }

    /// Converts a single doc-site URL to a `doc://` URI. Returns `None` for
    /// URLs that have no item equivalent (crate info pages, short paths).
    pub fn url_to_uri(&self, raw_url: &str) -> Option<String> {
        let rest = raw_url
            .strip_prefix("https://")
            .or_else(|| raw_url.strip_prefix("http://"))?;
        let path = rest.strip_prefix(&self.host)?.strip_prefix('/')?;

        // Drop query and fragment.
        let path = path.split(['#', '?']).next().unwrap_or(path);
        let path = path.trim_end_matches('/');

        // Skip /crate/... info pages.
        if path.starts_with("crate/") {
            return None;
        }

        let mut parts = path.splitn(3, '/');
        let crate_name = parts.next()?;
        let version = parts.next()?;
        let rest = parts.next()?;

        let mut segments: Vec<&str> = rest.split('/').filter(|s| !s.is_empty()).collect();
        if segments.is_empty() {
            return None;
        }

        // Last segment: index.html (module page) or {kind}.{Name}.html (item page).
        let last = segments[segments.len() - 1];
        if let Some(base) = last.strip_suffix(".html") {
            if last == "index.html" {
                segments.pop();
            } else if let Some((_, name)) = base.split_once('.') {
                let n = segments.len();
                segments[n - 1] = name;
            }
        }

        if segments.is_empty() {
            return None;
        }

        Some(format!(
            "doc://{crate_name}/{version}/{}",
            segments.join("::")
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rustdoc::{ExternalCrate, ItemSummary};

    #[test]
    fn url_to_uri_cases() {
        let rewriter = DocSiteRewriter::new("docs.rs");
        let cases = [
            (
                "https://docs.rs/serde/latest/serde/ser/trait.Serialize.html",
                Some("doc://serde/latest/serde::ser::Serialize"),
            ),
            (
                "https://docs.rs/serde/1.0.210/serde/de/trait.Deserialize.html",
                Some("doc://serde/1.0.210/serde::de::Deserialize"),
            ),
            (
                "https://docs.rs/tokio/latest/tokio/sync/struct.Mutex.html",
                Some("doc://tokio/latest/tokio::sync::Mutex"),
            ),
            (
                "https://docs.rs/serde/latest/serde/ser/fn.impossible.html",
                Some("doc://serde/latest/serde::ser::impossible"),
            ),
            // Fragment is ignored.
            (
                "https://docs.rs/serde/latest/serde/ser/trait.Serialize.html#method.serialize",
                Some("doc://serde/latest/serde::ser::Serialize"),
            ),
            // Module via index.html and via trailing slash.
            (
                "https://docs.rs/serde/latest/serde/ser/index.html",
                Some("doc://serde/latest/serde::ser"),
            ),
            (
                "https://docs.rs/serde/latest/serde/ser/",
                Some("doc://serde/latest/serde::ser"),
            ),
            // Crate root with and without trailing slash.
            ("https://docs.rs/serde/latest/serde/", Some("doc://serde/latest/serde")),
            ("https://docs.rs/serde/latest/serde", Some("doc://serde/latest/serde")),
            // Crate info page and short paths are not convertible.
            ("https://docs.rs/crate/serde/latest", None),
            ("https://docs.rs/serde/latest", None),
            ("https://docs.rs/serde", None),
            // HTTP variant.
            (
                "http://docs.rs/serde/latest/serde/ser/trait.Serialize.html",
                Some("doc://serde/latest/serde::ser::Serialize"),
            ),
        ];

        for (url, want) in cases {
            assert_eq!(rewriter.url_to_uri(url).as_deref(), want, "url: {url}");
        }
    }

    #[test]
    fn url_to_uri_respects_configured_host() {
        let rewriter = DocSiteRewriter::new("registry");
        assert_eq!(
            rewriter
                .url_to_uri("https://registry/serde/latest/serde/ser/trait.Serialize.html")
                .as_deref(),
            Some("doc://serde/latest/serde::ser::Serialize")
        );
        assert_eq!(rewriter.url_to_uri("https://registry/crate/serde/latest"), None);
        assert_eq!(
            rewriter.url_to_uri("https://registry/x/1.0/x/mod/index.html").as_deref(),
            Some("doc://x/1.0/x::mod")
        );
    }

    #[test]
    fn resolve_finds_urls_in_text() {
        let rewriter = DocSiteRewriter::new("docs.rs");
        let docs = "See the [Serialize](https://docs.rs/serde/latest/serde/ser/trait.Serialize.html) trait\n\
                    and [serde](https://docs.rs/serde/latest/serde/) for more info.";
        let got = rewriter.resolve(docs);
        assert_eq!(
            got["https://docs.rs/serde/latest/serde/ser/trait.Serialize.html"],
            "doc://serde/latest/serde::ser::Serialize"
        );
        assert_eq!(
            got["https://docs.rs/serde/latest/serde/"],
            "doc://serde/latest/serde"
        );
    }

    #[test]
    fn external_name_prefers_registry_url_segment() {
        let mut doc = CrateDoc::default();
        doc.external_crates.insert(
            5,
            ExternalCrate {
                name: "tracing_core".to_string(),
                html_root_url: Some("https://docs.rs/tracing-core/0.1.36/x86_64-unknown-linux-gnu/".to_string()),
            },
        );
        doc.external_crates.insert(
            6,
            ExternalCrate { name: "libm".to_string(), html_root_url: None },
        );

        assert_eq!(external_crate_name(&doc, 5).as_deref(), Some("tracing-core"));
        assert_eq!(external_crate_name(&doc, 6).as_deref(), Some("libm"));
        assert_eq!(external_crate_name(&doc, 7), None);
    }

    #[test]
    fn item_uri_local_and_external() {
        let mut doc = CrateDoc::default();
        doc.paths.insert(
            1,
            ItemSummary {
                crate_id: 0,
                path: vec!["mycrate".into(), "Foo".into()],
                kind: "struct".into(),
            },
        );
        doc.paths.insert(
            2,
            ItemSummary {
                crate_id: 9,
                path: vec!["dep".into(), "Bar".into()],
                kind: "struct".into(),
            },
        );
        doc.external_crates.insert(
            9,
            ExternalCrate { name: "dep".to_string(), html_root_url: None },
        );

        assert_eq!(
            resolve_item_uri(1, &doc, "mycrate", "1.0.0").as_deref(),
            Some("doc://mycrate/1.0.0/mycrate::Foo")
        );
        assert_eq!(
            resolve_item_uri(2, &doc, "mycrate", "1.0.0").as_deref(),
            Some("doc://dep/latest/dep::Bar")
        );
        assert_eq!(resolve_item_uri(3, &doc, "mycrate", "1.0.0"), None);
    }
}
