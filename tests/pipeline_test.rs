//! Integration tests for the indexing and retrieval flow.
//!
//! These exercise parsing, fragment generation, CAS storage, the catalog,
//! and vector search together without requiring a running embedding
//! provider (vectors are synthesized) or network access.

use std::collections::HashMap;

use docdex::cas::Cas;
use docdex::chunker;
use docdex::db::{Database, ItemRecord};
use docdex::db::ann::EMBEDDING_DIM;
use docdex::markdown;
use docdex::rustdoc::{self, reexports};

/// Rustdoc JSON for a small crate: a module with a documented struct, a
/// function, and a re-export from a dependency.
fn sample_rustdoc_json() -> Vec<u8> {
    let payload = serde_json::json!({
        "root": 0,
        "crate_version": "0.3.1",
        "format_version": 37,
        "index": {
            "0": {"id": 0, "crate_id": 0, "name": "widgets",
                  "docs": "A widget toolkit.",
                  "inner": {"module": {"items": [1, 2, 3]}}},
            "1": {"id": 1, "crate_id": 0, "name": "Button",
                  "docs": "A clickable button.\n\nSupports labels.\n\n# Examples\n\nPress it.",
                  "inner": {"struct": {"kind": {"plain": {"fields": [4]}}, "impls": [5]}}},
            "2": {"id": 2, "crate_id": 0, "name": "render",
                  "docs": "Renders a widget tree.",
                  "inner": {"function": {"sig": {"inputs": [], "output": null},
                                         "generics": {"params": []},
                                         "header": {}, "has_body": true}}},
            "3": {"id": 3, "crate_id": 0, "name": "Color",
                  "inner": {"use": {"id": 30, "name": "Color", "is_glob": false}}},
            "4": {"id": 4, "crate_id": 0, "name": "label",
                  "docs": "The button label.",
                  "inner": {"struct_field": {"primitive": "str"}}},
            "5": {"id": 5, "crate_id": 0,
                  "inner": {"impl": {"trait": null, "for": null, "items": [6]}}},
            "6": {"id": 6, "crate_id": 0, "name": "press",
                  "docs": "Presses the button.",
                  "inner": {"function": {"sig": {"inputs": [], "output": null},
                                         "generics": {"params": []},
                                         "header": {}, "has_body": true}}}
        },
        "paths": {
            "0": {"crate_id": 0, "path": ["widgets"], "kind": "module"},
            "1": {"crate_id": 0, "path": ["widgets", "Button"], "kind": "struct"},
            "2": {"crate_id": 0, "path": ["widgets", "render"], "kind": "function"},
            "30": {"crate_id": 9, "path": ["palette", "Color"], "kind": "struct"}
        },
        "external_crates": {
            "9": {"name": "palette", "html_root_url": "https://docs.rs/palette/0.7.6/"}
        }
    });
    serde_json::to_vec(&payload).unwrap()
}

fn unit_vec(direction: f32) -> Vec<f32> {
    vec![direction; EMBEDDING_DIM]
}

#[test]
fn parse_index_and_retrieve() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("db.db")).unwrap();
    let cas = Cas::new(dir.path().join("cas"));

    let (doc, items) = rustdoc::parse(&sample_rustdoc_json(), "widgets", "0.3.1", "docs.rs").unwrap();
    assert_eq!(doc.crate_version.as_deref(), Some("0.3.1"));

    // The use item and the impl are not catalog items; the field and the
    // method are (rustdoc indexes them), the impl itself is skipped.
    let paths: Vec<&str> = items.iter().map(|i| i.path.as_str()).collect();
    assert!(paths.contains(&"widgets::Button"));
    assert!(paths.contains(&"widgets::render"));
    assert!(!paths.iter().any(|p| p.contains("impl")));

    // Re-export of palette::Color surfaces under the local module path.
    let collected = reexports::collect_reexports(&doc, "widgets");
    assert_eq!(collected.len(), 1);
    assert_eq!(collected[0].local_prefix, "widgets::Color");
    assert_eq!(collected[0].source_crate, "palette");
    assert_eq!(collected[0].source_prefix, "palette::Color");

    // Write the crate into the catalog the way the pipeline does.
    let krate = db.upsert_crate("widgets", "0.3.1").unwrap();
    let mut records = Vec::new();
    for item in &items {
        let content_hash = if item.docs.is_empty() {
            None
        } else {
            Some(cas.write(&item.docs).unwrap())
        };
        records.push(ItemRecord {
            source_id: item.source_id,
            name: item.name.clone(),
            path: item.path.clone(),
            kind: item.kind.clone(),
            content_hash,
            signature: item.signature.clone(),
            doc_links: String::new(),
            fragment_names: if item.fragments.is_empty() {
                String::new()
            } else {
                serde_json::to_string(
                    &item.fragments.iter().map(|f| f.name.as_str()).collect::<Vec<_>>(),
                )
                .unwrap()
            },
        });
    }
    db.replace_crate_index(krate.id, &records, &collected).unwrap();
    db.mark_crate_processed(krate.id).unwrap();

    // Retrieval by path and through the re-export map.
    let button = db.get_item_by_path(krate.id, "widgets::Button").unwrap().unwrap();
    assert_eq!(button.kind, "struct");
    let body = cas.read(button.content_hash.as_ref().unwrap()).unwrap();
    assert!(body.starts_with("A clickable button."));

    let (source_crate, source_path) =
        db.resolve_reexport(krate.id, "widgets::Color").unwrap().unwrap();
    assert_eq!((source_crate.as_str(), source_path.as_str()), ("palette", "palette::Color"));

    // The Button struct carries fields + implementations fragments.
    let button_item = items.iter().find(|i| i.name == "Button").unwrap();
    let names: Vec<&str> = button_item.fragments.iter().map(|f| f.name.as_str()).collect();
    assert!(names.contains(&"fields"));
    assert!(names.contains(&"implementations"));
    let fields = &button_item.fragments[0];
    assert!(fields.content.contains("- **label**: The button label."));
}

#[test]
fn chunks_feed_scoped_vector_search() {
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("db.db")).unwrap();
    let cas = Cas::new(dir.path().join("cas"));

    // Two blobs in two crates sharing nothing; vectors point in opposite
    // directions so similarity separates them cleanly.
    let hash_a = cas.write("Spawns an asynchronous task.").unwrap();
    let hash_b = cas.write("Parses TOML configuration files.").unwrap();

    let crate_a = db.upsert_crate("asyncrt", "1.0.0").unwrap();
    let crate_b = db.upsert_crate("tomlconf", "1.0.0").unwrap();
    for (krate, name, path, hash) in [
        (&crate_a, "spawn", "asyncrt::spawn", &hash_a),
        (&crate_b, "parse", "tomlconf::parse", &hash_b),
    ] {
        db.replace_crate_index(
            krate.id,
            &[ItemRecord {
                source_id: 1,
                name: name.to_string(),
                path: path.to_string(),
                kind: "function".to_string(),
                content_hash: Some(hash.to_string()),
                signature: String::new(),
                doc_links: String::new(),
                fragment_names: String::new(),
            }],
            &[],
        )
        .unwrap();
        db.mark_crate_processed(krate.id).unwrap();
    }

    let chunks = chunker::chunk_sections("asyncrt::spawn", &cas.read(&hash_a).unwrap());
    assert_eq!(chunks.len(), 1);
    db.insert_embedding(&hash_a, &chunks[0].text, 0, &unit_vec(1.0)).unwrap();
    db.insert_embedding(&hash_b, "tomlconf::parse\n\nParses TOML configuration files.", 0, &unit_vec(-1.0))
        .unwrap();

    // Unscoped search sees both; scoping to asyncrt hides the other hash.
    let all = db.vector_search(&unit_vec(1.0), -1.5, 10, &[]).unwrap();
    assert_eq!(all.len(), 2);

    let scoped = db.vector_search(&unit_vec(1.0), 0.0, 10, &[crate_a.id]).unwrap();
    assert_eq!(scoped.len(), 1);
    assert_eq!(scoped[0].content_hash, hash_a);

    let item = db.get_item_for_hash(&scoped[0].content_hash, &[crate_a.id]).unwrap().unwrap();
    assert_eq!(item.path, "asyncrt::spawn");
}

#[test]
fn rendered_doc_matches_daemon_output_shape() {
    // The full-markdown rendering path: heading, kind, signature block,
    // link-rewritten body, fragment front matter.
    let body = "See [Widget](old-target) for details.";
    let mut link_map = HashMap::new();
    link_map.insert("old-target".to_string(), "doc://widgets/0.3.1/widgets::Widget".to_string());

    let mut content = String::from("# widgets::render\n\n**Kind:** function\n\n");
    content.push_str("```rust\nfn render()\n```\n\n");
    content.push_str(&markdown::rewrite_links(body, &link_map));
    content.push('\n');

    let mut fragment_uris = HashMap::new();
    fragment_uris.insert(
        "implementations".to_string(),
        "doc://widgets/0.3.1/widgets::render#implementations".to_string(),
    );
    let rendered = markdown::add_front_matter(&content, &fragment_uris);

    assert!(rendered.starts_with("---\n"));
    assert!(rendered.contains("implementations: doc://widgets/0.3.1/widgets::render#implementations"));
    assert!(rendered.contains("# widgets::render"));
    assert!(rendered.contains("(doc://widgets/0.3.1/widgets::Widget)"));
}

#[test]
fn reindexing_reuses_embeddings_by_hash() {
    // Indexing the same docs twice must not duplicate embeddings: the
    // second pass sees the hash as already embedded.
    let dir = tempfile::tempdir().unwrap();
    let db = Database::open(&dir.path().join("db.db")).unwrap();
    let cas = Cas::new(dir.path().join("cas"));

    let hash = cas.write("Shared documentation body.").unwrap();
    assert!(!db.has_embeddings(&hash));

    db.insert_embedding(&hash, "preamble\n\nShared documentation body.", 0, &unit_vec(1.0))
        .unwrap();
    assert!(db.has_embeddings(&hash));

    // Second index pass: the CAS write is a no-op and the embedding check
    // short-circuits.
    let hash_again = cas.write("Shared documentation body.").unwrap();
    assert_eq!(hash, hash_again);
    assert!(db.has_embeddings(&hash_again));
    assert_eq!(db.ann_count(), 1);
}
