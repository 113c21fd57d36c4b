//! Markdown post-processing: doc-link rewriting and YAML front matter.

use std::collections::HashMap;

use pulldown_cmark::{Event, Parser, Tag};

/// Rewrites markdown link destinations using the provided link map.
///
/// The markdown is parsed to discover which destinations actually appear as
/// links, then targeted string replacements are applied so the original
/// formatting survives untouched.
pub fn rewrite_links(src: &str, link_map: &HashMap<String, String>) -> String {
    if link_map.is_empty() {
        return src.to_string();
    }

    let mut replacements: Vec<(&str, &str)> = Vec::new();
    for event in Parser::new(src) {
        if let Event::Start(Tag::Link { dest_url, .. }) = event {
            if let Some((old, new)) = link_map.get_key_value(dest_url.as_ref()) {
                if !replacements.iter().any(|(o, _)| *o == old.as_str()) {
                    replacements.push((old, new));
                }
            }
        }
    }

    if replacements.is_empty() {
        return src.to_string();
    }

    let mut result = src.to_string();

    // Inline links: [text](destination)
    for (old, new) in &replacements {
        result = result.replace(&format!("]({old})"), &format!("]({new})"));
    }

    // Reference-style definitions: [ref]: destination
    let lines: Vec<String> = result
        .lines()
        .map(|line| {
            let trimmed = line.trim_end();
            for (old, new) in &replacements {
                let old_suffix = format!("]: {old}");
                if trimmed.ends_with(&old_suffix) {
                    return line.replacen(&old_suffix, &format!("]: {new}"), 1);
                }
            }
            line.to_string()
        })
        .collect();

    lines.join("\n")
}

/// Prepends a YAML front-matter block listing fragment URIs, keys sorted
/// alphabetically.
pub fn add_front_matter(src: &str, fragments: &HashMap<String, String>) -> String {
    if fragments.is_empty() {
        return src.to_string();
    }

    let mut keys: Vec<&String> = fragments.keys().collect();
    keys.sort();

    let mut out = String::from("---\n");
    for key in keys {
        out.push_str(key);
        out.push_str(": ");
        out.push_str(&fragments[key]);
        out.push('\n');
    }
    out.push_str("---\n\n");
    out.push_str(src);
    out
}
