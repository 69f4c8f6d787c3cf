//! Label partitioning: the eligibility tag, area markers, and `@person`
//! labels are peeled off a source item's label set; everything else passes
//! through to the destination Labels multi-select.

use crate::config::SyncConfig;

/// Strip a trailing area marker (emoji such as the folder glyph) from a
/// label: trim, drop trailing characters with code points above 127, trim
/// again.
pub fn strip_area_marker(label: &str) -> String {
    let trimmed = label.trim();
    let stripped: &str = trimmed.trim_end_matches(|c: char| (c as u32) > 127);
    stripped.trim_end().to_string()
}

/// Canonical form used for area matching: marker stripped, uppercased.
pub fn canonical_area(label: &str) -> String {
    strip_area_marker(label).to_uppercase()
}

/// General name canonicalization: trim, collapse internal whitespace,
/// uppercase. Used for area and project keys.
pub fn canonical_name(name: &str) -> String {
    name.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

/// The three-way split of a source label set.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LabelPartition {
    /// Labels passing through to the destination multi-select, sorted.
    pub plain: Vec<String>,
    /// Matched area canonical names, sorted and deduplicated.
    pub areas: Vec<String>,
    /// Person names with the `@` prefix stripped, sorted.
    pub people: Vec<String>,
}

pub fn partition_labels(labels: &[String], cfg: &SyncConfig) -> LabelPartition {
    let tag = &cfg.eligibility_tag;
    let prefixed_tag = format!("@{tag}");
    let mut out = LabelPartition::default();

    for label in labels {
        if label == tag || *label == prefixed_tag {
            continue;
        }
        if let Some(person) = label.strip_prefix('@') {
            if !person.is_empty() {
                out.people.push(person.to_string());
            }
            continue;
        }
        let canonical = canonical_area(label);
        if cfg.is_area_name(&canonical) {
            if !out.areas.contains(&canonical) {
                out.areas.push(canonical);
            }
            continue;
        }
        out.plain.push(label.clone());
    }

    out.plain.sort();
    out.areas.sort();
    out.people.sort();
    out
}
