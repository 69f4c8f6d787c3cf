//! Client-side fuzzy matching of `@person` labels against the destination
//! People database.
//!
//! Matching is case-insensitive and word-boundary aware: `@DougD` matches
//! "Doug Diego" because the label starts with the first word of the name.
//! An ambiguous result (two candidates tied on score, or nothing above the
//! threshold) yields no match rather than a guess.

use tm_core::PersonRecord;

const SCORE_EXACT: u32 = 100;
const SCORE_WORD_EQUAL: u32 = 90;
const SCORE_NAME_PREFIX: u32 = 80;
const SCORE_LABEL_HAS_FIRST_WORD: u32 = 70;
const SCORE_CONTAINED: u32 = 60;
const SCORE_THRESHOLD: u32 = 60;

fn score(label: &str, name: &str) -> u32 {
    let label = label.to_lowercase();
    let name = name.to_lowercase();
    if label == name {
        return SCORE_EXACT;
    }
    let words: Vec<&str> = name.split_whitespace().collect();
    if words.iter().any(|w| *w == label) {
        return SCORE_WORD_EQUAL;
    }
    if name.starts_with(&label) {
        return SCORE_NAME_PREFIX;
    }
    if let Some(first) = words.first() {
        if label.starts_with(first) {
            return SCORE_LABEL_HAS_FIRST_WORD;
        }
    }
    if words.iter().any(|w| w.starts_with(&label)) || label.contains(&name) {
        return SCORE_CONTAINED;
    }
    0
}

/// Pick the single best-scoring person for `label`, or `None` when nothing
/// clears the threshold or the top score is tied.
pub fn match_person<'a>(label: &str, people: &'a [PersonRecord]) -> Option<&'a PersonRecord> {
    let mut best: Option<(&PersonRecord, u32)> = None;
    let mut tied = false;

    for person in people {
        let s = score(label, &person.name);
        if s < SCORE_THRESHOLD {
            continue;
        }
        match best {
            Some((_, bs)) if s > bs => {
                best = Some((person, s));
                tied = false;
            }
            Some((_, bs)) if s == bs => tied = true,
            Some(_) => {}
            None => best = Some((person, s)),
        }
    }

    match best {
        Some((person, s)) if !tied => {
            tracing::debug!(label = %label, matched = %person.name, score = s, "person matched");
            Some(person)
        }
        Some(_) => {
            tracing::warn!(label = %label, "ambiguous person label, skipping relation");
            None
        }
        None => {
            tracing::debug!(label = %label, "no person match");
            None
        }
    }
}
