//! Byte-span splice edits against an immutable source string.
//!
//! The rewriter never mutates the tree it walks; it records insertions and
//! replacements keyed by byte offset and splices them in one pass at the end.
//! Statements the rules never touched keep their exact bytes.

/// A single pending edit. `start == end` is a pure insertion.
#[derive(Debug, Clone)]
pub struct Edit {
    pub start: usize,
    pub end: usize,
    pub text: String,
}

impl Edit {
    pub fn insert(at: usize, text: String) -> Self {
        Self {
            start: at,
            end: at,
            text,
        }
    }

    pub fn replace(start: usize, end: usize, text: String) -> Self {
        Self { start, end, text }
    }
}

/// Splice `edits` into `source`. Spans must not overlap. Edits sharing a start
/// offset are emitted in the order they were recorded; application walks the
/// stably sorted list back-to-front so earlier offsets stay valid.
pub fn apply_edits(source: &str, edits: &[Edit]) -> String {
    let mut ordered: Vec<&Edit> = edits.iter().collect();
    ordered.sort_by_key(|edit| edit.start);

    let mut out = source.to_string();
    for edit in ordered.iter().rev() {
        out.replace_range(edit.start..edit.end, &edit.text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insertions_at_same_offset_keep_recording_order() {
        let edits = vec![
            Edit::insert(1, "x".to_string()),
            Edit::insert(1, "y".to_string()),
        ];
        assert_eq!(apply_edits("ab", &edits), "axyb");
    }

    #[test]
    fn replacement_and_insertion_compose() {
        let edits = vec![
            Edit::replace(0, 3, "one".to_string()),
            Edit::insert(7, "!".to_string()),
        ];
        assert_eq!(apply_edits("1.. and 2", &edits), "one and! 2");
    }

    #[test]
    fn no_edits_is_identity() {
        assert_eq!(apply_edits("unchanged", &[]), "unchanged");
    }
}
