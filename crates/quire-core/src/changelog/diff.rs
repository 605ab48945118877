//! Line-based body diffs

use std::str::FromStr;

use diffy::Patch;

use crate::error::{Error, Result};

/// Unified diff turning `old` into `new`
pub fn compute_diff(old: &str, new: &str) -> String {
    diffy::create_patch(old, new).to_string()
}

/// Apply a diff produced by [`compute_diff`]. Fails as a whole when any hunk
/// does not match `base`.
pub fn apply_diff(base: &str, diff: &str) -> Result<String> {
    let patch = Patch::from_str(diff).map_err(|error| Error::Patch(error.to_string()))?;
    diffy::apply(base, &patch).map_err(|error| Error::Patch(error.to_string()))
}

/// Choose how to store a changed body: returns `(value, is_diff)`. The diff
/// is kept only when it encodes smaller than the full new body.
pub fn encode_body_change(old: &str, new: &str) -> (String, bool) {
    let diff = compute_diff(old, new);
    if diff.len() < new.len() {
        (diff, true)
    } else {
        (new.to_string(), false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn long_body(lines: usize) -> String {
        (0..lines)
            .map(|n| format!("line number {n} of a long note body"))
            .collect::<Vec<_>>()
            .join("\n")
    }

    #[test]
    fn apply_reverses_compute() {
        let pairs = [
            ("", "hello"),
            ("hello", ""),
            ("a\nb\nc\n", "a\nB\nc\n"),
            ("no trailing newline", "no trailing newline\nbut more lines"),
            ("x\ny\nz", "z\ny\nx\n"),
        ];
        for (old, new) in pairs {
            let diff = compute_diff(old, new);
            assert_eq!(apply_diff(old, &diff).unwrap(), new, "{old:?} -> {new:?}");
        }
    }

    #[test]
    fn small_edit_to_long_body_is_stored_as_diff() {
        let old = long_body(200);
        let new = old.replace("line number 100 ", "line number one hundred ");
        let (value, is_diff) = encode_body_change(&old, &new);
        assert!(is_diff);
        assert!(value.len() < new.len());
        assert_eq!(apply_diff(&old, &value).unwrap(), new);
    }

    #[test]
    fn rewrite_of_short_body_is_stored_as_snapshot() {
        let (value, is_diff) = encode_body_change("short", "entirely different");
        assert!(!is_diff);
        assert_eq!(value, "entirely different");
    }

    #[test]
    fn diff_against_wrong_base_fails() {
        let old = long_body(20);
        let new = old.replace("line number 10 ", "line ten ");
        let diff = compute_diff(&old, &new);
        let other_base = long_body(20).replace("line number 10 ", "something else ");
        assert!(matches!(apply_diff(&other_base, &diff), Err(Error::Patch(_))));
    }

    #[test]
    fn corrupted_diff_is_rejected() {
        let old = long_body(20);
        let new = old.replace("line number 10 ", "line ten ");
        let corrupted = compute_diff(&old, &new).replace("-line number 10 ", "-line number 99 ");
        assert!(matches!(apply_diff(&old, &corrupted), Err(Error::Patch(_))));
    }
}
