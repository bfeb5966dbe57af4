//! Canonical fingerprint over stderr.
//!
//! Paths and digit runs are scrubbed before hashing so the same underlying
//! failure maps to one signature across temp-dir churn and line-number
//! drift, enabling exact-hit lookup of previously-authored fixes.

use once_cell::sync::Lazy;
use regex::Regex;
use sha1::{Digest, Sha1};

static POSIX_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?:/[\w.\-]+)+/?").expect("posix path pattern"));
static DRIVE_PATH: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"[A-Za-z]:\\[^\s'"]*"#).expect("drive path pattern"));
static DIGIT_RUN: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d+").expect("digit pattern"));
static WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern"));

const CLIP_CHARS: usize = 1024;

/// Stable hex fingerprint of a normalized stderr text.
pub fn error_signature(stderr: &str) -> String {
    let scrubbed = POSIX_PATH.replace_all(stderr, "");
    let scrubbed = DRIVE_PATH.replace_all(&scrubbed, "");
    let scrubbed = DIGIT_RUN.replace_all(&scrubbed, "N");
    let collapsed = WHITESPACE.replace_all(&scrubbed, " ");
    let normalized = collapsed.trim();
    let clipped: String = normalized.chars().take(CLIP_CHARS).collect();

    let mut hasher = Sha1::new();
    hasher.update(clipped.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stable_across_path_and_line_number_churn() {
        let first = "Traceback (most recent call last):\n  File \"/tmp/nf_a1b2/main.py\", line 12, in <module>\nNameError: name 'x' is not defined";
        let second = "Traceback (most recent call last):\n  File \"/var/folders/xy/nf_9z8/main.py\", line 97, in <module>\nNameError: name 'x' is not defined";
        assert_eq!(error_signature(first), error_signature(second));
    }

    #[test]
    fn stable_across_windows_paths() {
        let first = r#"error: cannot open C:\Users\a\build\main.c"#;
        let second = r#"error: cannot open D:\work\main.c"#;
        assert_eq!(error_signature(first), error_signature(second));
    }

    #[test]
    fn different_errors_get_different_signatures() {
        let name_error = "NameError: name 'x' is not defined";
        let type_error = "TypeError: unsupported operand type(s)";
        assert_ne!(error_signature(name_error), error_signature(type_error));
    }

    #[test]
    fn whitespace_variants_collapse() {
        assert_eq!(
            error_signature("error:   something  failed"),
            error_signature("error: something\n\tfailed")
        );
    }

    #[test]
    fn output_is_forty_hex_chars() {
        let sig = error_signature("panic");
        assert_eq!(sig.len(), 40);
        assert!(sig.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn long_inputs_are_clipped_before_hashing() {
        let prefix = "x".repeat(2000);
        let a = format!("{prefix}A");
        let b = format!("{prefix}B");
        // Both exceed the clip length, so the differing tail is ignored.
        assert_eq!(error_signature(&a), error_signature(&b));
    }
}
