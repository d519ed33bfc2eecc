//! Output normalization and comparison.
//!
//! Comparison is exact after canonicalization: trailing whitespace per
//! line and fully blank lines are forgiven, token content, order and case
//! are not.

/// Canonicalize program output for comparison.
///
/// Trims the whole text, right-trims every line, drops blank lines and
/// rejoins with `\n`. Idempotent.
pub fn normalize(text: &str) -> String {
    text.trim()
        .lines()
        .map(str::trim_end)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join("\n")
}

/// Whether actual output matches the expected output after normalization.
pub fn outputs_match(actual: &str, expected: &str) -> bool {
    normalize(actual) == normalize(expected)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_is_idempotent() {
        let samples = [
            "",
            "1 2 3",
            "  a  \n\n b \r\n",
            "x\n\n\ny\n",
            "trailing spaces   \nmore\t\n",
        ];
        for s in samples {
            let once = normalize(s);
            assert_eq!(normalize(&once), once, "not idempotent for {s:?}");
        }
    }

    #[test]
    fn trailing_whitespace_and_blank_lines_compare_equal() {
        assert!(outputs_match("fl  \n\n", "fl"));
        assert!(outputs_match("1 2\n3 4   \n\n", "1 2\n3 4"));
        assert!(outputs_match("\n\nhello\n", "hello"));
    }

    #[test]
    fn token_differences_do_not_compare_equal() {
        assert!(!outputs_match("1 2", "2 1"));
        assert!(!outputs_match("Hello", "hello"));
        assert!(!outputs_match("3", "4"));
        // interior whitespace is significant
        assert!(!outputs_match("a  b", "a b"));
    }

    #[test]
    fn blank_line_between_content_is_dropped() {
        assert!(outputs_match("a\n\nb", "a\nb"));
    }

    #[test]
    fn empty_outputs_compare_equal() {
        assert!(outputs_match("", "  \n \n"));
    }
}
