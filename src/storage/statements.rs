//! Statement text helpers.

/// Normalize a multi-statement script before it reaches the engine.
///
/// Each line is trimmed; blank lines and whole-line `--` comments are
/// dropped. Interior whitespace is untouched so string literals survive.
#[must_use]
pub fn normalize_statements(script: &str) -> String {
    script
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with("--"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Quote an identifier for interpolation into DDL/DML.
#[must_use]
pub fn quote_identifier(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Case-insensitive ASCII search, returning the byte offset of the first match.
pub(crate) fn find_ignore_case(haystack: &str, needle: &str) -> Option<usize> {
    if needle.is_empty() || needle.len() > haystack.len() {
        return None;
    }
    let hay = haystack.as_bytes();
    let pat = needle.as_bytes();
    (0..=hay.len() - pat.len()).find(|&i| hay[i..i + pat.len()].eq_ignore_ascii_case(pat))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_drops_blank_and_comment_lines() {
        let script = "\n   CREATE TABLE t (id INTEGER);\n  -- seed\n\n  INSERT INTO t VALUES (1);   \n";
        assert_eq!(
            normalize_statements(script),
            "CREATE TABLE t (id INTEGER);\nINSERT INTO t VALUES (1);"
        );
    }

    #[test]
    fn test_normalize_keeps_literal_spacing() {
        let script = "  INSERT INTO t VALUES ('a   b');";
        assert_eq!(normalize_statements(script), "INSERT INTO t VALUES ('a   b');");
    }

    #[test]
    fn test_quote_identifier_escapes_quotes() {
        assert_eq!(quote_identifier("users"), "\"users\"");
        assert_eq!(quote_identifier("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_find_ignore_case() {
        assert_eq!(find_ignore_case("AFTER insert ON t", " on "), Some(12));
        assert_eq!(find_ignore_case("abc", "z"), None);
    }
}
