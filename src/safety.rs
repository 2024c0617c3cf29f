// ABOUTME: Predicate safety filter applied to every user-supplied WHERE clause
// ABOUTME: Whitelists comparisons and literals, rejects anything that could mutate state

use crate::errors::ExtractionError;
use unicode_normalization::UnicodeNormalization;

const DANGEROUS_SQL_KEYWORDS: &[&str] = &[
    "DROP", "DELETE", "TRUNCATE", "INSERT", "UPDATE", "ALTER", "CREATE", "RENAME", "GRANT",
    "REVOKE", "COMMIT", "ROLLBACK", "SAVEPOINT", "EXECUTE", "EXEC", "CALL", "SHUTDOWN", "COPY",
    "LOAD", "UNION",
];

const DANGEROUS_FUNCTIONS: &[&str] = &[
    "pg_sleep",
    "pg_cancel_backend",
    "pg_terminate_backend",
    "pg_read_file",
    "pg_read_binary_file",
    "pg_ls_dir",
    "lo_import",
    "lo_export",
    "dblink",
    "dblink_exec",
];

const MAX_WHERE_CLAUSE_LENGTH: usize = 10_000;

/// Strips single- and double-quoted string literals from `input`, replacing
/// each with a placeholder so keyword/function checks below don't false-positive
/// on a literal value that happens to contain a SQL keyword (e.g. `status = 'DROPPED'`).
fn strip_string_literals(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();
    while let Some(c) = chars.next() {
        if c == '\'' || c == '"' {
            let quote = c;
            out.push(' ');
            while let Some(&next) = chars.peek() {
                chars.next();
                if next == quote {
                    // handle doubled-quote escaping ('' inside a literal)
                    if chars.peek() == Some(&quote) {
                        chars.next();
                        continue;
                    }
                    break;
                }
            }
            out.push(' ');
        } else {
            out.push(c);
        }
    }
    out
}

/// Unicode NFKC normalization so a fullwidth or otherwise compatibility-
/// equivalent lookalike (e.g. `ＤＲＯＰ`) collapses to its canonical form
/// (`DROP`) before the keyword/function scans below, matching
/// `unicodedata.normalize("NFKC", where_clause)` in the original.
fn normalize(input: &str) -> String {
    input.nfkc().collect()
}

fn contains_word(haystack: &str, word: &str) -> bool {
    let upper = haystack.to_uppercase();
    let word = word.to_uppercase();
    let bytes = upper.as_bytes();
    let wbytes = word.as_bytes();
    let mut start = 0;
    while let Some(pos) = find_from(bytes, wbytes, start) {
        let before_ok = pos == 0 || !is_word_byte(bytes[pos - 1]);
        let after = pos + wbytes.len();
        let after_ok = after >= bytes.len() || !is_word_byte(bytes[after]);
        if before_ok && after_ok {
            return true;
        }
        start = pos + 1;
    }
    false
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

fn find_from(haystack: &[u8], needle: &[u8], from: usize) -> Option<usize> {
    if needle.is_empty() || from >= haystack.len() {
        return None;
    }
    haystack[from..]
        .windows(needle.len())
        .position(|w| w == needle)
        .map(|p| p + from)
}

/// Validates a WHERE clause predicate against the safety allowlist.
///
/// Rejects: dangerous DML/DDL keywords, dangerous server-side functions,
/// dollar-quoting, `E'...'` escape strings, subqueries, type casts (`::`),
/// semicolons, and comment sequences (`--`, `/*`, `*/`). String literals are
/// stripped before keyword matching so a literal value containing a
/// reserved word (e.g. `'DROPPED'`) does not trigger a false positive.
pub fn validate_where_clause(where_clause: &str, seed_str: &str) -> Result<(), ExtractionError> {
    let seed_display = if seed_str.is_empty() {
        where_clause.to_string()
    } else {
        seed_str.to_string()
    };

    if where_clause.len() > MAX_WHERE_CLAUSE_LENGTH {
        return Err(ExtractionError::UnsafePredicate {
            seed: seed_display,
            construct: "predicate exceeds maximum length".to_string(),
        });
    }

    let normalized = normalize(where_clause);
    let stripped = strip_string_literals(&normalized);

    if stripped.contains('$') {
        return Err(ExtractionError::UnsafePredicate {
            seed: seed_display,
            construct: "dollar-quoted string".to_string(),
        });
    }

    if has_escape_string_prefix(&normalized) {
        return Err(ExtractionError::UnsafePredicate {
            seed: seed_display,
            construct: "escape string literal (E'...')".to_string(),
        });
    }

    for keyword in DANGEROUS_SQL_KEYWORDS {
        if contains_word(&stripped, keyword) {
            return Err(ExtractionError::UnsafePredicate {
                seed: seed_display,
                construct: keyword.to_string(),
            });
        }
    }

    for func in DANGEROUS_FUNCTIONS {
        if contains_word(&stripped, func) {
            return Err(ExtractionError::UnsafePredicate {
                seed: seed_display,
                construct: format!("{}(...)", func),
            });
        }
    }

    if contains_word(&stripped, "SELECT") {
        return Err(ExtractionError::UnsafePredicate {
            seed: seed_display,
            construct: "subquery".to_string(),
        });
    }

    if stripped.contains("::") {
        return Err(ExtractionError::UnsafePredicate {
            seed: seed_display,
            construct: "type cast (::)".to_string(),
        });
    }

    if stripped.contains(';') {
        return Err(ExtractionError::UnsafePredicate {
            seed: seed_display,
            construct: "statement terminator (;)".to_string(),
        });
    }

    if stripped.contains("--") || stripped.contains("/*") || stripped.contains("*/") {
        return Err(ExtractionError::UnsafePredicate {
            seed: seed_display,
            construct: "comment sequence".to_string(),
        });
    }

    Ok(())
}

/// Detects a standalone `E'` or `e'` prefix (PostgreSQL escape-string
/// syntax), as distinct from a word ending in "e" immediately before a
/// closing quote (e.g. `'Pierre'`).
fn has_escape_string_prefix(input: &str) -> bool {
    let bytes = input.as_bytes();
    for (i, &b) in bytes.iter().enumerate() {
        if (b == b'E' || b == b'e') && bytes.get(i + 1) == Some(&b'\'') {
            let prev_is_word = i > 0 && is_word_byte(bytes[i - 1]);
            if !prev_is_word {
                return true;
            }
        }
    }
    false
}

pub const MAX_IDENTIFIER_LENGTH: usize = 63;

const RESERVED_KEYWORDS: &[&str] = &[
    "select", "insert", "update", "delete", "drop", "table", "from", "where", "and", "or",
];

/// Validates a bare SQL identifier (table or column name): must start with
/// a letter or underscore, contain only alphanumerics/underscores, be no
/// longer than 63 bytes, and not collide with a reserved keyword.
pub fn validate_identifier(identifier: &str, kind: &str) -> Result<(), ExtractionError> {
    if identifier.is_empty() {
        return Err(ExtractionError::InvalidSeed {
            seed: identifier.to_string(),
            reason: format!("{} name cannot be empty", kind),
        });
    }
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ExtractionError::InvalidSeed {
            seed: identifier.to_string(),
            reason: format!(
                "{} name exceeds {} characters",
                kind, MAX_IDENTIFIER_LENGTH
            ),
        });
    }
    let first = identifier.chars().next().unwrap();
    if !first.is_ascii_alphabetic() && first != '_' {
        return Err(ExtractionError::InvalidSeed {
            seed: identifier.to_string(),
            reason: format!("{} name must start with a letter or underscore", kind),
        });
    }
    if !identifier
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
    {
        return Err(ExtractionError::InvalidSeed {
            seed: identifier.to_string(),
            reason: format!(
                "{} name contains invalid characters (only letters, digits, _ and $ allowed)",
                kind
            ),
        });
    }
    if RESERVED_KEYWORDS.contains(&identifier.to_lowercase().as_str()) {
        return Err(ExtractionError::InvalidSeed {
            seed: identifier.to_string(),
            reason: format!("{} name '{}' is a reserved SQL keyword", kind, identifier),
        });
    }
    Ok(())
}

pub fn validate_table_name(name: &str) -> Result<(), ExtractionError> {
    validate_identifier(name, "table")
}

pub fn validate_column_name(name: &str) -> Result<(), ExtractionError> {
    validate_identifier(name, "column")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_simple_comparisons() {
        assert!(validate_where_clause("status = 'active'", "").is_ok());
        assert!(validate_where_clause("age >= 18 AND country = 'US'", "").is_ok());
        assert!(validate_where_clause("id IN (1, 2, 3)", "").is_ok());
    }

    #[test]
    fn literal_containing_keyword_is_allowed() {
        assert!(validate_where_clause("status = 'DROPPED'", "").is_ok());
    }

    #[test]
    fn rejects_drop_table() {
        let err = validate_where_clause("1=1; DROP TABLE users; --", "").unwrap_err();
        assert!(matches!(err, ExtractionError::UnsafePredicate { .. }));
    }

    #[test]
    fn rejects_subquery() {
        assert!(validate_where_clause(
            "id IN (SELECT id FROM admins)",
            ""
        )
        .is_err());
    }

    #[test]
    fn rejects_dangerous_function() {
        assert!(validate_where_clause("pg_sleep(10) = 0", "").is_err());
    }

    #[test]
    fn rejects_type_cast() {
        assert!(validate_where_clause("id::text = '1'", "").is_err());
    }

    #[test]
    fn rejects_comment_sequence() {
        assert!(validate_where_clause("id = 1 -- comment", "").is_err());
    }

    #[test]
    fn rejects_dollar_quoting() {
        assert!(validate_where_clause("id = $$evil$$", "").is_err());
    }

    #[test]
    fn rejects_fullwidth_keyword_lookalike() {
        let err = validate_where_clause("1=1; ＤＲＯＰ TABLE users;", "").unwrap_err();
        assert!(matches!(err, ExtractionError::UnsafePredicate { .. }));
    }

    #[test]
    fn rejects_fullwidth_semicolon() {
        assert!(validate_where_clause("id = 1\u{FF1B} DROP TABLE users", "").is_err());
    }

    #[test]
    fn rejects_semicolon() {
        assert!(validate_where_clause("id = 1; SELECT 1", "").is_err());
    }

    #[test]
    fn validates_identifiers() {
        assert!(validate_table_name("users").is_ok());
        assert!(validate_table_name("123users").is_err());
        assert!(validate_table_name("users; DROP TABLE x;").is_err());
        assert!(validate_column_name("select").is_err());
    }
}
