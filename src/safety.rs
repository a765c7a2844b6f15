//! Keyword screen applied before a generated statement reaches a database.
//!
//! This is a substring heuristic, not a parser: an identifier such as
//! `replace_log` trips the REPLACE rule, and FROM-less statements like
//! `SELECT 1` are refused.

use thiserror::Error;

pub const BLOCKED_KEYWORDS: [&str; 6] = ["DROP", "ALTER", "TRUNCATE", "DELETE", "CREATE", "REPLACE"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SafetyRejection {
    #[error("Forbidden operation detected in query.")]
    BlockedKeyword(&'static str),
    #[error("Query seems incomplete (missing FROM clause).")]
    MissingFrom,
}

/// Accepts the statement or names the first rule it breaks.
pub fn check_statement(sql: &str) -> Result<(), SafetyRejection> {
    let upper = sql.to_uppercase();

    if let Some(keyword) = BLOCKED_KEYWORDS.iter().copied().find(|k| upper.contains(k)) {
        return Err(SafetyRejection::BlockedKeyword(keyword));
    }

    if !upper.contains("FROM") {
        return Err(SafetyRejection::MissingFrom);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_select_passes() {
        assert_eq!(check_statement("SELECT * FROM t;"), Ok(()));
        assert_eq!(check_statement("select name from teachers where name like 'B%'"), Ok(()));
    }

    #[test]
    fn destructive_statements_are_blocked() {
        assert_eq!(check_statement("DROP TABLE t;"), Err(SafetyRejection::BlockedKeyword("DROP")));
        assert_eq!(
            check_statement("delete from users where id = 1"),
            Err(SafetyRejection::BlockedKeyword("DELETE"))
        );
        assert_eq!(
            check_statement("Truncate table logs"),
            Err(SafetyRejection::BlockedKeyword("TRUNCATE"))
        );
    }

    #[test]
    fn from_less_statements_are_incomplete() {
        assert_eq!(check_statement("UPDATE t SET x=1"), Err(SafetyRejection::MissingFrom));
        assert_eq!(check_statement("SELECT 1;"), Err(SafetyRejection::MissingFrom));
    }

    #[test]
    fn keyword_inside_identifier_still_blocks() {
        assert_eq!(
            check_statement("SELECT * FROM replace_me;"),
            Err(SafetyRejection::BlockedKeyword("REPLACE"))
        );
        assert_eq!(
            check_statement("SELECT created_at FROM orders;"),
            Err(SafetyRejection::BlockedKeyword("CREATE"))
        );
    }

    #[test]
    fn update_with_subquery_from_is_allowed() {
        assert_eq!(
            check_statement("UPDATE t SET x = (SELECT max(y) FROM u)"),
            Ok(())
        );
    }
}
