//! Validation of caller-supplied SQL before it reaches a dataset store.
//!
//! Prefix/pattern based, not a statement parser: a query is accepted when
//! its trimmed, lowercased text starts with an allowed read prefix and the
//! raw text trips no blocked pattern. Blocked patterns are checked first
//! and apply regardless of prefix, which is what catches a destructive
//! second statement appended behind a semicolon.

use once_cell::sync::Lazy;
use regex::Regex;

/// Reported kind of an accepted query, returned as execution metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueryKind {
    Select,
    Cte,
    Pragma,
    Explain,
    CreateTemp,
}

impl QueryKind {
    pub fn as_str(self) -> &'static str {
        match self {
            QueryKind::Select => "select",
            QueryKind::Cte => "cte",
            QueryKind::Pragma => "pragma",
            QueryKind::Explain => "explain",
            QueryKind::CreateTemp => "create_temp",
        }
    }
}

struct BlockedPattern {
    pattern: Regex,
    unless: Option<Regex>,
    label: &'static str,
}

static ALLOWED_PREFIXES: Lazy<Vec<(Regex, QueryKind)>> = Lazy::new(|| {
    vec![
        (Regex::new(r"^select\b").unwrap(), QueryKind::Select),
        (Regex::new(r"^with\b").unwrap(), QueryKind::Cte),
        (Regex::new(r"^pragma\b").unwrap(), QueryKind::Pragma),
        (Regex::new(r"^explain\b").unwrap(), QueryKind::Explain),
        (
            Regex::new(r"^create\s+temp(orary)?\s+(table|view)\b").unwrap(),
            QueryKind::CreateTemp,
        ),
        (
            Regex::new(r"^drop\s+temp(orary)?\s+(table|view)\b").unwrap(),
            QueryKind::CreateTemp,
        ),
    ]
});

static BLOCKED_PATTERNS: Lazy<Vec<BlockedPattern>> = Lazy::new(|| {
    let rule = |pattern: &str, unless: Option<&str>, label: &'static str| BlockedPattern {
        pattern: Regex::new(pattern).unwrap(),
        unless: unless.map(|u| Regex::new(u).unwrap()),
        label,
    };
    vec![
        rule(r"\bdrop\s+table\b", None, "DROP TABLE"),
        rule(r"\bdrop\s+view\b", None, "DROP VIEW"),
        rule(r"\bdelete\s+from\b", None, "DELETE FROM"),
        rule(r"\bupdate\s+\S+\s+set\b", None, "UPDATE"),
        rule(
            r"\binsert\s+into\b",
            Some(r"\binsert\s+into\s+temp\."),
            "INSERT INTO",
        ),
        rule(r"\balter\s+table\b", None, "ALTER TABLE"),
        rule(r"\battach\s+database\b", None, "ATTACH DATABASE"),
        rule(r"\bdetach\s+database\b", None, "DETACH DATABASE"),
    ]
});

/// Validate and classify one query. `Err` carries the rejection reason.
pub fn classify(sql: &str) -> Result<QueryKind, String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err("Query is empty".to_string());
    }
    let lowered = trimmed.to_lowercase();

    for blocked in BLOCKED_PATTERNS.iter() {
        if blocked.pattern.is_match(&lowered)
            && !blocked
                .unless
                .as_ref()
                .is_some_and(|u| u.is_match(&lowered))
        {
            return Err(format!(
                "Query contains a blocked operation: {}. Only read queries and temporary objects are allowed.",
                blocked.label
            ));
        }
    }

    for (prefix, kind) in ALLOWED_PREFIXES.iter() {
        if prefix.is_match(&lowered) {
            return Ok(*kind);
        }
    }

    Err(
        "Query must start with SELECT, WITH, PRAGMA, EXPLAIN, or a temporary \
         table/view statement"
            .to_string(),
    )
}
