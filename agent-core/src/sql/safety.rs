//! SQL safety screen.
//!
//! A data-driven pattern table applied to every candidate before execution.
//! Each rule names its kind and the reason reported when it fires, so the
//! screen is one uniform loop rather than a pile of special cases. The only
//! hand-written check is statement shape (must start with SELECT or WITH,
//! single statement only).

use lazy_static::lazy_static;
use regex::Regex;

/// Classification of a safety rule, reported alongside the reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RuleKind {
    HarmfulVerb,
    InjectionPattern,
    TimeProbe,
    FileAccess,
    CommentToken,
    SuspiciousLiteral,
    DangerousFunction,
}

/// One entry of the screen table.
pub struct SafetyRule {
    pub kind: RuleKind,
    pub pattern: &'static str,
    pub reason: &'static str,
}

/// The screen table. Order matters only for which reason gets reported
/// first; every rule is checked the same way.
pub const SAFETY_RULES: &[SafetyRule] = &[
    // Harmful verbs anywhere in the statement.
    SafetyRule {
        kind: RuleKind::HarmfulVerb,
        pattern: r"(?i)\b(drop|delete|insert|update|truncate|alter|exec|execute|grant|revoke|merge|replace)\b",
        reason: "harmful SQL verb",
    },
    // CREATE only counts when followed by a DDL object keyword, so column
    // names like created_at pass.
    SafetyRule {
        kind: RuleKind::HarmfulVerb,
        pattern: r"(?i)\bcreate\s+(table|database|index|view|procedure|function|trigger|role|user|schema)\b",
        reason: "harmful SQL verb: CREATE",
    },
    SafetyRule {
        kind: RuleKind::InjectionPattern,
        pattern: r"(?i)\bunion\s+select\b",
        reason: "UNION SELECT injection pattern",
    },
    SafetyRule {
        kind: RuleKind::InjectionPattern,
        pattern: r"(?i)\binformation_schema\b",
        reason: "system catalog access: information_schema",
    },
    SafetyRule {
        kind: RuleKind::InjectionPattern,
        pattern: r"(?i)\b(pg_|sqlite_|xp_|sp_)[a-z0-9_]*",
        reason: "system catalog or procedure prefix",
    },
    SafetyRule {
        kind: RuleKind::TimeProbe,
        pattern: r"(?i)\b(sleep|benchmark)\s*\(",
        reason: "time-based probe",
    },
    SafetyRule {
        kind: RuleKind::TimeProbe,
        pattern: r"(?i)\bwaitfor\s+delay\b",
        reason: "time-based probe: WAITFOR DELAY",
    },
    SafetyRule {
        kind: RuleKind::FileAccess,
        pattern: r"(?i)\bload_file\s*\(",
        reason: "file access: LOAD_FILE",
    },
    SafetyRule {
        kind: RuleKind::FileAccess,
        pattern: r"(?i)\binto\s+(outfile|dumpfile)\b",
        reason: "file write: INTO OUTFILE/DUMPFILE",
    },
    SafetyRule {
        kind: RuleKind::CommentToken,
        pattern: r"/\*|--|#",
        reason: "SQL comment token",
    },
    SafetyRule {
        kind: RuleKind::SuspiciousLiteral,
        pattern: r"(?i)\b0x[0-9a-f]+\b|\\x[0-9a-f]{2}",
        reason: "hexadecimal literal",
    },
    SafetyRule {
        kind: RuleKind::SuspiciousLiteral,
        pattern: r"(?i)\bb'[01]+'",
        reason: "binary literal",
    },
    // Dangerous function families, deduplicated: whole Oracle package
    // prefixes instead of per-function entries.
    SafetyRule {
        kind: RuleKind::DangerousFunction,
        pattern: r"(?i)\b(dbms|utl|sys|ctxsys|sdo)[._][a-z0-9_]*",
        reason: "dangerous vendor package",
    },
    SafetyRule {
        kind: RuleKind::DangerousFunction,
        pattern: r"(?i)\b(eval|extractvalue|updatexml|load_xml)\s*\(",
        reason: "dangerous function call",
    },
    SafetyRule {
        kind: RuleKind::DangerousFunction,
        pattern: r"(?i)\b(openrowset|opendatasource|openquery|cmdshell|shutdown)\b",
        reason: "dangerous server operation",
    },
    SafetyRule {
        kind: RuleKind::DangerousFunction,
        pattern: r"(?i)\b(bulk\s+insert|execute\s+as|backup\s+database|restore\s+database)\b",
        reason: "dangerous server operation",
    },
];

lazy_static! {
    static ref COMPILED_RULES: Vec<(usize, Regex)> = SAFETY_RULES
        .iter()
        .enumerate()
        .map(|(i, rule)| (i, Regex::new(rule.pattern).unwrap()))
        .collect();
}

/// Screen a candidate statement. `Ok(())` means it may be executed.
pub fn screen_sql(sql: &str) -> Result<(), String> {
    let trimmed = sql.trim();
    if trimmed.is_empty() {
        return Err("SQL query is empty".to_string());
    }

    // Statement must start with SELECT or WITH.
    let lowered = trimmed.to_ascii_lowercase();
    if !lowered.starts_with("select") && !lowered.starts_with("with") {
        return Err(
            "SQL query does not start with SELECT or WITH, which is required for safety"
                .to_string(),
        );
    }

    // Single statement only: at most one semicolon, and only at the end.
    let semicolons = trimmed.matches(';').count();
    if semicolons > 1 || (semicolons == 1 && !trimmed.ends_with(';')) {
        return Err("Multiple SQL statements detected; only one is allowed".to_string());
    }

    for (index, regex) in COMPILED_RULES.iter() {
        let rule = &SAFETY_RULES[*index];
        if let Some(m) = regex.find(trimmed) {
            return Err(format!(
                "Potentially dangerous SQL rejected ({}): {}",
                rule.reason,
                m.as_str().trim()
            ));
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_select_passes() {
        assert!(screen_sql("SELECT name, phone FROM contacts WHERE city = 'Oslo'").is_ok());
        assert!(screen_sql("WITH t AS (SELECT 1 AS x) SELECT x FROM t").is_ok());
        assert!(screen_sql("SELECT * FROM orders;").is_ok());
    }

    #[test]
    fn test_empty_query_is_rejected() {
        assert!(screen_sql("").is_err());
        assert!(screen_sql("   ").is_err());
    }

    #[test]
    fn test_non_select_is_rejected() {
        assert!(screen_sql("SHOW TABLES").is_err());
        assert!(screen_sql("DESCRIBE contacts").is_err());
    }

    #[test]
    fn test_harmful_verbs_are_rejected() {
        for sql in [
            "DROP TABLE contacts",
            "SELECT 1; DELETE FROM contacts",
            "SELECT * FROM t WHERE EXISTS (SELECT 1) UNION SELECT password FROM users",
            "INSERT INTO t VALUES (1)",
            "SELECT merge FROM t",
        ] {
            assert!(screen_sql(sql).is_err(), "expected rejection: {}", sql);
        }
    }

    #[test]
    fn test_created_at_column_is_allowed() {
        assert!(screen_sql("SELECT created_at FROM contacts").is_ok());
        assert!(screen_sql("SELECT create_at, name FROM contacts").is_ok());
        assert!(screen_sql("SELECT * FROM t WHERE create_at > '2024-01-01'").is_ok());
    }

    #[test]
    fn test_create_table_is_rejected() {
        assert!(screen_sql("SELECT 1 FROM t WHERE 1=1 OR 1=(SELECT 1); CREATE TABLE x (id int)").is_err());
        // CREATE with a DDL object keyword is rejected even mid-statement.
        assert!(screen_sql("WITH x AS (SELECT 1) CREATE VIEW v AS SELECT 1").is_err());
    }

    #[test]
    fn test_injection_patterns_are_rejected() {
        for sql in [
            "SELECT * FROM information_schema.tables",
            "SELECT * FROM pg_catalog.pg_tables",
            "SELECT * FROM sqlite_master",
            "SELECT xp_cmdshell('dir')",
            "SELECT * FROM t WHERE sleep(5)",
            "SELECT * FROM t WHERE 1=1 WAITFOR DELAY '0:0:5'",
            "SELECT benchmark(1000000, md5('x'))",
            "SELECT load_file('/etc/passwd')",
            "SELECT * FROM t INTO OUTFILE '/tmp/x'",
        ] {
            assert!(screen_sql(sql).is_err(), "expected rejection: {}", sql);
        }
    }

    #[test]
    fn test_comment_tokens_are_rejected() {
        assert!(screen_sql("SELECT 1 /* hidden */").is_err());
        assert!(screen_sql("SELECT 1 -- tail").is_err());
        assert!(screen_sql("SELECT 1 # tail").is_err());
    }

    #[test]
    fn test_suspicious_literals_are_rejected() {
        assert!(screen_sql("SELECT * FROM t WHERE id = 0x41424344").is_err());
        assert!(screen_sql("SELECT * FROM t WHERE b = b'1010'").is_err());
    }

    #[test]
    fn test_dangerous_functions_are_rejected() {
        for sql in [
            "SELECT dbms_xmlgen.getxml('x') FROM dual",
            "SELECT utl_http.request('http://x') FROM dual",
            "SELECT * FROM openrowset('SQLNCLI', 'x', 'y')",
            "SELECT eval('1+1')",
        ] {
            assert!(screen_sql(sql).is_err(), "expected rejection: {}", sql);
        }
    }

    #[test]
    fn test_multiple_statements_are_rejected() {
        assert!(screen_sql("SELECT 1; SELECT 2").is_err());
        assert!(screen_sql("SELECT 1;; ").is_err());
    }
}
