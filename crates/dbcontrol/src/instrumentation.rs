//! Helpers for logging database operations.
//!
//! SQL text is recorded on `tracing` events only after sanitization, so
//! literal values never end up in logs by default.

/// Span names for admission-controlled operations.
pub mod span_names {
    /// Span name for a direct statement execution.
    pub const EXEC: &str = "dbcontrol.exec";
    /// Span name for a multi-row query.
    pub const QUERY: &str = "dbcontrol.query";
    /// Span name for a single-row query.
    pub const QUERY_ROW: &str = "dbcontrol.query_row";
    /// Span name for statement preparation.
    pub const PREPARE: &str = "dbcontrol.prepare";
    /// Span name for beginning a transaction.
    pub const BEGIN_TRANSACTION: &str = "dbcontrol.begin_transaction";
    /// Span name for a ping.
    pub const PING: &str = "dbcontrol.ping";
}

/// Configuration for SQL statement sanitization.
#[derive(Debug, Clone)]
pub struct SanitizationConfig {
    /// Whether to sanitize SQL statements.
    pub enabled: bool,
    /// Maximum length of statement to record.
    pub max_length: usize,
    /// Placeholder to use for sanitized values.
    pub placeholder: String,
}

impl Default for SanitizationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_length: 2048,
            placeholder: "?".to_string(),
        }
    }
}

impl SanitizationConfig {
    /// Create a configuration that doesn't sanitize statements.
    #[must_use]
    pub fn no_sanitization() -> Self {
        Self {
            enabled: false,
            max_length: usize::MAX,
            placeholder: String::new(),
        }
    }

    /// Sanitize a SQL statement according to the configuration.
    #[must_use]
    pub fn sanitize(&self, sql: &str) -> String {
        if !self.enabled {
            return truncate_string(sql, self.max_length);
        }

        let sanitized = sanitize_sql(sql, &self.placeholder);
        truncate_string(&sanitized, self.max_length)
    }
}

/// Replace string and numeric literals with a placeholder.
fn sanitize_sql(sql: &str, placeholder: &str) -> String {
    let mut result = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote: Option<char> = None;

    while let Some(c) = chars.next() {
        if let Some(q) = quote {
            if c == q {
                // Doubled quote is an escaped quote inside the literal.
                if chars.peek() == Some(&q) {
                    chars.next();
                    continue;
                }
                quote = None;
                result.push_str(placeholder);
            }
            continue;
        }

        if c == '\'' || c == '"' {
            quote = Some(c);
            continue;
        }

        if c.is_ascii_digit() && !result.ends_with(|ch: char| ch.is_alphanumeric() || ch == '_') {
            while chars
                .peek()
                .is_some_and(|ch| ch.is_ascii_digit() || *ch == '.')
            {
                chars.next();
            }
            result.push_str(placeholder);
            continue;
        }

        result.push(c);
    }

    // Unterminated literal.
    if quote.is_some() {
        result.push_str(placeholder);
    }

    result
}

/// Truncate a string to at most `max_len` bytes, on a char boundary.
fn truncate_string(s: &str, max_len: usize) -> String {
    if s.len() <= max_len {
        return s.to_string();
    }
    let mut end = max_len.saturating_sub(3);
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}...", &s[..end])
}

/// Extract the operation type from a SQL statement.
#[must_use]
pub fn extract_operation(sql: &str) -> &'static str {
    let head: String = sql
        .trim_start()
        .chars()
        .take(17)
        .collect::<String>()
        .to_ascii_uppercase();

    const PREFIXES: &[(&str, &str)] = &[
        ("SELECT", "SELECT"),
        ("WITH", "SELECT"),
        ("INSERT", "INSERT"),
        ("UPDATE", "UPDATE"),
        ("DELETE", "DELETE"),
        ("MERGE", "MERGE"),
        ("CALL", "CALL"),
        ("EXEC", "EXECUTE"),
        ("BEGIN", "BEGIN"),
        ("START TRANSACTION", "BEGIN"),
        ("COMMIT", "COMMIT"),
        ("ROLLBACK", "ROLLBACK"),
        ("CREATE", "CREATE"),
        ("ALTER", "ALTER"),
        ("DROP", "DROP"),
    ];

    PREFIXES
        .iter()
        .find(|(prefix, _)| head.starts_with(prefix))
        .map_or("OTHER", |(_, op)| op)
}
