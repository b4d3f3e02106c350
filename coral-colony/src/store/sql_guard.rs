//! The guarded raw-SQL read path.
//!
//! Operators and AI clients may run ad-hoc queries against the analytical
//! store, but only reads. The validator tokenizes the statement (string
//! literals skipped) and rejects anything that is not a single SELECT-like
//! statement before it reaches SQLite.

use super::ColonyDb;
use crate::error::{Error, ErrorKind, Result};
use sqlx::{Column, Row, TypeInfo, ValueRef};

/// Default row cap applied when the caller passes 0.
pub const DEFAULT_MAX_ROWS: u32 = 1000;

/// Result of a raw query: column names plus stringified rows.
#[derive(Debug, Clone, PartialEq)]
pub struct RawQueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
    /// True when the row cap cut the result short.
    pub truncated: bool,
}

/// Statement keywords that can write or alter state. Matching is by word
/// token, so a literal like `'delete me'` passes.
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "insert", "update", "delete", "replace", "drop", "alter", "create", "attach", "detach",
    "pragma", "vacuum", "reindex", "begin", "commit", "rollback", "savepoint", "release",
];

/// Reject anything that is not a single SELECT-like read.
pub fn validate_read_only(sql: &str) -> Result<()> {
    let tokens = word_tokens(sql);

    let first = tokens
        .first()
        .ok_or_else(|| Error::malformed("empty query"))?;

    if first != "select" && first != "with" {
        return Err(Error::with_cause(
            ErrorKind::MalformedRequest,
            format!("only SELECT queries are allowed, statement starts with {first:?}"),
        ));
    }

    for token in &tokens {
        if FORBIDDEN_KEYWORDS.contains(&token.as_str()) {
            return Err(Error::with_cause(
                ErrorKind::MalformedRequest,
                format!("forbidden keyword in read-only query: {token:?}"),
            ));
        }
    }

    if has_statement_separator(sql) {
        return Err(Error::malformed("multiple statements are not allowed"));
    }

    Ok(())
}

/// Lowercased word tokens outside of string literals.
fn word_tokens(sql: &str) -> Vec<String> {
    let mut tokens = Vec::new();
    let mut current = String::new();
    let mut literal: Option<char> = None;

    for c in sql.chars() {
        match literal {
            Some(quote) => {
                if c == quote {
                    literal = None;
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    literal = Some(c);
                } else if c.is_ascii_alphanumeric() || c == '_' {
                    current.push(c.to_ascii_lowercase());
                    continue;
                }
            }
        }
        if !current.is_empty() {
            tokens.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        tokens.push(current);
    }
    tokens
}

/// A `;` outside literals, ignoring a single trailing one.
fn has_statement_separator(sql: &str) -> bool {
    let mut literal: Option<char> = None;
    let trimmed = sql.trim_end();
    let body = trimmed.strip_suffix(';').unwrap_or(trimmed);

    for c in body.chars() {
        match literal {
            Some(quote) if c == quote => literal = None,
            Some(_) => {}
            None if c == '\'' || c == '"' => literal = Some(c),
            None if c == ';' => return true,
            None => {}
        }
    }
    false
}

impl ColonyDb {
    /// Run a validated read-only query with a row cap.
    ///
    /// `max_rows = 0` applies [DEFAULT_MAX_ROWS]; any value is clamped to
    /// `limit`.
    pub async fn execute_query(
        &self,
        sql: &str,
        max_rows: u32,
        limit: u32,
    ) -> Result<RawQueryResult> {
        validate_read_only(sql)?;

        let max_rows = if max_rows == 0 {
            DEFAULT_MAX_ROWS
        } else {
            max_rows
        }
        .min(limit);

        let body = sql.trim().trim_end_matches(';');
        // One extra row detects truncation without re-counting.
        let wrapped = format!("SELECT * FROM ({body}) LIMIT {}", max_rows as i64 + 1);

        let rows = sqlx::query(&wrapped)
            .fetch_all(self.pool())
            .await
            .map_err(|e| match e {
                // Bad user SQL (unknown table/column, syntax) keeps the
                // database message, which names the offending object.
                sqlx::Error::Database(db) => Error::malformed(db.message().to_string()),
                other => other.into(),
            })?;

        let columns: Vec<String> = rows
            .first()
            .map(|row| row.columns().iter().map(|c| c.name().to_string()).collect())
            .unwrap_or_default();

        let truncated = rows.len() > max_rows as usize;
        let mut out = Vec::with_capacity(rows.len().min(max_rows as usize));
        for row in rows.iter().take(max_rows as usize) {
            let mut values = Vec::with_capacity(row.columns().len());
            for i in 0..row.columns().len() {
                values.push(stringify_column(row, i)?);
            }
            out.push(values);
        }

        Ok(RawQueryResult {
            columns,
            rows: out,
            truncated,
        })
    }
}

fn stringify_column(row: &sqlx::sqlite::SqliteRow, index: usize) -> Result<String> {
    let raw = row.try_get_raw(index)?;
    if raw.is_null() {
        return Ok("NULL".to_string());
    }
    let type_name = raw.type_info().name().to_string();
    drop(raw);

    let value = match type_name.as_str() {
        "INTEGER" => row.try_get::<i64, _>(index)?.to_string(),
        "REAL" => row.try_get::<f64, _>(index)?.to_string(),
        "BLOB" => hex::encode(row.try_get::<Vec<u8>, _>(index)?),
        _ => row.try_get::<String, _>(index)?,
    };
    Ok(value)
}
