use std::time::Instant;

use regex::Regex;
use rusqlite::{params_from_iter, types::ToSql, Connection};
use tracing::debug;

use crate::{config::AccessorConfig, error::ForensicError, types::Value, Result};

/// Bind parameters for a query.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum QueryParams {
    #[default]
    None,
    Positional(Vec<Value>),
    /// Names may be given with or without the leading `:`.
    Named(Vec<(String, Value)>),
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct QueryResult {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    pub row_count: usize,
    /// More rows were available than the cap allowed.
    pub truncated: bool,
    pub execution_time_ms: f64,
}

/// Rejects anything other than a single, non-mutating statement.
#[derive(Debug, Clone)]
pub struct QueryValidator {
    forbidden: Option<Regex>,
}

impl QueryValidator {
    pub fn new(config: &AccessorConfig) -> Result<Self> {
        let keywords: Vec<String> = config
            .forbidden_keywords
            .iter()
            .filter(|k| !k.trim().is_empty())
            .map(|k| regex::escape(k.trim()))
            .collect();
        if keywords.is_empty() {
            return Ok(Self { forbidden: None });
        }
        let pattern = format!(r"(?i)\b({})\b", keywords.join("|"));
        let forbidden = Regex::new(&pattern).map_err(|e| {
            ForensicError::QueryValidationError(format!("bad forbidden keyword list: {e}"))
        })?;
        Ok(Self {
            forbidden: Some(forbidden),
        })
    }

    pub fn validate<'a>(&self, sql: &'a str) -> Result<&'a str> {
        let trimmed = sql.trim();
        if trimmed.is_empty() {
            return Err(ForensicError::QueryValidationError("empty query".into()));
        }
        // a single trailing semicolon is allowed
        let body = trimmed.strip_suffix(';').unwrap_or(trimmed);
        if body.contains(';') {
            return Err(ForensicError::QueryValidationError(
                "multiple statements are not allowed".into(),
            ));
        }
        if let Some(found) = self.forbidden.as_ref().and_then(|re| re.find(body)) {
            return Err(ForensicError::QueryValidationError(format!(
                "forbidden keyword: {}",
                found.as_str().to_uppercase()
            )));
        }
        Ok(trimmed)
    }
}

/// Quotes an identifier for interpolation into SQL.
pub fn quote_ident(name: &str) -> String {
    let escaped = name.replace('"', "\"\"");
    format!("\"{escaped}\"")
}

/// Runs a validated statement, keeping at most `max_rows` rows.
pub(crate) fn run_query(
    conn: &Connection,
    sql: &str,
    params: &QueryParams,
    max_rows: usize,
) -> Result<QueryResult> {
    let start = Instant::now();
    let mut stmt = conn.prepare(sql)?;
    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();

    let mut rows = match params {
        QueryParams::None => stmt.query([])?,
        QueryParams::Positional(values) => stmt.query(params_from_iter(values.iter()))?,
        QueryParams::Named(pairs) => {
            let names: Vec<String> = pairs
                .iter()
                .map(|(name, _)| {
                    if name.starts_with([':', '@', '$']) {
                        name.clone()
                    } else {
                        format!(":{name}")
                    }
                })
                .collect();
            let named: Vec<(&str, &dyn ToSql)> = names
                .iter()
                .zip(pairs)
                .map(|(name, (_, value))| (name.as_str(), value as &dyn ToSql))
                .collect();
            stmt.query(named.as_slice())?
        }
    };

    let mut out = Vec::new();
    let mut truncated = false;
    while let Some(row) = rows.next()? {
        if out.len() == max_rows {
            truncated = true;
            break;
        }
        let values = (0..columns.len())
            .map(|i| row.get_ref(i).map(Value::from))
            .collect::<rusqlite::Result<Vec<_>>>()?;
        out.push(values);
    }

    let execution_time_ms = start.elapsed().as_secs_f64() * 1000.0;
    debug!(rows = out.len(), truncated, execution_time_ms, "query finished");
    Ok(QueryResult {
        columns,
        row_count: out.len(),
        rows: out,
        truncated,
        execution_time_ms,
    })
}
