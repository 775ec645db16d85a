//! Statements and their parameters.

use crate::model::Value;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt::Write as _;
use std::sync::Arc;

/// A named parameter, e.g. `:title_3`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Parameter {
    pub name: String,
    pub value: Value,
}

impl Parameter {
    #[must_use]
    pub fn new(name: String, value: impl Into<Value>) -> Self {
        Self {
            name,
            value: value.into(),
        }
    }
}

/// SQL text plus the parameters bound to it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SqlCommand {
    pub sql: Arc<str>,
    pub parameters: Vec<Parameter>,
}

impl SqlCommand {
    #[must_use]
    pub fn new(sql: impl Into<Arc<str>>, parameters: Vec<Parameter>) -> Self {
        Self {
            sql: sql.into(),
            parameters,
        }
    }

    /// The statement with every parameter replaced by its literal value,
    /// for logs and dry runs.
    #[must_use]
    pub fn to_inline_sql(&self) -> String {
        let values: HashMap<&str, &Value> = self
            .parameters
            .iter()
            .map(|p| (p.name.as_str(), &p.value))
            .collect();

        let mut out = String::with_capacity(self.sql.len());
        let mut rest: &str = &self.sql;
        while let Some(pos) = rest.find(':') {
            out.push_str(&rest[..pos]);
            let tail = &rest[pos + 1..];
            let len = tail
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(tail.len());
            let name = &rest[pos..=pos + len];
            match values.get(name) {
                Some(value) if len > 0 => out.push_str(&value.to_sql_literal()),
                _ => out.push_str(name),
            }
            rest = &tail[len..];
        }
        out.push_str(rest);
        out
    }
}

/// Quote an identifier.
pub(crate) fn quote(ident: &str) -> String {
    format!("\"{}\"", ident.replace('"', "\"\""))
}

/// Parameter-name suffix of row `index` in a statement covering `rows` rows.
///
/// Single-row statements use bare names; multi-row statements append `_N`.
pub(crate) fn suffix(index: usize, rows: usize) -> String {
    if rows == 1 {
        String::new()
    } else {
        format!("_{index}")
    }
}

pub(crate) fn param(name: &str, suffix: &str) -> String {
    format!(":{name}{suffix}")
}

/// `(:a_0, :b_0), (:a_1, :b_1), ...` for `rows` rows of `names`.
pub(crate) fn values_rows(names: &[&str], rows: usize) -> String {
    let mut out = String::new();
    for row in 0..rows {
        if row > 0 {
            out.push_str(", ");
        }
        let sfx = suffix(row, rows);
        out.push('(');
        for (i, name) in names.iter().enumerate() {
            if i > 0 {
                out.push_str(", ");
            }
            let _ = write!(out, ":{name}{sfx}");
        }
        out.push(')');
    }
    out
}
