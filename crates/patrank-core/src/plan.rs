//! Parameterized query plans.
//!
//! A [`QueryPlan`] is query text with `@name` placeholders plus one typed
//! [`Binding`] per placeholder. Literal values never appear in the text.

use std::collections::{BTreeSet, HashMap};
use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::BuildError;

/// SQL dialect a plan was rendered for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// GoogleSQL against the public patents dataset.
    #[default]
    BigQuery,
    /// DuckDB over a local Parquet snapshot with flat columns.
    DuckDb,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ParamType {
    Int64,
    String,
    StringArray,
}

impl ParamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Int64 => "INT64",
            Self::String => "STRING",
            Self::StringArray => "ARRAY<STRING>",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ParamValue {
    Int64(i64),
    String(String),
    StringArray(Vec<String>),
}

impl ParamValue {
    pub fn param_type(&self) -> ParamType {
        match self {
            Self::Int64(_) => ParamType::Int64,
            Self::String(_) => ParamType::String,
            Self::StringArray(_) => ParamType::StringArray,
        }
    }
}

/// One `(name, type, value)` parameter binding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Binding {
    pub name: String,
    pub value: ParamValue,
}

impl Binding {
    pub fn new(name: impl Into<String>, value: ParamValue) -> Self {
        Self {
            name: name.into(),
            value,
        }
    }

    pub fn param_type(&self) -> ParamType {
        self.value.param_type()
    }
}

/// Scalar value for positional execution (arrays already expanded).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    Int64(i64),
    String(String),
}

/// A plan rendered with `?` placeholders, for drivers without named parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PositionalQuery {
    pub sql: String,
    pub values: Vec<ScalarValue>,
}

/// Query text plus its bindings. Construction verifies that the set of
/// placeholders and the set of binding names are identical.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QueryPlan {
    sql: String,
    bindings: Vec<Binding>,
    dialect: Dialect,
}

impl QueryPlan {
    pub fn new(
        sql: impl Into<String>,
        bindings: Vec<Binding>,
        dialect: Dialect,
    ) -> Result<Self, BuildError> {
        let plan = Self {
            sql: sql.into(),
            bindings,
            dialect,
        };
        plan.verify()?;
        Ok(plan)
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn bindings(&self) -> &[Binding] {
        &self.bindings
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn binding(&self, name: &str) -> Option<&Binding> {
        self.bindings.iter().find(|b| b.name == name)
    }

    /// Placeholder names in order of first appearance.
    pub fn placeholders(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        scan_placeholders(&self.sql)
            .into_iter()
            .map(|(range, _)| &self.sql[range])
            .filter(|name| seen.insert(*name))
            .collect()
    }

    /// Rewrite `@name` placeholders to `?`, expanding array bindings into one
    /// `?` per element.
    pub fn positional(&self) -> PositionalQuery {
        let by_name: HashMap<&str, &ParamValue> = self
            .bindings
            .iter()
            .map(|b| (b.name.as_str(), &b.value))
            .collect();

        let mut sql = String::with_capacity(self.sql.len());
        let mut values = Vec::new();
        let mut cursor = 0;

        for (range, at) in scan_placeholders(&self.sql) {
            let Some(value) = by_name.get(&self.sql[range.clone()]) else {
                continue;
            };
            sql.push_str(&self.sql[cursor..at]);
            match value {
                ParamValue::Int64(v) => {
                    sql.push('?');
                    values.push(ScalarValue::Int64(*v));
                }
                ParamValue::String(v) => {
                    sql.push('?');
                    values.push(ScalarValue::String(v.clone()));
                }
                ParamValue::StringArray(items) => {
                    let marks = vec!["?"; items.len()];
                    sql.push_str(&marks.join(", "));
                    values.extend(items.iter().cloned().map(ScalarValue::String));
                }
            }
            cursor = range.end;
        }
        sql.push_str(&self.sql[cursor..]);

        PositionalQuery { sql, values }
    }

    fn verify(&self) -> Result<(), BuildError> {
        let mut names = BTreeSet::new();
        for binding in &self.bindings {
            if !names.insert(binding.name.as_str()) {
                return Err(BuildError::Inconsistent(format!(
                    "binding @{} declared twice",
                    binding.name
                )));
            }
            if let ParamValue::StringArray(items) = &binding.value {
                if items.is_empty() {
                    return Err(BuildError::Inconsistent(format!(
                        "array binding @{} is empty",
                        binding.name
                    )));
                }
            }
        }

        let placeholders: BTreeSet<&str> = self.placeholders().into_iter().collect();
        if let Some(orphan) = placeholders.difference(&names).next() {
            return Err(BuildError::Inconsistent(format!(
                "placeholder @{orphan} has no binding"
            )));
        }
        if let Some(unused) = names.difference(&placeholders).next() {
            return Err(BuildError::Inconsistent(format!(
                "binding @{unused} is never referenced"
            )));
        }
        Ok(())
    }
}

/// Find `@name` placeholders outside quoted literals and identifiers.
///
/// Returns `(name range, position of '@')` pairs.
fn scan_placeholders(sql: &str) -> Vec<(Range<usize>, usize)> {
    let bytes = sql.as_bytes();
    let mut found = Vec::new();
    let mut quote: Option<u8> = None;
    let mut i = 0;

    while i < bytes.len() {
        let b = bytes[i];
        match quote {
            Some(q) => {
                if b == q {
                    quote = None;
                }
                i += 1;
            }
            None if b == b'\'' || b == b'`' || b == b'"' => {
                quote = Some(b);
                i += 1;
            }
            None if b == b'@'
                && bytes
                    .get(i + 1)
                    .is_some_and(|c| c.is_ascii_alphabetic() || *c == b'_') =>
            {
                let start = i + 1;
                let mut end = start;
                while end < bytes.len() && (bytes[end].is_ascii_alphanumeric() || bytes[end] == b'_')
                {
                    end += 1;
                }
                found.push((start..end, i));
                i = end;
            }
            None => i += 1,
        }
    }
    found
}
