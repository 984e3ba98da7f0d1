//! Query builder: [`SearchConditions`] → [`QueryPlan`].
//!
//! The builder encodes the "fixed subject / relaxed predicate" strategy. Subject
//! terms are always required to match; predicate terms either narrow the subject
//! match further ([`Composition::Strict`]) or are pooled with the subject terms
//! into one wide OR ([`Composition::Pooled`]).
//!
//! # Clause shapes
//!
//! - keyword: case-insensitive substring match over title + abstract
//! - classification code: prefix match against any of the document's codes
//! - date range: `publication_date BETWEEN @start_date AND @end_date` (YYYYMMDD)
//! - jurisdiction: first two characters of the publication number in `@countries`
//!
//! Every literal is bound as a named parameter. The builder is pure: the same
//! conditions always produce the same text and the same parameter names.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::conditions::{SearchConditions, to_yyyymmdd};
use crate::plan::{Binding, Dialect, ParamValue, QueryPlan};
use crate::{BuildError, ValidationError};

/// How the predicate facet combines with the subject facet.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Composition {
    /// `subject AND (predicate keywords OR predicate codes)`.
    #[default]
    Strict,
    /// `(all keywords) OR (all codes)`, subject and predicate pooled.
    Pooled,
}

impl Composition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Strict => "strict",
            Self::Pooled => "pooled",
        }
    }
}

const BIGQUERY_TABLE: &str = "`patents-public-data.patents.publications`";
const DUCKDB_TABLE: &str = "publications";

/// Builds query plans for one dialect and composition.
#[derive(Debug, Clone, Copy, Default)]
pub struct QueryBuilder {
    dialect: Dialect,
    composition: Composition,
}

impl QueryBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            composition: Composition::default(),
        }
    }

    pub fn with_composition(mut self, composition: Composition) -> Self {
        self.composition = composition;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
    }

    pub fn composition(&self) -> Composition {
        self.composition
    }

    pub fn build(&self, conditions: &SearchConditions) -> Result<QueryPlan, BuildError> {
        build(conditions, self.composition, self.dialect)
    }
}

/// Build a plan for `conditions`.
///
/// Fails with [`ValidationError::EmptyConditions`] when all four term groups
/// are empty. An empty result set is never a build failure.
pub fn build(
    conditions: &SearchConditions,
    composition: Composition,
    dialect: Dialect,
) -> Result<QueryPlan, BuildError> {
    if conditions.is_empty() {
        return Err(ValidationError::EmptyConditions.into());
    }

    let mut binder = Binder::default();
    let mut clauses = Vec::new();

    if let Some(range) = conditions.date_range() {
        let start = binder.bind("start_date", ParamValue::Int64(to_yyyymmdd(range.start())));
        let end = binder.bind("end_date", ParamValue::Int64(to_yyyymmdd(range.end())));
        clauses.push(format!("p.publication_date BETWEEN {start} AND {end}"));
    }

    if !conditions.jurisdictions().is_empty() {
        let countries: Vec<String> = conditions.jurisdictions().iter().cloned().collect();
        let param = binder.bind("countries", ParamValue::StringArray(countries));
        clauses.push(country_clause(dialect, &param));
    }

    match composition {
        Composition::Strict => {
            let subject = all_of(vec![
                keyword_clause(
                    dialect,
                    &mut binder,
                    "s_kw",
                    &dedup_keywords(&[conditions.subject_keywords()]),
                ),
                code_clause(
                    dialect,
                    &mut binder,
                    "s_code",
                    &dedup_codes(&[conditions.subject_class_codes()]),
                ),
            ]);
            let predicate = any_of(vec![
                keyword_clause(
                    dialect,
                    &mut binder,
                    "p_kw",
                    &dedup_keywords(&[conditions.predicate_keywords()]),
                ),
                code_clause(
                    dialect,
                    &mut binder,
                    "p_code",
                    &dedup_codes(&[conditions.predicate_class_codes()]),
                ),
            ]);
            clauses.extend(subject);
            clauses.extend(predicate);
        }
        Composition::Pooled => {
            let keywords =
                dedup_keywords(&[conditions.subject_keywords(), conditions.predicate_keywords()]);
            let codes = dedup_codes(&[
                conditions.subject_class_codes(),
                conditions.predicate_class_codes(),
            ]);
            let pooled = any_of(vec![
                keyword_clause(dialect, &mut binder, "kw", &keywords),
                code_clause(dialect, &mut binder, "code", &codes),
            ]);
            clauses.extend(pooled);
        }
    }

    let limit = binder.bind(
        "limit",
        ParamValue::Int64(i64::from(conditions.result_limit().get())),
    );

    let where_sql = if clauses.is_empty() {
        String::new()
    } else {
        format!("\nWHERE\n  {}", clauses.join("\n  AND "))
    };

    let sql = format!("{}{where_sql}\nLIMIT {limit}", select_prefix(dialect));
    debug!(
        dialect = ?dialect,
        composition = composition.as_str(),
        bindings = binder.bindings.len(),
        "built query plan"
    );
    QueryPlan::new(sql, binder.bindings, dialect)
}

#[derive(Default)]
struct Binder {
    bindings: Vec<Binding>,
    counter: usize,
}

impl Binder {
    /// Bind under a fixed name; returns the placeholder text.
    fn bind(&mut self, name: &str, value: ParamValue) -> String {
        self.bindings.push(Binding::new(name, value));
        format!("@{name}")
    }

    /// Bind under `{prefix}_{n}` with a plan-wide counter.
    fn bind_next(&mut self, prefix: &str, value: ParamValue) -> String {
        let name = format!("{prefix}_{}", self.counter);
        self.counter += 1;
        self.bind(&name, value)
    }
}

/// Case-insensitive union of keyword groups, first spelling wins.
fn dedup_keywords<'a>(groups: &[&'a [String]]) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    groups
        .iter()
        .copied()
        .flat_map(|g| g.iter())
        .filter(|kw| seen.insert(kw.to_lowercase()))
        .map(String::as_str)
        .collect()
}

/// Case-sensitive union of code groups.
fn dedup_codes<'a>(groups: &[&'a [String]]) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    groups
        .iter()
        .copied()
        .flat_map(|g| g.iter())
        .map(String::as_str)
        .filter(|code| seen.insert(*code))
        .collect()
}

fn keyword_clause(
    dialect: Dialect,
    binder: &mut Binder,
    prefix: &str,
    keywords: &[&str],
) -> Option<String> {
    let parts: Vec<String> = keywords
        .iter()
        .map(|kw| {
            let pattern = format!("%{}%", escape_like(&kw.to_lowercase()));
            let param = binder.bind_next(prefix, ParamValue::String(pattern));
            match dialect {
                Dialect::BigQuery => format!("LOWER(p.search_text) LIKE {param}"),
                Dialect::DuckDb => format!(
                    "lower(coalesce(p.title, '') || ' ' || coalesce(p.abstract, '')) LIKE {param} ESCAPE '\\'"
                ),
            }
        })
        .collect();
    any_of(parts)
}

fn code_clause(
    dialect: Dialect,
    binder: &mut Binder,
    prefix: &str,
    codes: &[&str],
) -> Option<String> {
    let parts: Vec<String> = codes
        .iter()
        .map(|code| {
            let escaped = escape_like(code);
            match dialect {
                Dialect::BigQuery => {
                    let param = binder.bind_next(prefix, ParamValue::String(format!("{escaped}%")));
                    format!("EXISTS (SELECT 1 FROM UNNEST(p.ipc) AS ipc WHERE ipc.code LIKE {param})")
                }
                Dialect::DuckDb => {
                    let param =
                        binder.bind_next(prefix, ParamValue::String(format!("%,{escaped}%")));
                    format!("(',' || coalesce(p.ipc_codes, '')) LIKE {param} ESCAPE '\\'")
                }
            }
        })
        .collect();
    any_of(parts)
}

fn country_clause(dialect: Dialect, param: &str) -> String {
    match dialect {
        Dialect::BigQuery => format!("SUBSTR(p.publication_number, 1, 2) IN UNNEST({param})"),
        Dialect::DuckDb => format!("substr(p.publication_number, 1, 2) IN ({param})"),
    }
}

fn any_of(parts: Vec<impl Into<Option<String>>>) -> Option<String> {
    join(parts, " OR ")
}

fn all_of(parts: Vec<Option<String>>) -> Option<String> {
    join(parts, " AND ")
}

fn join(parts: Vec<impl Into<Option<String>>>, op: &str) -> Option<String> {
    let parts: Vec<String> = parts.into_iter().filter_map(Into::into).collect();
    match parts.len() {
        0 => None,
        _ => Some(format!("({})", parts.join(op))),
    }
}

/// Escape LIKE metacharacters so user terms match literally.
fn escape_like(term: &str) -> String {
    let mut out = String::with_capacity(term.len());
    for c in term.chars() {
        if matches!(c, '\\' | '%' | '_') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

fn select_prefix(dialect: Dialect) -> String {
    match dialect {
        Dialect::BigQuery => format!(
            "WITH PatentData AS (
  SELECT
    publication_number,
    (SELECT text FROM UNNEST(title_localized) WHERE language IN ('en', 'ja') LIMIT 1) AS title,
    (SELECT text FROM UNNEST(abstract_localized) WHERE language IN ('en', 'ja') LIMIT 1) AS abstract,
    (SELECT STRING_AGG(name) FROM UNNEST(assignee_harmonized)) AS assignee,
    publication_date,
    ipc,
    (SELECT STRING_AGG(code) FROM UNNEST(ipc)) AS ipc_codes,
    CONCAT(
      IFNULL((SELECT text FROM UNNEST(title_localized) WHERE language IN ('en', 'ja') LIMIT 1), ''), ' ',
      IFNULL((SELECT text FROM UNNEST(abstract_localized) WHERE language IN ('en', 'ja') LIMIT 1), '')
    ) AS search_text
  FROM
    {BIGQUERY_TABLE}
)
SELECT
  p.publication_number,
  p.title,
  p.abstract,
  p.assignee,
  p.publication_date,
  p.ipc_codes
FROM
  PatentData p"
        ),
        Dialect::DuckDb => format!(
            "SELECT
  p.publication_number,
  p.title,
  p.abstract,
  p.assignee,
  p.publication_date,
  p.ipc_codes
FROM
  {DUCKDB_TABLE} AS p"
        ),
    }
}
