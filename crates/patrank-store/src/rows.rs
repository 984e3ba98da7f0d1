//! Mapping of backend result sets onto [`ResultRow`].
//!
//! Both backends return the six `publications` columns. A missing column, a
//! null publication number or a value of the wrong type is an
//! [`ExecError::Schema`].

use arrow::array::{Array, ArrayRef, AsArray};
use arrow::datatypes::{DataType, Date32Type, Int32Type, Int64Type};
use arrow::record_batch::RecordBatch;
use chrono::NaiveDate;
use patrank_core::conditions::from_yyyymmdd;
use patrank_core::{ResultRow, publications};

use crate::ExecError;

/// Positions of the six output columns within a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColumnIndex {
    publication_number: usize,
    title: usize,
    abstract_text: usize,
    assignee: usize,
    publication_date: usize,
    ipc_codes: usize,
}

impl ColumnIndex {
    pub fn resolve<'a>(names: impl IntoIterator<Item = &'a str>) -> Result<Self, ExecError> {
        let names: Vec<&str> = names.into_iter().collect();
        let find = |wanted: &str| {
            names
                .iter()
                .position(|n| *n == wanted)
                .ok_or_else(|| ExecError::Schema(format!("result set has no column {wanted:?}")))
        };
        Ok(Self {
            publication_number: find(publications::PUBLICATION_NUMBER)?,
            title: find(publications::TITLE)?,
            abstract_text: find(publications::ABSTRACT)?,
            assignee: find(publications::ASSIGNEE)?,
            publication_date: find(publications::PUBLICATION_DATE)?,
            ipc_codes: find(publications::IPC_CODES)?,
        })
    }
}

/// Map one row of textual cells (the BigQuery REST encoding) to a [`ResultRow`].
pub fn row_from_cells(
    index: &ColumnIndex,
    cells: &[Option<String>],
) -> Result<ResultRow, ExecError> {
    let publication_number = cell(cells, index.publication_number)?
        .ok_or_else(|| ExecError::Schema("publication_number is null".into()))?;
    let date = match cell(cells, index.publication_date)? {
        Some(raw) => parse_date(raw)?,
        None => None,
    };

    Ok(ResultRow::new(publication_number)
        .with_title(cell(cells, index.title)?.map(str::to_string))
        .with_abstract(cell(cells, index.abstract_text)?.map(str::to_string))
        .with_assignee(cell(cells, index.assignee)?.map(str::to_string))
        .with_publication_date(date)
        .with_classification(cell(cells, index.ipc_codes)?))
}

fn cell(cells: &[Option<String>], i: usize) -> Result<Option<&str>, ExecError> {
    cells.get(i).map(|c| c.as_deref()).ok_or_else(|| {
        ExecError::Schema(format!(
            "row has {} cells, expected at least {}",
            cells.len(),
            i + 1
        ))
    })
}

/// Accepts the corpus's `YYYYMMDD` integers and ISO dates.
fn parse_date(raw: &str) -> Result<Option<NaiveDate>, ExecError> {
    let raw = raw.trim();
    if let Ok(n) = raw.parse::<i64>() {
        return Ok(from_yyyymmdd(n));
    }
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map(Some)
        .map_err(|_| ExecError::Schema(format!("publication_date {raw:?} is not a date")))
}

/// Map Arrow record batches (the DuckDB encoding) to rows, in order.
pub fn rows_from_batches(batches: &[RecordBatch]) -> Result<Vec<ResultRow>, ExecError> {
    let mut rows = Vec::with_capacity(batches.iter().map(RecordBatch::num_rows).sum());
    for batch in batches {
        let schema = batch.schema();
        let index = ColumnIndex::resolve(schema.fields().iter().map(|f| f.name().as_str()))?;
        let column = |i: usize| batch.column(i);

        for i in 0..batch.num_rows() {
            let text = |col: usize, name: &str| string_at(column(col), i, name);
            let publication_number = text(index.publication_number, publications::PUBLICATION_NUMBER)?
                .ok_or_else(|| ExecError::Schema("publication_number is null".into()))?;
            let codes = text(index.ipc_codes, publications::IPC_CODES)?;
            rows.push(
                ResultRow::new(publication_number)
                    .with_title(text(index.title, publications::TITLE)?)
                    .with_abstract(text(index.abstract_text, publications::ABSTRACT)?)
                    .with_assignee(text(index.assignee, publications::ASSIGNEE)?)
                    .with_publication_date(date_at(column(index.publication_date), i)?)
                    .with_classification(codes.as_deref()),
            );
        }
    }
    Ok(rows)
}

fn string_at(col: &ArrayRef, i: usize, name: &str) -> Result<Option<String>, ExecError> {
    if col.is_null(i) {
        return Ok(None);
    }
    let value = match col.data_type() {
        DataType::Utf8 => col.as_string::<i32>().value(i),
        DataType::LargeUtf8 => col.as_string::<i64>().value(i),
        DataType::Utf8View => col.as_string_view().value(i),
        other => {
            return Err(ExecError::Schema(format!(
                "column {name} is {other}, expected a string"
            )));
        }
    };
    Ok(Some(value.to_string()))
}

fn date_at(col: &ArrayRef, i: usize) -> Result<Option<NaiveDate>, ExecError> {
    if col.is_null(i) {
        return Ok(None);
    }
    match col.data_type() {
        DataType::Int64 => Ok(from_yyyymmdd(col.as_primitive::<Int64Type>().value(i))),
        DataType::Int32 => Ok(from_yyyymmdd(i64::from(col.as_primitive::<Int32Type>().value(i)))),
        DataType::Date32 => Ok(col.as_primitive::<Date32Type>().value_as_date(i)),
        DataType::Utf8 => parse_date(col.as_string::<i32>().value(i)),
        other => Err(ExecError::Schema(format!(
            "column publication_date is {other}, expected YYYYMMDD integer"
        ))),
    }
}
