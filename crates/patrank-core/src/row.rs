//! Result rows as returned by a corpus backend, and their ranked form.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// One candidate patent document. Built once by the executor, never mutated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultRow {
    publication_number: String,
    title: Option<String>,
    #[serde(rename = "abstract")]
    abstract_text: Option<String>,
    assignee: Option<String>,
    publication_date: Option<NaiveDate>,
    classification: String,
}

impl ResultRow {
    pub fn new(publication_number: impl Into<String>) -> Self {
        Self {
            publication_number: publication_number.into(),
            title: None,
            abstract_text: None,
            assignee: None,
            publication_date: None,
            classification: String::new(),
        }
    }

    pub fn with_title(mut self, title: Option<String>) -> Self {
        self.title = title;
        self
    }

    pub fn with_abstract(mut self, abstract_text: Option<String>) -> Self {
        self.abstract_text = abstract_text;
        self
    }

    pub fn with_assignee(mut self, assignee: Option<String>) -> Self {
        self.assignee = assignee;
        self
    }

    pub fn with_publication_date(mut self, date: Option<NaiveDate>) -> Self {
        self.publication_date = date;
        self
    }

    /// Accepts a comma-separated code list and stores it as a display string
    /// (`"B01D61/02, C02F1/44"`).
    pub fn with_classification(mut self, codes: Option<&str>) -> Self {
        self.classification = codes
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .collect::<Vec<_>>()
            .join(", ");
        self
    }

    pub fn publication_number(&self) -> &str {
        &self.publication_number
    }

    pub fn title(&self) -> Option<&str> {
        self.title.as_deref()
    }

    pub fn abstract_text(&self) -> Option<&str> {
        self.abstract_text.as_deref()
    }

    pub fn assignee(&self) -> Option<&str> {
        self.assignee.as_deref()
    }

    pub fn publication_date(&self) -> Option<NaiveDate> {
        self.publication_date
    }

    /// Flattened display string of classification codes.
    pub fn classification(&self) -> &str {
        &self.classification
    }

    pub fn classification_codes(&self) -> impl Iterator<Item = &str> {
        self.classification.split(", ").filter(|c| !c.is_empty())
    }

    /// Text used to embed this document: title and abstract joined by one space.
    pub fn embedding_text(&self) -> String {
        format!(
            "{} {}",
            self.title.as_deref().unwrap_or_default(),
            self.abstract_text.as_deref().unwrap_or_default()
        )
    }
}

/// A row with its similarity to the research theme.
///
/// `score` is `None` when ranking was skipped or degraded; the row then keeps
/// the executor's position.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedResult {
    #[serde(flatten)]
    row: ResultRow,
    score: Option<f32>,
}

impl RankedResult {
    pub fn ranked(row: ResultRow, score: f32) -> Self {
        Self {
            row,
            score: Some(score),
        }
    }

    pub fn unranked(row: ResultRow) -> Self {
        Self { row, score: None }
    }

    pub fn row(&self) -> &ResultRow {
        &self.row
    }

    pub fn into_row(self) -> ResultRow {
        self.row
    }

    pub fn score(&self) -> Option<f32> {
        self.score
    }

    pub fn is_ranked(&self) -> bool {
        self.score.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classification_is_flattened_for_display() {
        let row = ResultRow::new("US-1234-A").with_classification(Some("B01D61/02,C02F1/44, ,"));
        assert_eq!(row.classification(), "B01D61/02, C02F1/44");
        assert_eq!(
            row.classification_codes().collect::<Vec<_>>(),
            vec!["B01D61/02", "C02F1/44"]
        );
        assert_eq!(ResultRow::new("x").classification_codes().count(), 0);
    }

    #[test]
    fn embedding_text_treats_missing_fields_as_empty() {
        let row = ResultRow::new("JP-1-A").with_title(Some("Membrane".into()));
        assert_eq!(row.embedding_text(), "Membrane ");
        let row = ResultRow::new("JP-2-A").with_abstract(Some("A filter.".into()));
        assert_eq!(row.embedding_text(), " A filter.");
        assert_eq!(ResultRow::new("JP-3-A").embedding_text(), " ");
    }

    #[test]
    fn ranked_result_serializes_flat() {
        let r = RankedResult::ranked(ResultRow::new("EP-1-A1").with_title(Some("T".into())), 0.5);
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["publication_number"], "EP-1-A1");
        assert_eq!(json["abstract"], serde_json::Value::Null);
        assert_eq!(json["score"], 0.5);
        assert!(!RankedResult::unranked(ResultRow::new("x")).is_ranked());
    }
}
