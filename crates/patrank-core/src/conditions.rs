//! Typed search request: subject/predicate facets plus scalar filters.
//!
//! Validation happens once, when a [`SearchConditions`] is constructed (either
//! through [`SearchConditions::builder`] or by deserializing the raw shape).
//! After that the value is immutable.

use std::collections::BTreeSet;

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::ValidationError;

pub const DEFAULT_RESULT_LIMIT: u32 = 100;
pub const MIN_RESULT_LIMIT: u32 = 10;
pub const MAX_RESULT_LIMIT: u32 = 500;

/// Row cap for one search, bounded to `10..=500`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub struct ResultLimit(u32);

impl ResultLimit {
    pub fn new(limit: u32) -> Result<Self, ValidationError> {
        if !(MIN_RESULT_LIMIT..=MAX_RESULT_LIMIT).contains(&limit) {
            return Err(ValidationError::ResultLimitOutOfRange {
                limit,
                min: MIN_RESULT_LIMIT,
                max: MAX_RESULT_LIMIT,
            });
        }
        Ok(Self(limit))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl Default for ResultLimit {
    fn default() -> Self {
        Self(DEFAULT_RESULT_LIMIT)
    }
}

impl TryFrom<u32> for ResultLimit {
    type Error = ValidationError;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<ResultLimit> for u32 {
    fn from(limit: ResultLimit) -> Self {
        limit.0
    }
}

/// Inclusive publication-date bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DateRange {
    start: NaiveDate,
    end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self, ValidationError> {
        if start > end {
            return Err(ValidationError::InvertedDateRange { start, end });
        }
        Ok(Self { start, end })
    }

    pub fn start(&self) -> NaiveDate {
        self.start
    }

    pub fn end(&self) -> NaiveDate {
        self.end
    }
}

/// Encode a date the way the patent corpus stores it: `YYYYMMDD` as an integer.
pub fn to_yyyymmdd(date: NaiveDate) -> i64 {
    i64::from(date.year()) * 10_000 + i64::from(date.month()) * 100 + i64::from(date.day())
}

/// Inverse of [`to_yyyymmdd`]. The corpus uses `0` for "unknown".
pub fn from_yyyymmdd(value: i64) -> Option<NaiveDate> {
    if value <= 0 {
        return None;
    }
    let year = i32::try_from(value / 10_000).ok()?;
    let month = u32::try_from(value / 100 % 100).ok()?;
    let day = u32::try_from(value % 100).ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Wire shape of a search request, as produced by an upstream proposer or a
/// config file. Converted into [`SearchConditions`] through `TryFrom`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RawConditions {
    pub subject_keywords: Vec<String>,
    pub subject_class_codes: Vec<String>,
    pub predicate_keywords: Vec<String>,
    pub predicate_class_codes: Vec<String>,
    pub start_date: Option<NaiveDate>,
    pub end_date: Option<NaiveDate>,
    pub jurisdictions: Vec<String>,
    pub limit: u32,
}

impl Default for RawConditions {
    fn default() -> Self {
        Self {
            subject_keywords: Vec::new(),
            subject_class_codes: Vec::new(),
            predicate_keywords: Vec::new(),
            predicate_class_codes: Vec::new(),
            start_date: None,
            end_date: None,
            jurisdictions: Vec::new(),
            limit: DEFAULT_RESULT_LIMIT,
        }
    }
}

/// A validated search request.
///
/// Subject terms pin down *what* the invention is; predicate terms describe
/// *how/why* and are matched more loosely. How the facets combine is decided by
/// the [`Composition`](crate::Composition) passed to the query builder, not here.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawConditions", into = "RawConditions")]
pub struct SearchConditions {
    subject_keywords: Vec<String>,
    subject_class_codes: Vec<String>,
    predicate_keywords: Vec<String>,
    predicate_class_codes: Vec<String>,
    date_range: Option<DateRange>,
    jurisdictions: BTreeSet<String>,
    result_limit: ResultLimit,
}

impl SearchConditions {
    pub fn builder() -> SearchConditionsBuilder {
        SearchConditionsBuilder::default()
    }

    pub fn subject_keywords(&self) -> &[String] {
        &self.subject_keywords
    }

    pub fn subject_class_codes(&self) -> &[String] {
        &self.subject_class_codes
    }

    pub fn predicate_keywords(&self) -> &[String] {
        &self.predicate_keywords
    }

    pub fn predicate_class_codes(&self) -> &[String] {
        &self.predicate_class_codes
    }

    pub fn date_range(&self) -> Option<DateRange> {
        self.date_range
    }

    /// Upper-cased office codes. Empty means no country filter.
    pub fn jurisdictions(&self) -> &BTreeSet<String> {
        &self.jurisdictions
    }

    pub fn result_limit(&self) -> ResultLimit {
        self.result_limit
    }

    /// True when none of the four keyword/code groups has a usable term.
    pub fn is_empty(&self) -> bool {
        self.subject_keywords.is_empty()
            && self.subject_class_codes.is_empty()
            && self.predicate_keywords.is_empty()
            && self.predicate_class_codes.is_empty()
    }
}

impl TryFrom<RawConditions> for SearchConditions {
    type Error = ValidationError;

    fn try_from(raw: RawConditions) -> Result<Self, Self::Error> {
        let date_range = match (raw.start_date, raw.end_date) {
            (Some(start), Some(end)) => Some(DateRange::new(start, end)?),
            (None, None) => None,
            _ => return Err(ValidationError::UnpairedDateRange),
        };

        let jurisdictions = raw
            .jurisdictions
            .iter()
            .map(|code| normalize_jurisdiction(code))
            .collect::<Result<BTreeSet<_>, _>>()?;

        Ok(Self {
            subject_keywords: clean_terms(raw.subject_keywords),
            subject_class_codes: clean_terms(raw.subject_class_codes),
            predicate_keywords: clean_terms(raw.predicate_keywords),
            predicate_class_codes: clean_terms(raw.predicate_class_codes),
            date_range,
            jurisdictions,
            result_limit: ResultLimit::new(raw.limit)?,
        })
    }
}

impl From<SearchConditions> for RawConditions {
    fn from(conditions: SearchConditions) -> Self {
        Self {
            subject_keywords: conditions.subject_keywords,
            subject_class_codes: conditions.subject_class_codes,
            predicate_keywords: conditions.predicate_keywords,
            predicate_class_codes: conditions.predicate_class_codes,
            start_date: conditions.date_range.map(|r| r.start),
            end_date: conditions.date_range.map(|r| r.end),
            jurisdictions: conditions.jurisdictions.into_iter().collect(),
            limit: conditions.result_limit.get(),
        }
    }
}

fn clean_terms(terms: Vec<String>) -> Vec<String> {
    terms
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .collect()
}

fn normalize_jurisdiction(code: &str) -> Result<String, ValidationError> {
    let code = code.trim();
    if code.len() != 2 || !code.chars().all(|c| c.is_ascii_alphabetic()) {
        return Err(ValidationError::InvalidJurisdiction(code.to_string()));
    }
    Ok(code.to_ascii_uppercase())
}

/// In-code assembly of [`SearchConditions`]; `build` runs the same validation
/// as deserialization.
#[derive(Debug, Clone, Default)]
pub struct SearchConditionsBuilder {
    raw: RawConditions,
}

impl SearchConditionsBuilder {
    pub fn subject_keywords<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw.subject_keywords.extend(terms.into_iter().map(Into::into));
        self
    }

    pub fn subject_class_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw.subject_class_codes.extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn predicate_keywords<I, S>(mut self, terms: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw.predicate_keywords.extend(terms.into_iter().map(Into::into));
        self
    }

    pub fn predicate_class_codes<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw.predicate_class_codes.extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn date_range(mut self, start: NaiveDate, end: NaiveDate) -> Self {
        self.raw.start_date = Some(start);
        self.raw.end_date = Some(end);
        self
    }

    pub fn jurisdictions<I, S>(mut self, codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.raw.jurisdictions.extend(codes.into_iter().map(Into::into));
        self
    }

    pub fn result_limit(mut self, limit: u32) -> Self {
        self.raw.limit = limit;
        self
    }

    pub fn build(self) -> Result<SearchConditions, ValidationError> {
        SearchConditions::try_from(self.raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn date(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    #[test]
    fn defaults_to_hundred_rows_and_no_filters() {
        let c = SearchConditions::builder()
            .subject_keywords(["membrane"])
            .build()
            .unwrap();
        assert_eq!(c.result_limit().get(), 100);
        assert!(c.date_range().is_none());
        assert!(c.jurisdictions().is_empty());
        assert!(!c.is_empty());
    }

    #[test]
    fn result_limit_bounds() {
        assert!(ResultLimit::new(10).is_ok());
        assert!(ResultLimit::new(500).is_ok());
        assert_eq!(
            ResultLimit::new(9),
            Err(ValidationError::ResultLimitOutOfRange {
                limit: 9,
                min: 10,
                max: 500
            })
        );
        assert!(ResultLimit::new(501).is_err());
    }

    #[test]
    fn blank_terms_are_dropped() {
        let c = SearchConditions::builder()
            .subject_keywords(["  ", ""])
            .predicate_class_codes(["\t"])
            .build()
            .unwrap();
        assert!(c.is_empty());
    }

    #[test]
    fn terms_are_trimmed_and_keep_order() {
        let c = SearchConditions::builder()
            .subject_keywords([" sensor ", "Actuator"])
            .build()
            .unwrap();
        assert_eq!(c.subject_keywords(), ["sensor", "Actuator"]);
    }

    #[test]
    fn date_range_must_be_ordered() {
        let err = SearchConditions::builder()
            .subject_keywords(["x"])
            .date_range(date(2024, 1, 1), date(2023, 1, 1))
            .build()
            .unwrap_err();
        assert!(matches!(err, ValidationError::InvertedDateRange { .. }));
    }

    #[test]
    fn half_open_date_range_is_rejected() {
        let raw = RawConditions {
            subject_keywords: vec!["x".into()],
            start_date: Some(date(2020, 1, 1)),
            ..RawConditions::default()
        };
        assert_eq!(
            SearchConditions::try_from(raw),
            Err(ValidationError::UnpairedDateRange)
        );
    }

    #[test]
    fn jurisdictions_are_upper_cased_and_validated() {
        let c = SearchConditions::builder()
            .subject_keywords(["x"])
            .jurisdictions(["us", "JP", "us"])
            .build()
            .unwrap();
        assert_eq!(
            c.jurisdictions().iter().collect::<Vec<_>>(),
            vec!["JP", "US"]
        );

        let err = SearchConditions::builder()
            .subject_keywords(["x"])
            .jurisdictions(["USA"])
            .build()
            .unwrap_err();
        assert_eq!(err, ValidationError::InvalidJurisdiction("USA".into()));
    }

    #[test]
    fn deserialization_runs_validation() {
        let ok: SearchConditions = serde_json::from_str(
            r#"{"subject_keywords":["desalination"],"start_date":"2020-01-01","end_date":"2020-12-31","limit":50}"#,
        )
        .unwrap();
        assert_eq!(ok.result_limit().get(), 50);
        assert_eq!(ok.date_range().unwrap().end(), date(2020, 12, 31));

        let too_big = serde_json::from_str::<SearchConditions>(r#"{"limit":1000}"#);
        assert!(too_big.is_err());

        let unpaired = serde_json::from_str::<SearchConditions>(r#"{"end_date":"2020-01-01"}"#);
        assert!(unpaired.is_err());
    }

    #[test]
    fn serializes_back_to_raw_shape() {
        let c = SearchConditions::builder()
            .subject_keywords(["membrane"])
            .date_range(date(2019, 5, 1), date(2021, 5, 1))
            .jurisdictions(["ep"])
            .result_limit(20)
            .build()
            .unwrap();
        let json = serde_json::to_value(&c).unwrap();
        assert_eq!(json["start_date"], "2019-05-01");
        assert_eq!(json["jurisdictions"][0], "EP");
        assert_eq!(json["limit"], 20);
        let back: SearchConditions = serde_json::from_value(json).unwrap();
        assert_eq!(back, c);
    }

    #[test]
    fn yyyymmdd_encoding() {
        assert_eq!(to_yyyymmdd(date(2021, 3, 7)), 20210307);
        assert_eq!(from_yyyymmdd(20210307), Some(date(2021, 3, 7)));
        assert_eq!(from_yyyymmdd(0), None);
        assert_eq!(from_yyyymmdd(20211399), None);
    }
}
