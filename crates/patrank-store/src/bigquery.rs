//! BigQuery REST backend for the public patents dataset.
//!
//! Runs `jobs.query` with named parameters, polls `getQueryResults` until the
//! job completes, and follows `pageToken` until all rows are read.

use std::time::Duration;

use async_trait::async_trait;
use patrank_core::config::BigQueryConfig;
use patrank_core::{Binding, Dialect, ParamValue, QueryPlan, ResultRow};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info};

use crate::rows::{ColumnIndex, row_from_cells};
use crate::{CorpusBackend, ExecContext, ExecError, StoreError};

pub struct BigQueryCorpus {
    client: reqwest::Client,
    endpoint: String,
    location: Option<String>,
    timeout_ms: u64,
    poll_interval: Duration,
}

impl BigQueryCorpus {
    pub fn from_config(cfg: &BigQueryConfig) -> Result<Self, StoreError> {
        // Request timeout leaves headroom over the server-side wait.
        let client = reqwest::Client::builder()
            .timeout(cfg.timeout() + Duration::from_secs(10))
            .build()?;
        Ok(Self {
            client,
            endpoint: cfg.endpoint.trim_end_matches('/').to_string(),
            location: cfg.location.clone(),
            timeout_ms: cfg.timeout_ms,
            poll_interval: cfg.poll_interval(),
        })
    }

    fn queries_url(&self, project: &str) -> String {
        format!("{}/projects/{project}/queries", self.endpoint)
    }

    async fn start(
        &self,
        plan: &QueryPlan,
        ctx: &ExecContext,
    ) -> Result<QueryResponse, ExecError> {
        let body = QueryRequest::new(plan, self.location.clone(), self.timeout_ms);
        let resp = self
            .client
            .post(self.queries_url(ctx.project_id()))
            .bearer_auth(ctx.access_token())
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(resp, plan).await
    }

    async fn fetch(
        &self,
        plan: &QueryPlan,
        ctx: &ExecContext,
        job: &JobReference,
        page_token: Option<&str>,
    ) -> Result<QueryResponse, ExecError> {
        let url = format!("{}/{}", self.queries_url(ctx.project_id()), job.job_id);
        let mut query: Vec<(&str, String)> = vec![("timeoutMs", self.timeout_ms.to_string())];
        if let Some(location) = job.location.as_ref().or(self.location.as_ref()) {
            query.push(("location", location.clone()));
        }
        if let Some(token) = page_token {
            query.push(("pageToken", token.to_string()));
        }
        let resp = self
            .client
            .get(url)
            .bearer_auth(ctx.access_token())
            .query(&query)
            .send()
            .await
            .map_err(transport_error)?;
        read_response(resp, plan).await
    }
}

#[async_trait]
impl CorpusBackend for BigQueryCorpus {
    fn dialect(&self) -> Dialect {
        Dialect::BigQuery
    }

    async fn execute(
        &self,
        plan: &QueryPlan,
        ctx: &ExecContext,
    ) -> Result<Vec<ResultRow>, ExecError> {
        if ctx.access_token().is_empty() {
            return Err(ExecError::Authentication("no access token supplied".into()));
        }
        if ctx.project_id().is_empty() {
            return Err(ExecError::Authentication("no project id supplied".into()));
        }

        let mut page = self.start(plan, ctx).await?;
        while !page.job_complete {
            let job = page
                .job_reference
                .clone()
                .ok_or_else(|| ExecError::Schema("incomplete job without jobReference".into()))?;
            debug!(job_id = %job.job_id, "query job still running");
            tokio::time::sleep(self.poll_interval).await;
            page = self.fetch(plan, ctx, &job, None).await?;
        }

        let mut index: Option<ColumnIndex> = None;
        let mut rows = Vec::new();
        loop {
            if index.is_none() {
                if let Some(schema) = &page.schema {
                    index = Some(ColumnIndex::resolve(
                        schema.fields.iter().map(|f| f.name.as_str()),
                    )?);
                }
            }
            if !page.rows.is_empty() {
                let index = index
                    .as_ref()
                    .ok_or_else(|| ExecError::Schema("rows returned without a schema".into()))?;
                for row in &page.rows {
                    rows.push(row_from_cells(index, &row.cells()?)?);
                }
            }

            let (Some(token), Some(job)) = (page.page_token.take(), page.job_reference.clone())
            else {
                break;
            };
            debug!(job_id = %job.job_id, fetched = rows.len(), "fetching next result page");
            page = self.fetch(plan, ctx, &job, Some(&token)).await?;
        }

        info!(rows = rows.len(), "bigquery query complete");
        Ok(rows)
    }
}

// ── Wire types ──

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryRequest {
    query: String,
    use_legacy_sql: bool,
    parameter_mode: &'static str,
    query_parameters: Vec<QueryParameter>,
    timeout_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    location: Option<String>,
}

impl QueryRequest {
    fn new(plan: &QueryPlan, location: Option<String>, timeout_ms: u64) -> Self {
        Self {
            query: plan.sql().to_string(),
            use_legacy_sql: false,
            parameter_mode: "NAMED",
            query_parameters: plan.bindings().iter().map(QueryParameter::from).collect(),
            timeout_ms,
            location,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct QueryParameter {
    name: String,
    parameter_type: ParameterType,
    parameter_value: ParameterValue,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterType {
    #[serde(rename = "type")]
    kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_type: Option<Box<ParameterType>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ParameterValue {
    #[serde(skip_serializing_if = "Option::is_none")]
    value: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    array_values: Option<Vec<ParameterValue>>,
}

impl ParameterValue {
    fn scalar(value: String) -> Self {
        Self {
            value: Some(value),
            array_values: None,
        }
    }
}

impl From<&Binding> for QueryParameter {
    fn from(binding: &Binding) -> Self {
        let scalar = |kind| ParameterType {
            kind,
            array_type: None,
        };
        let (parameter_type, parameter_value) = match &binding.value {
            ParamValue::Int64(v) => (scalar("INT64"), ParameterValue::scalar(v.to_string())),
            ParamValue::String(v) => (scalar("STRING"), ParameterValue::scalar(v.clone())),
            ParamValue::StringArray(items) => (
                ParameterType {
                    kind: "ARRAY",
                    array_type: Some(Box::new(scalar("STRING"))),
                },
                ParameterValue {
                    value: None,
                    array_values: Some(
                        items.iter().cloned().map(ParameterValue::scalar).collect(),
                    ),
                },
            ),
        };
        Self {
            name: binding.name.clone(),
            parameter_type,
            parameter_value,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct QueryResponse {
    job_complete: bool,
    job_reference: Option<JobReference>,
    schema: Option<TableSchema>,
    rows: Vec<TableRow>,
    page_token: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
struct JobReference {
    job_id: String,
    #[serde(default)]
    location: Option<String>,
}

#[derive(Debug, Deserialize)]
struct TableSchema {
    #[serde(default)]
    fields: Vec<FieldSchema>,
}

#[derive(Debug, Deserialize)]
struct FieldSchema {
    name: String,
}

#[derive(Debug, Deserialize)]
struct TableRow {
    #[serde(default)]
    f: Vec<TableCell>,
}

#[derive(Debug, Deserialize)]
struct TableCell {
    #[serde(default)]
    v: Value,
}

impl TableRow {
    /// Flat columns come back as strings or null.
    fn cells(&self) -> Result<Vec<Option<String>>, ExecError> {
        self.f
            .iter()
            .map(|cell| match &cell.v {
                Value::Null => Ok(None),
                Value::String(s) => Ok(Some(s.clone())),
                other => Err(ExecError::Schema(format!(
                    "expected a scalar cell, got {other}"
                ))),
            })
            .collect()
    }
}

#[derive(Debug, Default, Deserialize)]
struct ErrorEnvelope {
    #[serde(default)]
    error: ErrorBody,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorDetail>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    reason: String,
    #[serde(default)]
    message: String,
}

// ── Error classification ──

async fn read_response(resp: reqwest::Response, plan: &QueryPlan) -> Result<QueryResponse, ExecError> {
    let status = resp.status();
    if !status.is_success() {
        let body = resp.text().await.unwrap_or_default();
        return Err(classify_status(status, &body, plan));
    }
    resp.json::<QueryResponse>()
        .await
        .map_err(|e| ExecError::Schema(format!("malformed query response: {e}")))
}

fn transport_error(e: reqwest::Error) -> ExecError {
    if e.is_timeout() {
        ExecError::Transient(format!("request timed out: {e}"))
    } else if e.is_connect() {
        ExecError::Transient(format!("connection failed: {e}"))
    } else {
        ExecError::Transient(format!("request failed: {e}"))
    }
}

const TRANSIENT_REASONS: [&str; 4] = [
    "rateLimitExceeded",
    "quotaExceeded",
    "backendError",
    "internalError",
];

fn classify_status(status: StatusCode, body: &str, plan: &QueryPlan) -> ExecError {
    let envelope: ErrorEnvelope = serde_json::from_str(body).unwrap_or_default();
    let reasons: Vec<&str> = envelope.error.errors.iter().map(|e| e.reason.as_str()).collect();
    let message = error_message(&envelope.error, body, status);
    let transient_reason = reasons.iter().any(|r| TRANSIENT_REASONS.contains(r));

    match status {
        StatusCode::UNAUTHORIZED => ExecError::Authentication(message),
        StatusCode::FORBIDDEN if transient_reason => ExecError::Transient(message),
        StatusCode::FORBIDDEN => ExecError::Authentication(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => ExecError::Transient(message),
        s if s.is_server_error() => ExecError::Transient(message),
        _ if transient_reason => ExecError::Transient(message),
        _ => ExecError::syntax(message, plan),
    }
}

/// Join the per-error messages, falling back to the top-level message or raw body.
fn error_message(error: &ErrorBody, body: &str, status: StatusCode) -> String {
    let details: Vec<&str> = error
        .errors
        .iter()
        .map(|e| e.message.as_str())
        .filter(|m| !m.is_empty())
        .collect();
    if !details.is_empty() {
        details.join("; ")
    } else if !error.message.is_empty() {
        error.message.clone()
    } else if !body.trim().is_empty() {
        body.trim().to_string()
    } else {
        format!("HTTP {status}")
    }
}

#[cfg(test)]
mod tests {
    use chrono::NaiveDate;
    use patrank_core::{Composition, SearchConditions, build};
    use serde_json::json;

    use super::*;

    fn plan() -> QueryPlan {
        let conditions = SearchConditions::builder()
            .subject_keywords(["desalination"])
            .jurisdictions(["us", "JP"])
            .date_range(
                NaiveDate::from_ymd_opt(2015, 1, 1).unwrap(),
                NaiveDate::from_ymd_opt(2020, 12, 31).unwrap(),
            )
            .result_limit(50)
            .build()
            .unwrap();
        build(&conditions, Composition::Strict, Dialect::BigQuery).unwrap()
    }

    fn param<'a>(body: &'a Value, name: &str) -> &'a Value {
        body["queryParameters"]
            .as_array()
            .unwrap()
            .iter()
            .find(|p| p["name"] == name)
            .unwrap()
    }

    #[test]
    fn request_uses_named_standard_sql() {
        let body = serde_json::to_value(QueryRequest::new(&plan(), Some("US".into()), 30_000)).unwrap();
        assert_eq!(body["useLegacySql"], false);
        assert_eq!(body["parameterMode"], "NAMED");
        assert_eq!(body["timeoutMs"], 30_000);
        assert_eq!(body["location"], "US");
        assert!(body["query"].as_str().unwrap().contains("LIMIT @limit"));
    }

    #[test]
    fn request_encodes_typed_parameters() {
        let body = serde_json::to_value(QueryRequest::new(&plan(), None, 1)).unwrap();
        assert!(body.get("location").is_none());

        let limit = param(&body, "limit");
        assert_eq!(limit["parameterType"], json!({ "type": "INT64" }));
        assert_eq!(limit["parameterValue"], json!({ "value": "50" }));

        let start = param(&body, "start_date");
        assert_eq!(start["parameterValue"]["value"], "20150101");

        let kw = param(&body, "s_kw_0");
        assert_eq!(kw["parameterType"]["type"], "STRING");
        assert_eq!(kw["parameterValue"]["value"], "%desalination%");

        let countries = param(&body, "countries");
        assert_eq!(
            countries["parameterType"],
            json!({ "type": "ARRAY", "arrayType": { "type": "STRING" } })
        );
        assert_eq!(
            countries["parameterValue"],
            json!({ "arrayValues": [{ "value": "JP" }, { "value": "US" }] })
        );
    }

    #[test]
    fn parses_completed_response_rows() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "jobComplete": true,
            "jobReference": { "projectId": "p", "jobId": "job_1", "location": "US" },
            "schema": { "fields": [
                { "name": "publication_number", "type": "STRING" },
                { "name": "title", "type": "STRING" },
                { "name": "abstract", "type": "STRING" },
                { "name": "assignee", "type": "STRING" },
                { "name": "publication_date", "type": "INTEGER" },
                { "name": "ipc_codes", "type": "STRING" }
            ]},
            "rows": [
                { "f": [
                    { "v": "US-9999999-B2" }, { "v": "Brine concentrator" }, { "v": null },
                    { "v": "AQUA CORP" }, { "v": "20180306" }, { "v": "C02F1/04,B01D1/26" }
                ]}
            ],
            "totalRows": "1"
        }))
        .unwrap();
        assert!(resp.job_complete);
        assert!(resp.page_token.is_none());

        let fields = &resp.schema.as_ref().unwrap().fields;
        let index = ColumnIndex::resolve(fields.iter().map(|f| f.name.as_str())).unwrap();
        let row = row_from_cells(&index, &resp.rows[0].cells().unwrap()).unwrap();
        assert_eq!(row.publication_number(), "US-9999999-B2");
        assert_eq!(row.abstract_text(), None);
        assert_eq!(row.publication_date(), NaiveDate::from_ymd_opt(2018, 3, 6));
        assert_eq!(row.classification(), "C02F1/04, B01D1/26");
    }

    #[test]
    fn pending_response_has_no_rows() {
        let resp: QueryResponse = serde_json::from_value(json!({
            "jobComplete": false,
            "jobReference": { "projectId": "p", "jobId": "job_2" }
        }))
        .unwrap();
        assert!(!resp.job_complete);
        assert!(resp.rows.is_empty());
        assert_eq!(resp.job_reference.unwrap().job_id, "job_2");
    }

    #[test]
    fn nested_cell_is_schema_error() {
        let row: TableRow = serde_json::from_value(json!({ "f": [{ "v": [{ "v": "x" }] }] })).unwrap();
        assert!(matches!(row.cells(), Err(ExecError::Schema(_))));
    }

    fn error_body(code: u16, reason: &str, message: &str) -> String {
        json!({
            "error": {
                "code": code,
                "message": message,
                "errors": [{ "reason": reason, "message": message }]
            }
        })
        .to_string()
    }

    #[test]
    fn classifies_invalid_query_with_diagnostics() {
        let p = plan();
        let body = error_body(400, "invalidQuery", "Syntax error: Unexpected keyword AND at [12:3]");
        let err = classify_status(StatusCode::BAD_REQUEST, &body, &p);
        let ExecError::QuerySyntax { message, query, bindings } = err else {
            panic!("expected QuerySyntax, got {err:?}");
        };
        assert!(message.contains("Unexpected keyword AND"));
        assert_eq!(query, p.sql());
        assert_eq!(bindings.len(), p.bindings().len());
    }

    #[test]
    fn classifies_missing_table_as_query_error() {
        let body = error_body(404, "notFound", "Not found: Table patents-public-data:patents.nope");
        let err = classify_status(StatusCode::NOT_FOUND, &body, &plan());
        assert!(matches!(err, ExecError::QuerySyntax { .. }));
    }

    #[test]
    fn classifies_authentication_failures() {
        let p = plan();
        let err = classify_status(StatusCode::UNAUTHORIZED, "", &p);
        assert!(matches!(err, ExecError::Authentication(m) if m.contains("401")));

        let body = error_body(403, "accessDenied", "Access Denied: Project p");
        let err = classify_status(StatusCode::FORBIDDEN, &body, &p);
        assert!(matches!(err, ExecError::Authentication(_)));
    }

    #[test]
    fn classifies_transient_failures() {
        let p = plan();
        let quota = error_body(403, "quotaExceeded", "Quota exceeded");
        assert!(classify_status(StatusCode::FORBIDDEN, &quota, &p).is_retryable());
        assert!(classify_status(StatusCode::TOO_MANY_REQUESTS, "", &p).is_retryable());
        assert!(classify_status(StatusCode::SERVICE_UNAVAILABLE, "oops", &p).is_retryable());
        let backend = error_body(400, "backendError", "Backend error");
        assert!(classify_status(StatusCode::BAD_REQUEST, &backend, &p).is_retryable());
    }

    #[test]
    fn joins_multiple_error_messages() {
        let body = json!({
            "error": {
                "message": "top",
                "errors": [
                    { "reason": "invalid", "message": "first" },
                    { "reason": "invalid", "message": "second" }
                ]
            }
        })
        .to_string();
        let err = classify_status(StatusCode::BAD_REQUEST, &body, &plan());
        assert!(matches!(err, ExecError::QuerySyntax { message, .. } if message == "first; second"));
    }

    #[tokio::test]
    async fn missing_credentials_fail_before_any_request() {
        let corpus = BigQueryCorpus::from_config(&BigQueryConfig::default()).unwrap();
        let err = corpus
            .execute(&plan(), &ExecContext::new("project", ""))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Authentication(_)));

        let err = corpus
            .execute(&plan(), &ExecContext::new("", "token"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Authentication(_)));
    }
}
