use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use patrank_core::{Dialect, QueryPlan, ResultRow};
use tracing::{error, info, warn};

use crate::ExecError;

/// Per-call execution context. Credentials travel here, never in globals.
#[derive(Clone)]
pub struct ExecContext {
    project_id: String,
    access_token: String,
    timeout: Option<Duration>,
}

impl ExecContext {
    pub fn new(project_id: impl Into<String>, access_token: impl Into<String>) -> Self {
        Self {
            project_id: project_id.into(),
            access_token: access_token.into(),
            timeout: None,
        }
    }

    /// Context for backends that need no credentials (local DuckDB).
    pub fn local() -> Self {
        Self::new("", "")
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

impl fmt::Debug for ExecContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ExecContext")
            .field("project_id", &self.project_id)
            .field("access_token", &"<redacted>")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// A patent corpus that can run a [`QueryPlan`].
///
/// Implementations return rows in the corpus's own order and classify every
/// failure into an [`ExecError`]. Zero matches is `Ok(vec![])`.
#[async_trait]
pub trait CorpusBackend: Send + Sync {
    /// Dialect the backend expects plans to be rendered in.
    fn dialect(&self) -> Dialect;

    async fn execute(
        &self,
        plan: &QueryPlan,
        ctx: &ExecContext,
    ) -> Result<Vec<ResultRow>, ExecError>;
}

/// Runs plans against a backend with dialect checking, a deadline and
/// diagnostics logging. Never retries.
#[derive(Clone)]
pub struct QueryExecutor {
    backend: Arc<dyn CorpusBackend>,
    default_timeout: Option<Duration>,
}

impl QueryExecutor {
    pub fn new(backend: Arc<dyn CorpusBackend>) -> Self {
        Self {
            backend,
            default_timeout: None,
        }
    }

    /// Deadline applied when the context carries none.
    pub fn with_default_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.default_timeout = timeout;
        self
    }

    pub fn dialect(&self) -> Dialect {
        self.backend.dialect()
    }

    pub async fn execute(
        &self,
        plan: &QueryPlan,
        ctx: &ExecContext,
    ) -> Result<Vec<ResultRow>, ExecError> {
        if plan.dialect() != self.backend.dialect() {
            return Err(ExecError::syntax(
                format!(
                    "plan rendered for {:?} but backend expects {:?}",
                    plan.dialect(),
                    self.backend.dialect()
                ),
                plan,
            ));
        }

        let result = match ctx.timeout().or(self.default_timeout) {
            Some(limit) => tokio::time::timeout(limit, self.backend.execute(plan, ctx))
                .await
                .unwrap_or_else(|_| {
                    Err(ExecError::Transient(format!(
                        "query did not finish within {limit:?}"
                    )))
                }),
            None => self.backend.execute(plan, ctx).await,
        };

        match &result {
            Ok(rows) => info!(rows = rows.len(), "query executed"),
            Err(ExecError::QuerySyntax {
                message,
                query,
                bindings,
            }) => error!(%message, %query, ?bindings, "backend rejected query"),
            Err(e) if e.is_retryable() => warn!(error = %e, "query failed transiently"),
            Err(e) => error!(error = %e, "query failed"),
        }
        result
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use patrank_core::{Composition, SearchConditions, build};

    use super::*;

    struct Scripted {
        dialect: Dialect,
        delay: Option<Duration>,
        reply: Mutex<Option<Result<Vec<ResultRow>, ExecError>>>,
    }

    impl Scripted {
        fn new(reply: Result<Vec<ResultRow>, ExecError>) -> Self {
            Self {
                dialect: Dialect::BigQuery,
                delay: None,
                reply: Mutex::new(Some(reply)),
            }
        }
    }

    #[async_trait]
    impl CorpusBackend for Scripted {
        fn dialect(&self) -> Dialect {
            self.dialect
        }

        async fn execute(
            &self,
            _plan: &QueryPlan,
            _ctx: &ExecContext,
        ) -> Result<Vec<ResultRow>, ExecError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.reply.lock().unwrap().take().unwrap_or(Ok(vec![]))
        }
    }

    fn plan(dialect: Dialect) -> QueryPlan {
        let conditions = SearchConditions::builder()
            .subject_keywords(["desalination"])
            .build()
            .unwrap();
        build(&conditions, Composition::Strict, dialect).unwrap()
    }

    #[tokio::test]
    async fn returns_backend_rows() {
        let rows = vec![ResultRow::new("US-1-A"), ResultRow::new("US-2-A")];
        let exec = QueryExecutor::new(Arc::new(Scripted::new(Ok(rows.clone()))));
        let out = exec
            .execute(&plan(Dialect::BigQuery), &ExecContext::new("p", "t"))
            .await
            .unwrap();
        assert_eq!(out, rows);
    }

    #[tokio::test]
    async fn rejects_plan_for_other_dialect() {
        let exec = QueryExecutor::new(Arc::new(Scripted::new(Ok(vec![]))));
        let err = exec
            .execute(&plan(Dialect::DuckDb), &ExecContext::local())
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::QuerySyntax { .. }));
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_is_transient() {
        let mut backend = Scripted::new(Ok(vec![]));
        backend.delay = Some(Duration::from_secs(10));
        let exec = QueryExecutor::new(Arc::new(backend));
        let ctx = ExecContext::new("p", "t").with_timeout(Duration::from_secs(1));
        let err = exec.execute(&plan(Dialect::BigQuery), &ctx).await.unwrap_err();
        assert!(err.is_retryable(), "got {err:?}");
    }

    #[tokio::test(start_paused = true)]
    async fn default_timeout_applies_without_context_deadline() {
        let mut backend = Scripted::new(Ok(vec![]));
        backend.delay = Some(Duration::from_secs(10));
        let exec = QueryExecutor::new(Arc::new(backend))
            .with_default_timeout(Some(Duration::from_millis(500)));
        let err = exec
            .execute(&plan(Dialect::BigQuery), &ExecContext::new("p", "t"))
            .await
            .unwrap_err();
        assert!(matches!(err, ExecError::Transient(_)));
    }

    #[tokio::test]
    async fn syntax_errors_pass_through_with_diagnostics() {
        let p = plan(Dialect::BigQuery);
        let exec = QueryExecutor::new(Arc::new(Scripted::new(Err(ExecError::syntax(
            "Unrecognized name: foo",
            &p,
        )))));
        let err = exec
            .execute(&p, &ExecContext::new("p", "t"))
            .await
            .unwrap_err();
        let ExecError::QuerySyntax { query, bindings, .. } = err else {
            panic!("expected QuerySyntax");
        };
        assert_eq!(query, p.sql());
        assert_eq!(bindings, p.bindings());
    }

    #[test]
    fn debug_redacts_token() {
        let ctx = ExecContext::new("proj", "ya29.secret");
        let dbg = format!("{ctx:?}");
        assert!(dbg.contains("proj"));
        assert!(!dbg.contains("ya29"));
    }
}
