use std::sync::Arc;

use patrank_core::{Composition, SearchConditions};
use patrank_store::ExecContext;
use tokio::task::{AbortHandle, JoinHandle};
use tracing::info;

use crate::{SearchEngine, SearchError, SearchOutcome};

/// Caller-side search driver: remembers past research themes and keeps at
/// most one search in flight.
///
/// Submitting a new search aborts the previous one if it is still running;
/// its [`PendingSearch`] then resolves to [`SearchError::Superseded`]. Each
/// search owns its inputs, so an aborted one leaves nothing behind.
pub struct SearchSession {
    engine: Arc<SearchEngine>,
    history: Vec<String>,
    in_flight: Option<AbortHandle>,
}

/// Handle to a submitted search.
#[must_use = "a pending search does nothing unless awaited"]
pub struct PendingSearch {
    handle: JoinHandle<Result<SearchOutcome, SearchError>>,
}

impl PendingSearch {
    pub async fn wait(self) -> Result<SearchOutcome, SearchError> {
        match self.handle.await {
            Ok(result) => result,
            Err(e) if e.is_cancelled() => Err(SearchError::Superseded),
            Err(e) => std::panic::resume_unwind(e.into_panic()),
        }
    }
}

impl SearchSession {
    pub fn new(engine: Arc<SearchEngine>) -> Self {
        Self {
            engine,
            history: Vec::new(),
            in_flight: None,
        }
    }

    /// Themes submitted so far, oldest first.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    pub fn is_busy(&self) -> bool {
        self.in_flight.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Start a search on the runtime. `composition` falls back to the
    /// engine's default.
    pub fn submit(
        &mut self,
        theme: impl Into<String>,
        conditions: SearchConditions,
        composition: Option<Composition>,
        ctx: ExecContext,
    ) -> PendingSearch {
        self.cancel();

        let theme = theme.into();
        self.history.push(theme.clone());

        let engine = Arc::clone(&self.engine);
        let composition = composition.unwrap_or(engine.default_composition());
        let handle = tokio::spawn(async move {
            engine
                .search_with(&theme, &conditions, composition, &ctx)
                .await
        });
        self.in_flight = Some(handle.abort_handle());
        PendingSearch { handle }
    }

    /// Abort the in-flight search, if any. Returns whether one was running.
    pub fn cancel(&mut self) -> bool {
        let Some(handle) = self.in_flight.take() else {
            return false;
        };
        let running = !handle.is_finished();
        if running {
            info!("aborting superseded search");
        }
        handle.abort();
        running
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use async_trait::async_trait;
    use patrank_ai::{EmbeddingError, EmbeddingProvider};
    use patrank_core::{Dialect, QueryPlan, ResultRow};
    use patrank_store::{CorpusBackend, ExecError};

    use super::*;

    /// Sleeps for the first call only, so the first search can be superseded.
    struct SlowFirst {
        calls: std::sync::atomic::AtomicUsize,
    }

    #[async_trait]
    impl CorpusBackend for SlowFirst {
        fn dialect(&self) -> Dialect {
            Dialect::BigQuery
        }

        async fn execute(
            &self,
            _plan: &QueryPlan,
            _ctx: &ExecContext,
        ) -> Result<Vec<ResultRow>, ExecError> {
            let n = self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            if n == 0 {
                tokio::time::sleep(Duration::from_secs(60)).await;
            }
            Ok(vec![ResultRow::new(format!("DOC-{n}"))])
        }
    }

    struct Flat;

    #[async_trait]
    impl EmbeddingProvider for Flat {
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            Ok(texts.iter().map(|_| vec![1.0]).collect())
        }
    }

    fn session() -> SearchSession {
        let engine = SearchEngine::new(
            Arc::new(SlowFirst {
                calls: Default::default(),
            }),
            Arc::new(Flat),
        );
        SearchSession::new(Arc::new(engine))
    }

    fn conditions() -> SearchConditions {
        SearchConditions::builder()
            .subject_keywords(["desalination"])
            .build()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn new_submission_supersedes_in_flight_search() {
        let mut session = session();
        let first = session.submit("first", conditions(), None, ExecContext::local());
        tokio::task::yield_now().await;
        assert!(session.is_busy());

        let second = session.submit("second", conditions(), None, ExecContext::local());
        assert!(matches!(first.wait().await, Err(SearchError::Superseded)));

        let outcome = second.wait().await.unwrap();
        assert_eq!(outcome.results[0].row().publication_number(), "DOC-1");
        assert_eq!(session.history(), &["first".to_string(), "second".to_string()]);
    }

    #[tokio::test]
    async fn cancel_without_search_is_noop() {
        let mut session = session();
        assert!(!session.cancel());
        assert!(!session.is_busy());
    }

    #[tokio::test(start_paused = true)]
    async fn composition_override_is_used() {
        let mut session = session();
        // Burn the slow first call.
        let first = session.submit("warmup", conditions(), None, ExecContext::local());
        assert!(session.cancel());
        assert!(matches!(first.wait().await, Err(SearchError::Superseded)));

        let outcome = session
            .submit("pooled", conditions(), Some(Composition::Pooled), ExecContext::local())
            .wait()
            .await
            .unwrap();
        assert_eq!(outcome.composition, Composition::Pooled);
    }
}
