//! Search orchestration: one research theme plus search conditions in,
//! relevance-ordered patent documents out.

mod engine;
mod error;
mod session;
mod state;

pub use engine::{SearchEngine, SearchOutcome, SearchWarning};
pub use error::SearchError;
pub use session::{PendingSearch, SearchSession};
pub use state::{SearchCycle, SearchState};

pub use patrank_ai::{EmbeddingProvider, RelevanceRanker};
pub use patrank_core::{Composition, RankedResult, ResultRow, SearchConditions};
pub use patrank_store::{CorpusBackend, ExecContext, QueryExecutor};
