pub mod builder;
pub mod conditions;
pub mod config;
mod error;
pub mod plan;
pub mod row;
pub mod schema;
pub mod similarity;

pub use builder::{Composition, QueryBuilder, build};
pub use conditions::{DateRange, RawConditions, ResultLimit, SearchConditions};
pub use config::Config;
pub use error::{BuildError, ConfigError, ValidationError};
pub use plan::{Binding, Dialect, ParamType, ParamValue, PositionalQuery, QueryPlan, ScalarValue};
pub use row::{RankedResult, ResultRow};
pub use schema::publications;
pub use similarity::{cosine_similarity, rank_by_score, unranked};
