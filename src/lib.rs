pub mod answer;
pub mod chart;
pub mod config;
pub mod context_extractor;
pub mod decomposer;
pub mod dump_store;
pub mod error;
pub mod fallback;
pub mod llm;
pub mod metrics;
pub mod normalize;
pub mod pattern_matcher;
pub mod router;
pub mod token_budget;

pub use answer::{Answer, AnswerSource};
pub use config::RouterConfig;
pub use error::{CompletionError, Result, RouterError};
pub use router::QueryRouter;
