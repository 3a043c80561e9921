//! Fallback path: answers cache misses through the metered completion
//! service, under the token budget, and never with an empty result.

pub mod domain;
pub mod parse;
pub mod placeholder;
pub mod prompt;
pub mod responder;

pub use domain::Domain;
pub use parse::{parse_completion, ParsedResponse};
pub use placeholder::placeholder_rows;
pub use responder::{FallbackAnswer, FallbackOutcome, FallbackResponder};
