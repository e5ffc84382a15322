//! Property recommendations derived from the conversation
//!
//! While a stream is live the server keeps refining a set of filter
//! criteria and matching properties for the session. This module polls
//! for them and keeps the latest non-empty result as a snapshot.

mod poller;
mod source;
mod types;

pub use poller::{PollOutcome, PollerConfig, PollerState, RecommendationPoller};
pub use source::{HttpRecommendationSource, RecommendationSource};
pub use types::{Amenities, Property, RecommendationResponse, RecommendationSnapshot};
