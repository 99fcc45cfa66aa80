//! Smart tier router (C7): classifies requests, extracts Tier 1 template
//! parameters, and records routing outcomes.

pub mod router;
pub mod templates;

pub use router::{classify, escalate_after_tier2_failure, log_routing_outcome, RoutingDecision, Tier};
pub use templates::{try_match, ExtractedParams, Template};
