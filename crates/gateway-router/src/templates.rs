//! The closed set of Tier 1 parameterized request shapes (§4.7): top-N,
//! recent-N, breakdown-by-type, summary. Each template extracts integer or
//! time-window parameters via a fixed regex and clamps them — there is no
//! free-form parsing at this tier.

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Template {
    TopN,
    RecentN,
    BreakdownByType,
    Summary,
}

impl Template {
    pub fn name(&self) -> &'static str {
        match self {
            Template::TopN => "top_n",
            Template::RecentN => "recent_n",
            Template::BreakdownByType => "breakdown_by_type",
            Template::Summary => "summary",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExtractedParams {
    pub template: Template,
    pub n: Option<i64>,
    pub hours: Option<i64>,
}

static TOP_N_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\btop\s+(\d+)\b").unwrap());
static RECENT_N_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(?:last|past|recent)\s+(\d+)\s*(hour|hours|day|days)\b").unwrap());
static BREAKDOWN_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bbreakdown\s+by\s+(\w+)\b").unwrap());
static SUMMARY_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\b(summary|overview|how (is|are) .* doing)\b").unwrap());

const RECENT_N_HOURS_MIN: i64 = 1;
const RECENT_N_HOURS_MAX: i64 = 168;
const TOP_N_MIN: i64 = 1;
const TOP_N_MAX: i64 = 1000;

/// Attempts to match `text` against the closed Tier 1 template set,
/// clamping extracted parameters (e.g. `hours ∈ [1, 168]`, `n ∈ [1, 1000]`)
/// (§4.7, §8: "`n` > 1000 clamped to 1000").
pub fn try_match(text: &str) -> Option<ExtractedParams> {
    if let Some(caps) = TOP_N_RE.captures(text) {
        let n: i64 = caps.get(1)?.as_str().parse().ok()?;
        let n = n.clamp(TOP_N_MIN, TOP_N_MAX);
        return Some(ExtractedParams { template: Template::TopN, n: Some(n), hours: None });
    }
    if let Some(caps) = RECENT_N_RE.captures(text) {
        let raw: i64 = caps.get(1)?.as_str().parse().ok()?;
        let unit = caps.get(2)?.as_str().to_lowercase();
        let hours = if unit.starts_with("day") { raw * 24 } else { raw };
        let hours = hours.clamp(RECENT_N_HOURS_MIN, RECENT_N_HOURS_MAX);
        return Some(ExtractedParams { template: Template::RecentN, n: Some(raw), hours: Some(hours) });
    }
    if BREAKDOWN_RE.is_match(text) {
        return Some(ExtractedParams { template: Template::BreakdownByType, n: None, hours: None });
    }
    if SUMMARY_RE.is_match(text) {
        return Some(ExtractedParams { template: Template::Summary, n: None, hours: None });
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_top_n_and_extracts_count() {
        let params = try_match("show me the top 10 pages").unwrap();
        assert_eq!(params.template, Template::TopN);
        assert_eq!(params.n, Some(10));
    }

    #[test]
    fn clamps_top_n_above_one_thousand() {
        let params = try_match("show me the top 5000 pages").unwrap();
        assert_eq!(params.n, Some(1000));
    }

    #[test]
    fn clamps_recent_n_hours_to_one_week() {
        let params = try_match("what happened in the last 400 hours").unwrap();
        assert_eq!(params.hours, Some(168));
    }

    #[test]
    fn clamps_recent_n_hours_to_minimum() {
        let params = try_match("recent 0 hours").unwrap();
        assert_eq!(params.hours, Some(1));
    }

    #[test]
    fn no_match_for_free_form_narrative_request() {
        assert!(try_match("write me a report comparing Q1 to Q2 across all regions").is_none());
    }
}
