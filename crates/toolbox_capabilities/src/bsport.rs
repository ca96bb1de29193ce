//! `bsport.list_offers`: upcoming classes from the bsport booking API.
//!
//! The API lists offers newest first, so paging stops at the first offer that
//! starts before now.

use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use chrono::{DateTime, Duration, NaiveDateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};
use std::collections::HashSet;
use toolbox_core::DomainError;

/// Capability name
pub const NAME: &str = "bsport.list_offers";

/// Offer listing endpoint
pub const API_BASE: &str = "https://api.production.bsport.io/book/v1/offer/";

const ORDERING: &str = "-date_start";

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct OffersInput {
    /// bsport company id
    #[serde(default = "default_company")]
    pub company: u64,
    /// Window length in days; 0 means no upper bound
    #[serde(default = "default_days")]
    pub days: u32,
    /// Maximum offers returned; 0 means unlimited
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// Case-insensitive substrings of the activity name
    #[serde(default)]
    pub activity: Vec<String>,
    /// Coach ids, matched against `coach` and `coach_override`
    #[serde(default)]
    pub coach: Vec<i64>,
    /// Skip offers that are not bookable
    #[serde(default)]
    pub available_only: bool,
    /// Return API objects unmodified
    #[serde(default)]
    pub raw: bool,
}

fn default_company() -> u64 {
    995
}

fn default_days() -> u32 {
    7
}

fn default_limit() -> usize {
    50
}

impl Default for OffersInput {
    fn default() -> Self {
        Self {
            company: default_company(),
            days: default_days(),
            limit: default_limit(),
            activity: Vec::new(),
            coach: Vec::new(),
            available_only: false,
            raw: false,
        }
    }
}

/// Filters as applied
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AppliedFilters {
    /// Trimmed, non-empty activity terms
    pub activity: Vec<String>,
    /// Coach ids
    pub coach: Vec<i64>,
    /// Whether unavailable offers were skipped
    pub available_only: bool,
}

/// Output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OffersOutput {
    /// Company queried
    pub company: u64,
    /// Window start (now), RFC 3339
    pub range_start: String,
    /// Window end, RFC 3339; `None` when unbounded
    pub range_end: Option<String>,
    /// Filters as applied
    pub filters: AppliedFilters,
    /// Number of offers
    pub count: usize,
    /// Offers sorted by start time
    pub offers: Vec<Value>,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum BsportError {
    /// curl missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Fetch failed
    #[error("{0}")]
    Network(String),
    /// Response is not the JSON we expect
    #[error("invalid JSON response: {0}")]
    InvalidResponse(String),
    /// `links.next` revisits a page
    #[error("pagination loop detected at {0}")]
    PaginationLoop(String),
}

impl DomainError for BsportError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::Network(_) => "network_error",
            Self::InvalidResponse(_) => "invalid_response",
            Self::PaginationLoop(_) => "pagination_loop",
        }
    }
}

/// Source of API pages
pub trait JsonFetcher {
    /// Fetch and parse one page
    ///
    /// # Errors
    ///
    /// Returns `network_error` or `invalid_response`
    fn fetch(&self, url: &str) -> Result<Value, BsportError>;
}

/// Fetches with `curl -fsSL`
pub struct CurlFetcher<'a> {
    runner: &'a dyn CommandRunner,
}

impl<'a> CurlFetcher<'a> {
    /// Fetcher over `runner`
    ///
    /// # Errors
    ///
    /// Returns `dependency_error` if curl is missing
    pub fn new(runner: &'a dyn CommandRunner) -> Result<Self, BsportError> {
        process::require(runner, "curl")?;
        Ok(Self { runner })
    }
}

impl JsonFetcher for CurlFetcher<'_> {
    fn fetch(&self, url: &str) -> Result<Value, BsportError> {
        tracing::debug!(url, "fetching offers page");
        let output = process::run(self.runner, &CommandSpec::new("curl").args(["-fsSL", url]))?;
        if !output.success() {
            return Err(BsportError::Network(output.error_message("curl failed")));
        }
        serde_json::from_str(&output.stdout).map_err(|e| BsportError::InvalidResponse(e.to_string()))
    }
}

/// First page URL for `company`
#[must_use]
pub fn build_url(company: u64) -> String {
    format!("{API_BASE}?company={company}&ordering={ORDERING}")
}

/// Parse an API timestamp; naive values are taken as UTC
#[must_use]
pub fn parse_date(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(parsed) = DateTime::parse_from_rfc3339(value) {
        return Some(parsed.with_timezone(&Utc));
    }
    NaiveDateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f")
        .ok()
        .map(|naive| naive.and_utc())
}

fn start_of(offer: &Value) -> Option<DateTime<Utc>> {
    offer.get("date_start").and_then(Value::as_str).and_then(parse_date)
}

/// Stable subset of an API offer
#[must_use]
pub fn normalize_offer(offer: &Value) -> Value {
    let field = |key: &str| offer.get(key).cloned().unwrap_or(Value::Null);
    let effectif = offer.get("effectif").and_then(Value::as_i64);
    let validated = offer.get("validated_booking_count").and_then(Value::as_i64);
    let spots_left = match (effectif, validated) {
        (Some(total), Some(booked)) => json!((total - booked).max(0)),
        _ => Value::Null,
    };

    let mut out = Map::new();
    for key in [
        "id",
        "company",
        "activity_name",
        "date_start",
        "duration_minute",
        "timezone_name",
        "available",
        "full",
        "effectif",
        "validated_booking_count",
    ] {
        out.insert(key.to_string(), field(key));
    }
    out.insert("spots_left".to_string(), spots_left);
    for key in ["establishment", "coach", "meta_activity"] {
        out.insert(key.to_string(), field(key));
    }
    Value::Object(out)
}

struct Window<'a> {
    now: DateTime<Utc>,
    end: Option<DateTime<Utc>>,
    limit: Option<usize>,
    activity: &'a [String],
    coach: &'a [i64],
    available_only: bool,
}

impl Window<'_> {
    fn matches(&self, offer: &Value, start: DateTime<Utc>) -> bool {
        if self.end.is_some_and(|end| start > end) {
            return false;
        }
        if self.available_only && !offer.get("available").and_then(Value::as_bool).unwrap_or(false) {
            return false;
        }
        if !self.coach.is_empty() {
            let matches_coach = ["coach", "coach_override"].iter().any(|key| {
                offer
                    .get(*key)
                    .and_then(Value::as_i64)
                    .is_some_and(|id| self.coach.contains(&id))
            });
            if !matches_coach {
                return false;
            }
        }
        if !self.activity.is_empty() {
            let name = offer
                .get("activity_name")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_lowercase();
            if !self.activity.iter().any(|term| name.contains(&term.to_lowercase())) {
                return false;
            }
        }
        true
    }
}

fn collect(fetcher: &dyn JsonFetcher, company: u64, window: &Window<'_>) -> Result<Vec<Value>, BsportError> {
    let mut offers = Vec::new();
    let mut seen = HashSet::new();
    let mut next = Some(build_url(company));

    'pages: while let Some(url) = next.take() {
        if !seen.insert(url.clone()) {
            return Err(BsportError::PaginationLoop(url));
        }
        let page = fetcher.fetch(&url)?;
        if !page.is_object() {
            return Err(BsportError::InvalidResponse("expected a JSON object".to_string()));
        }

        let results = page.get("results").and_then(Value::as_array).cloned().unwrap_or_default();
        for offer in results {
            let Some(start) = start_of(&offer) else {
                continue;
            };
            if start < window.now {
                break 'pages;
            }
            if !window.matches(&offer, start) {
                continue;
            }
            offers.push(offer);
            if window.limit.is_some_and(|limit| offers.len() >= limit) {
                break 'pages;
            }
        }

        next = page
            .get("links")
            .and_then(|links| links.get("next"))
            .and_then(Value::as_str)
            .filter(|u| !u.is_empty())
            .map(str::to_string);
    }
    Ok(offers)
}

/// List offers as of `now`
///
/// # Errors
///
/// Returns a fetch, response, or pagination error
pub fn list_offers_at(
    fetcher: &dyn JsonFetcher,
    input: OffersInput,
    now: DateTime<Utc>,
) -> Result<OffersOutput, BsportError> {
    let activity: Vec<String> = input
        .activity
        .iter()
        .map(|term| term.trim().to_string())
        .filter(|term| !term.is_empty())
        .collect();
    let end = (input.days > 0).then(|| now + Duration::days(i64::from(input.days)));

    let window = Window {
        now,
        end,
        limit: (input.limit > 0).then_some(input.limit),
        activity: &activity,
        coach: &input.coach,
        available_only: input.available_only,
    };
    let mut offers = collect(fetcher, input.company, &window)?;
    offers.sort_by_key(|offer| start_of(offer).unwrap_or(DateTime::<Utc>::MAX_UTC));
    if !input.raw {
        offers = offers.iter().map(normalize_offer).collect();
    }

    let stamp = |t: DateTime<Utc>| t.to_rfc3339_opts(SecondsFormat::Secs, false);
    Ok(OffersOutput {
        company: input.company,
        range_start: stamp(now),
        range_end: end.map(stamp),
        filters: AppliedFilters {
            activity,
            coach: input.coach,
            available_only: input.available_only,
        },
        count: offers.len(),
        offers,
    })
}

/// List offers from the live API
///
/// # Errors
///
/// Returns `dependency_error` without curl, or any error of [`list_offers_at`]
pub fn list_offers(runner: &dyn CommandRunner, input: OffersInput) -> Result<OffersOutput, BsportError> {
    let fetcher = CurlFetcher::new(runner)?;
    list_offers_at(&fetcher, input, Utc::now())
}
