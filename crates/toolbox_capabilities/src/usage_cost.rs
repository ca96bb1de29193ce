//! `openai.calculate_usage_cost`: usage totals and estimated cost from an
//! OpenAI usage JSONL log.
//!
//! Only successful `openai_call` events count. Prices are supplied by the
//! caller.

use crate::paths;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use toolbox_core::DomainError;

/// Capability name
pub const NAME: &str = "openai.calculate_usage_cost";

const EVENT_TYPE: &str = "openai_call";
const STATUS_OK: &str = "ok";
const KIND_VISION: &str = "vision_slide";
const KIND_AUDIO: &str = "audio_transcription";

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct UsageInput {
    /// JSONL log, `~` expanded
    pub usage_log_path: String,
    /// Unit prices; totals only when absent or empty
    #[serde(default)]
    pub pricing: Option<Pricing>,
    /// Fail instead of listing models without a price
    #[serde(default = "default_fail_on_unknown")]
    pub fail_on_unknown_model: bool,
}

fn default_fail_on_unknown() -> bool {
    true
}

/// Caller-supplied price table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Pricing {
    /// Currency label, `USD` when absent
    #[serde(default)]
    pub currency: Option<String>,
    /// Per-model token prices
    #[serde(default)]
    pub token_models: BTreeMap<String, TokenPrice>,
    /// Per-model audio prices
    #[serde(default)]
    pub audio_models: BTreeMap<String, AudioPrice>,
}

impl Pricing {
    /// No currency and no prices
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.currency.is_none() && self.token_models.is_empty() && self.audio_models.is_empty()
    }
}

/// Price per million tokens
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TokenPrice {
    /// Input tokens
    pub input_per_1m: f64,
    /// Output tokens
    pub output_per_1m: f64,
}

/// Price per audio minute
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AudioPrice {
    /// Per minute of audio
    pub per_minute: f64,
}

/// Prices applied to a line item
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(untagged)]
pub enum UnitPrices {
    /// Token pricing
    Tokens(TokenPrice),
    /// Audio pricing
    Audio(AudioPrice),
}

/// Line item kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LineKind {
    /// Token usage
    Tokens,
    /// Transcribed audio
    AudioMinutes,
}

/// Totals for one model
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineItem {
    /// Model name
    pub model: String,
    /// Usage kind
    pub kind: LineKind,
    /// Successful calls
    pub calls: u64,
    /// Input tokens
    pub input_tokens: u64,
    /// Output tokens
    pub output_tokens: u64,
    /// Total tokens
    pub total_tokens: u64,
    /// Transcribed seconds
    pub audio_seconds: f64,
    /// Transcribed minutes
    pub audio_minutes: f64,
    /// Prices used, when priced
    pub unit_prices: Option<UnitPrices>,
    /// Cost, when priced
    pub cost: Option<f64>,
}

/// Grand totals
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageSummary {
    /// Input tokens across models
    pub total_input_tokens: u64,
    /// Output tokens across models
    pub total_output_tokens: u64,
    /// Total tokens
    pub total_tokens: u64,
    /// Audio seconds across models
    pub total_audio_seconds: f64,
    /// Audio minutes across models
    pub total_audio_minutes: f64,
}

/// Output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UsageReport {
    /// Currency label
    pub currency: String,
    /// Sum of priced line items; `None` without pricing
    pub total_cost: Option<f64>,
    /// Grand totals
    pub summary: UsageSummary,
    /// Token models first, then audio models, each sorted by model
    pub line_items: Vec<LineItem>,
    /// Models with no price, sorted
    pub unknown_models: Vec<String>,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum UsageError {
    /// Log file does not exist
    #[error("usage log not found: {0}")]
    NotFound(String),
    /// Log could not be read or parsed
    #[error("{0}")]
    InvalidLog(String),
    /// A model has no price and unknown models are fatal
    #[error("missing {kind} pricing for model: {model}")]
    MissingPricing {
        /// `token` or `audio`
        kind: &'static str,
        /// Model name
        model: String,
    },
}

impl DomainError for UsageError {
    fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "usage_log_not_found",
            Self::InvalidLog(_) => "invalid_usage_log",
            Self::MissingPricing { .. } => "missing_pricing",
        }
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct TokenTotals {
    calls: u64,
    input: u64,
    output: u64,
    total: u64,
}

#[derive(Debug, Default, Clone, Copy)]
struct AudioTotals {
    calls: u64,
    seconds: f64,
}

/// Parse a JSONL log, skipping blank lines
///
/// # Errors
///
/// Returns `invalid_usage_log` naming the first unparsable line
pub fn parse_events(text: &str) -> Result<Vec<Value>, UsageError> {
    let mut events = Vec::new();
    for (idx, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event = serde_json::from_str(line)
            .map_err(|e| UsageError::InvalidLog(format!("invalid JSON on line {}: {e}", idx + 1)))?;
        events.push(event);
    }
    Ok(events)
}

fn as_u64(value: Option<&Value>) -> u64 {
    match value {
        Some(Value::Number(n)) => n
            .as_u64()
            .or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64))
            .unwrap_or(0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
        _ => 0,
    }
}

fn as_f64(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => s.trim().parse().unwrap_or(0.0),
        _ => 0.0,
    }
}

fn successful_calls<'a>(events: &'a [Value], kind: &'a str) -> impl Iterator<Item = &'a Value> {
    events.iter().filter(move |ev| {
        ev.get("type").and_then(Value::as_str) == Some(EVENT_TYPE)
            && ev.get("status").and_then(Value::as_str) == Some(STATUS_OK)
            && ev.get("kind").and_then(Value::as_str) == Some(kind)
    })
}

fn model_of(event: &Value) -> String {
    event
        .get("model")
        .and_then(Value::as_str)
        .unwrap_or_default()
        .trim()
        .to_string()
}

fn token_totals(events: &[Value]) -> BTreeMap<String, TokenTotals> {
    let mut out: BTreeMap<String, TokenTotals> = BTreeMap::new();
    for event in successful_calls(events, KIND_VISION) {
        let usage = event.get("usage");
        let field = |key: &str| as_u64(usage.and_then(|u| u.get(key)));
        let (input, output) = (field("input_tokens"), field("output_tokens"));
        let total = match field("total_tokens") {
            0 => input.saturating_add(output),
            n => n,
        };
        let entry = out.entry(model_of(event)).or_default();
        entry.calls += 1;
        entry.input = entry.input.saturating_add(input);
        entry.output = entry.output.saturating_add(output);
        entry.total = entry.total.saturating_add(total);
    }
    out
}

fn saturating_sum(values: impl Iterator<Item = u64>) -> u64 {
    values.fold(0, u64::saturating_add)
}

fn audio_totals(events: &[Value]) -> BTreeMap<String, AudioTotals> {
    let mut out: BTreeMap<String, AudioTotals> = BTreeMap::new();
    for event in successful_calls(events, KIND_AUDIO) {
        let seconds = as_f64(event.get("meta").and_then(|m| m.get("audio_seconds")));
        let entry = out.entry(model_of(event)).or_default();
        entry.calls += 1;
        entry.seconds += seconds;
    }
    out
}

/// Summarize already-parsed events
///
/// # Errors
///
/// Returns `missing_pricing` when pricing is given, a model has no price, and
/// `fail_on_unknown_model` is set. An empty price table counts as no pricing.
pub fn summarize_events(
    events: &[Value],
    pricing: Option<&Pricing>,
    fail_on_unknown_model: bool,
) -> Result<UsageReport, UsageError> {
    let pricing = pricing.filter(|p| !p.is_empty());
    let tokens = token_totals(events);
    let audio = audio_totals(events);

    let mut total_cost = pricing.map(|_| 0.0);
    let mut unknown = BTreeSet::new();
    let mut line_items = Vec::with_capacity(tokens.len() + audio.len());

    let mut unpriced = |kind: &'static str, model: &str| {
        if fail_on_unknown_model {
            return Err(UsageError::MissingPricing {
                kind,
                model: model.to_string(),
            });
        }
        unknown.insert(model.to_string());
        Ok(())
    };

    for (model, totals) in &tokens {
        let mut item = LineItem {
            model: model.clone(),
            kind: LineKind::Tokens,
            calls: totals.calls,
            input_tokens: totals.input,
            output_tokens: totals.output,
            total_tokens: totals.total,
            audio_seconds: 0.0,
            audio_minutes: 0.0,
            unit_prices: None,
            cost: None,
        };
        if let Some(pricing) = pricing {
            match pricing.token_models.get(model) {
                Some(price) => {
                    let cost = (totals.input as f64 / 1_000_000.0) * price.input_per_1m
                        + (totals.output as f64 / 1_000_000.0) * price.output_per_1m;
                    item.unit_prices = Some(UnitPrices::Tokens(*price));
                    item.cost = Some(cost);
                    total_cost = total_cost.map(|t| t + cost);
                }
                None => unpriced("token", model)?,
            }
        }
        line_items.push(item);
    }

    for (model, totals) in &audio {
        let minutes = totals.seconds / 60.0;
        let mut item = LineItem {
            model: model.clone(),
            kind: LineKind::AudioMinutes,
            calls: totals.calls,
            input_tokens: 0,
            output_tokens: 0,
            total_tokens: 0,
            audio_seconds: totals.seconds,
            audio_minutes: minutes,
            unit_prices: None,
            cost: None,
        };
        if let Some(pricing) = pricing {
            match pricing.audio_models.get(model) {
                Some(price) => {
                    let cost = minutes * price.per_minute;
                    item.unit_prices = Some(UnitPrices::Audio(*price));
                    item.cost = Some(cost);
                    total_cost = total_cost.map(|t| t + cost);
                }
                None => unpriced("audio", model)?,
            }
        }
        line_items.push(item);
    }

    let total_audio_seconds: f64 = audio.values().map(|a| a.seconds).sum();
    let summary = UsageSummary {
        total_input_tokens: saturating_sum(tokens.values().map(|t| t.input)),
        total_output_tokens: saturating_sum(tokens.values().map(|t| t.output)),
        total_tokens: saturating_sum(tokens.values().map(|t| t.total)),
        total_audio_seconds,
        total_audio_minutes: total_audio_seconds / 60.0,
    };

    Ok(UsageReport {
        currency: pricing
            .and_then(|p| p.currency.clone())
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "USD".to_string()),
        total_cost,
        summary,
        line_items,
        unknown_models: unknown.into_iter().collect(),
    })
}

/// Read the log and summarize it
///
/// # Errors
///
/// Returns `usage_log_not_found`, `invalid_usage_log` or `missing_pricing`
pub fn calculate_usage_cost(input: UsageInput) -> Result<UsageReport, UsageError> {
    let path = paths::expand_home(&input.usage_log_path);
    if !path.is_file() {
        return Err(UsageError::NotFound(path.display().to_string()));
    }
    let text = std::fs::read_to_string(&path)
        .map_err(|e| UsageError::InvalidLog(format!("failed to read {}: {e}", path.display())))?;
    let events = parse_events(&text)?;
    tracing::debug!(path = %path.display(), events = events.len(), "loaded usage log");
    summarize_events(&events, input.pricing.as_ref(), input.fail_on_unknown_model)
}
