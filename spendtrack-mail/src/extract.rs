//! Field extraction: sender-based account resolution, body stripping,
//! provider pattern matching, and composite timestamp rendering.

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use regex::Regex;
use thiserror::Error;
use tracing::debug;

use spendtrack_core::{CoarseRecord, ConfigError, PipelineConfig};

use crate::backend::Candidate;
use crate::html::visible_text;

/// Expected, non-fatal extraction outcomes. Promotional mail matching the
/// coarse search query lands here, not in a crash.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ExtractError {
    #[error("sender {0:?} does not match any configured provider")]
    UnknownSender(String),

    #[error("message body is empty")]
    EmptyBody,

    #[error("no transaction details found in message body")]
    NoTransactionDetails,
}

/// Turns one candidate message into a [`CoarseRecord`].
pub struct FieldExtractor<'a> {
    config: &'a PipelineConfig,
    tz: Tz,
    /// Compiled detail pattern per provider, in configuration order.
    patterns: Vec<Regex>,
}

impl<'a> FieldExtractor<'a> {
    pub fn new(config: &'a PipelineConfig) -> Result<Self, ConfigError> {
        let tz = config
            .timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::BadTimezone(config.timezone.clone()))?;
        let patterns = config
            .providers
            .iter()
            .map(|rule| {
                Regex::new(&rule.detail_pattern).map_err(|source| ConfigError::BadPattern {
                    provider: rule.label.clone(),
                    source,
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self {
            config,
            tz,
            patterns,
        })
    }

    /// Account comes from the sender alone; the body only supplies the
    /// description. A body that matches no provider pattern is a typed
    /// failure, not an empty record.
    pub fn extract(&self, candidate: &Candidate) -> Result<CoarseRecord, ExtractError> {
        let (index, rule) = self
            .config
            .providers
            .iter()
            .enumerate()
            .find(|(_, rule)| candidate.sender.contains(&rule.sender))
            .ok_or_else(|| ExtractError::UnknownSender(candidate.sender.clone()))?;

        let text = if candidate.body_is_html {
            visible_text(&candidate.body)
        } else {
            candidate.body.split_whitespace().collect::<Vec<_>>().join(" ")
        };
        if text.is_empty() {
            return Err(ExtractError::EmptyBody);
        }

        let caps = self.patterns[index]
            .captures(&text)
            .ok_or(ExtractError::NoTransactionDetails)?;
        let amount = caps.name("amount").map(|m| m.as_str()).unwrap_or_default();
        let currency = caps.name("currency").map(|m| m.as_str()).unwrap_or_default();
        let merchant = caps
            .name("merchant")
            .map(|m| m.as_str().trim())
            .unwrap_or_default();

        // Provider-specific phrasings are normalized to one sentence shape
        // so the resolver prompt always sees the same structure.
        let description = format!("You spent {amount} {currency} at {merchant}.");
        debug!(id = %candidate.id, provider = %rule.label, %description, "extracted transaction details");

        Ok(CoarseRecord {
            description,
            date: composite_timestamp(candidate.received_at, &self.tz),
            account: rule.label.clone(),
        })
    }
}

/// Render a receipt timestamp as `DD-MM-YYYY HH:MM AM/PM` in `tz`.
///
/// Strictly 12-hour: hour-of-day 0 renders as `12:xx AM`, 13 as `01:xx PM`.
pub fn composite_timestamp(at: DateTime<Utc>, tz: &Tz) -> String {
    at.with_timezone(tz).format("%d-%m-%Y %I:%M %p").to_string()
}
