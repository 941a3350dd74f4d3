//! Static run configuration.
//!
//! Constructed once at run start (the CLI loads it from a settings file) and
//! handed by reference into each component. No component reads ambient
//! state.

use chrono_tz::Tz;
use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::transaction::Category;

/// How one payment provider's notification mails are recognized and parsed.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderRule {
    /// Account label, e.g. "Wise". Becomes the `account` field.
    pub label: String,
    /// Sender address fragment that identifies this provider.
    pub sender: String,
    /// Phrases the mailbox query requires in subject or body.
    pub phrases: Vec<String>,
    /// Regex locating the transaction description in the visible text.
    /// Must capture `amount`, `currency`, and `merchant`.
    pub detail_pattern: String,
}

/// Deterministic merchant-name override for a known category.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CategoryHint {
    /// Case-insensitive substring of the merchant name.
    pub merchant_fragment: String,
    pub category: Category,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineConfig {
    /// Recency window in days for the mailbox query.
    pub days_back: u32,
    /// IANA timezone the composite receipt timestamp is rendered in.
    pub timezone: String,
    /// Model identifier for the generation backend.
    pub model: String,
    /// Flat cost estimate attached to each model call.
    pub cost_per_call: f64,
    /// Mailbox label marking already-claimed messages.
    pub claimed_label: String,
    /// Model calls allowed per minute.
    pub max_calls_per_minute: usize,
    /// Daily model spend ceiling in dollars.
    pub daily_budget: f64,
    pub providers: Vec<ProviderRule>,
    pub category_hints: Vec<CategoryHint>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            days_back: 7,
            timezone: "Europe/Berlin".to_string(),
            model: "gemini-2.0-flash".to_string(),
            cost_per_call: 0.0005,
            claimed_label: "spendtrack/processed".to_string(),
            max_calls_per_minute: 60,
            daily_budget: 1.0,
            providers: vec![
                ProviderRule {
                    label: "Wise".to_string(),
                    sender: "noreply@wise.com".to_string(),
                    phrases: vec!["You spent".to_string(), "is now in".to_string()],
                    detail_pattern:
                        r"You spent (?P<amount>[\d,\.]+) (?P<currency>[A-Z]{3}) at (?P<merchant>[^.]+)"
                            .to_string(),
                },
                ProviderRule {
                    label: "PayPal".to_string(),
                    sender: "service@paypal.de".to_string(),
                    phrases: vec!["Von Ihnen gezahlt".to_string()],
                    detail_pattern:
                        r"Sie haben (?P<amount>[\d,\.]+) (?P<currency>[A-Z]{3}) (?:an |to )(?P<merchant>[^.]+) gesendet"
                            .to_string(),
                },
            ],
            category_hints: vec![
                hint("OpenRouter", Category::Utilities),
                hint("Namecheap", Category::Utilities),
                hint("Old Peter", Category::FoodDining),
                hint("Balam", Category::FoodDining),
                hint("City Market", Category::Grocery),
                hint("Deckers", Category::Shopping),
                hint("Mood Up", Category::Shopping),
                hint("Cosmet", Category::Shopping),
                hint("Casa De Los Cirios", Category::FoodDining),
            ],
        }
    }
}

fn hint(fragment: &str, category: Category) -> CategoryHint {
    CategoryHint {
        merchant_fragment: fragment.to_string(),
        category,
    }
}

impl PipelineConfig {
    /// Reject unusable configuration before any candidate is touched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.providers.is_empty() {
            return Err(ConfigError::NoProviders);
        }
        if self.days_back == 0 {
            return Err(ConfigError::ZeroDaysBack);
        }
        if self.max_calls_per_minute == 0 {
            return Err(ConfigError::ZeroCallLimit);
        }
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::BadTimezone(self.timezone.clone()))?;
        for rule in &self.providers {
            Regex::new(&rule.detail_pattern).map_err(|source| ConfigError::BadPattern {
                provider: rule.label.clone(),
                source,
            })?;
        }
        Ok(())
    }

    /// Provider labels, in configuration order. The allowed `account` set.
    pub fn account_labels(&self) -> Vec<String> {
        self.providers.iter().map(|p| p.label.clone()).collect()
    }

    /// Rule whose sender fragment appears in the From header, if any.
    pub fn provider_for_sender(&self, from: &str) -> Option<&ProviderRule> {
        self.providers.iter().find(|p| from.contains(&p.sender))
    }
}
