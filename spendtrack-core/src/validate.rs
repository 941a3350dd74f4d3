//! Schema validation for decoded model output.
//!
//! Model responses are untrusted JSON. A single pass over the decoded value
//! either yields a fully formed [`Transaction`] or the first
//! [`ValidationError`] encountered; nothing partial ever escapes.

use chrono::NaiveDate;
use regex::Regex;
use serde_json::Value;
use std::sync::OnceLock;

use crate::error::ValidationError;
use crate::transaction::{Category, Transaction};

fn amount_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\d+\.\d{2}$").expect("invalid amount regex"))
}

fn time_re() -> &'static Regex {
    // 0[1-9] and [1-9] accept both "08:59 PM" and "8:59 PM"; plain "0" is
    // rejected because 00:xx is not a legal 12-hour clock time.
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(0[1-9]|1[0-2]|[1-9]):[0-5][0-9] [AP]M$").expect("invalid time regex")
    })
}

/// Pull a string field out of the decoded object, trimmed.
fn string_field<'a>(obj: &'a Value, field: &'static str) -> Result<&'a str, ValidationError> {
    match obj.get(field) {
        Some(Value::String(s)) => Ok(s.trim()),
        Some(other) => Err(ValidationError::bad(field, other.to_string())),
        None => Err(ValidationError::MissingField(field)),
    }
}

/// Validate decoded model output against the transaction schema.
///
/// `accounts` is the set of provider labels configured for this run.
/// Currency casing is normalized before validation; every other field is
/// accepted verbatim or rejected.
pub fn validate_transaction(
    value: &Value,
    accounts: &[String],
) -> Result<Transaction, ValidationError> {
    if !value.is_object() {
        return Err(ValidationError::NotAnObject(value.to_string()));
    }

    let amount = string_field(value, "amount")?;
    if !amount_re().is_match(amount) {
        return Err(ValidationError::bad("amount", amount));
    }

    // Case normalization is a pre-validation transform, not a failure.
    let currency = string_field(value, "currency")?.to_uppercase();
    if currency.len() != 3 || !currency.chars().all(|c| c.is_ascii_uppercase()) {
        return Err(ValidationError::bad("currency", currency));
    }

    let merchant = string_field(value, "merchant")?;
    if merchant.is_empty() {
        return Err(ValidationError::bad("merchant", merchant));
    }

    let category_raw = string_field(value, "category")?;
    let category: Category = category_raw
        .parse()
        .map_err(|_| ValidationError::bad("category", category_raw))?;

    let date = string_field(value, "date")?;
    if NaiveDate::parse_from_str(date, "%d-%m-%Y").is_err() {
        return Err(ValidationError::bad("date", date));
    }

    let time = string_field(value, "time")?;
    if !time_re().is_match(time) {
        return Err(ValidationError::bad("time", time));
    }

    let account = string_field(value, "account")?;
    if !accounts.iter().any(|a| a == account) {
        return Err(ValidationError::bad("account", account));
    }

    Ok(Transaction {
        amount: amount.to_string(),
        currency,
        merchant: merchant.to_string(),
        category,
        date: date.to_string(),
        time: time.to_string(),
        account: account.to_string(),
    })
}
