//! Validated transaction types and the closed category set.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// The closed set of spending categories the model may assign.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum Category {
    #[serde(rename = "Transport")]
    Transport,
    #[serde(rename = "Food & Dining")]
    FoodDining,
    #[serde(rename = "Travel")]
    Travel,
    #[serde(rename = "Home")]
    Home,
    #[serde(rename = "Utilities")]
    Utilities,
    #[serde(rename = "People")]
    People,
    #[serde(rename = "Shopping")]
    Shopping,
    #[serde(rename = "Grocery")]
    Grocery,
    #[serde(rename = "Other")]
    Other,
}

impl Category {
    pub const ALL: [Category; 9] = [
        Category::Transport,
        Category::FoodDining,
        Category::Travel,
        Category::Home,
        Category::Utilities,
        Category::People,
        Category::Shopping,
        Category::Grocery,
        Category::Other,
    ];

    /// Spreadsheet / prompt label.
    pub fn label(&self) -> &'static str {
        match self {
            Category::Transport => "Transport",
            Category::FoodDining => "Food & Dining",
            Category::Travel => "Travel",
            Category::Home => "Home",
            Category::Utilities => "Utilities",
            Category::People => "People",
            Category::Shopping => "Shopping",
            Category::Grocery => "Grocery",
            Category::Other => "Other",
        }
    }

    /// One-line guidance handed to the model for this category.
    pub fn prompt_rule(&self) -> &'static str {
        match self {
            Category::Transport => "rides, fuel, parking, vehicle services",
            Category::FoodDining => "restaurants, cafes, bars, food delivery",
            Category::Travel => "hotels, flights, tourism activities",
            Category::Home => "furniture, maintenance, home services",
            Category::Utilities => {
                "internet, phone, web services, hosting, domains, subscriptions"
            }
            Category::People => "transfers, gifts, personal services",
            Category::Shopping => "retail stores, online shopping, general merchandise",
            Category::Grocery => "supermarkets, food stores, markets",
            Category::Other => "anything that doesn't fit above categories",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

impl FromStr for Category {
    type Err = ();

    /// Exact label match only; the validator owns any leniency.
    fn from_str(s: &str) -> Result<Self, ()> {
        Category::ALL
            .iter()
            .copied()
            .find(|c| c.label() == s)
            .ok_or(())
    }
}

/// A fully validated transaction, constructed exactly once by the validator
/// and immutable afterwards.
///
/// Field invariants (enforced in `validate`):
/// - `amount` matches `^\d+\.\d{2}$` (no symbol, no thousands separator)
/// - `currency` is exactly three uppercase letters
/// - `merchant` is non-empty
/// - `date` is a real calendar date in DD-MM-YYYY
/// - `time` is a 12-hour clock time, hour 1-12 (midnight is `12:xx AM`)
/// - `account` is one of the configured provider labels
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub amount: String,
    pub currency: String,
    pub merchant: String,
    pub category: Category,
    pub date: String,
    pub time: String,
    pub account: String,
}

impl Transaction {
    /// Row layout expected by the spreadsheet sink:
    /// date, time, merchant, amount, currency, category, account.
    pub fn to_sheet_row(&self) -> Vec<String> {
        vec![
            self.date.clone(),
            self.time.clone(),
            self.merchant.clone(),
            self.amount.clone(),
            self.currency.clone(),
            self.category.label().to_string(),
            self.account.clone(),
        ]
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} - {} - {} {} - {}",
            self.date, self.time, self.merchant, self.amount, self.currency, self.category
        )
    }
}

/// The minimally structured record extracted straight from a message,
/// before AI resolution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CoarseRecord {
    /// Free text with the amount/merchant embedded in natural language,
    /// e.g. "You spent 45.67 EUR at Coffee Shop."
    pub description: String,
    /// Composite receipt timestamp, `DD-MM-YYYY HH:MM AM/PM`.
    pub date: String,
    /// Provider label, determined solely by the sender identity.
    pub account: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_labels_round_trip() {
        for cat in Category::ALL {
            assert_eq!(cat.label().parse::<Category>(), Ok(cat));
        }
    }

    #[test]
    fn test_category_rejects_unknown_label() {
        assert!("Groceries".parse::<Category>().is_err());
        assert!("food & dining".parse::<Category>().is_err());
    }

    #[test]
    fn test_category_serde_uses_labels() {
        let json = serde_json::to_string(&Category::FoodDining).unwrap();
        assert_eq!(json, "\"Food & Dining\"");
        let back: Category = serde_json::from_str(&json).unwrap();
        assert_eq!(back, Category::FoodDining);
    }

    #[test]
    fn test_sheet_row_order() {
        let txn = Transaction {
            amount: "24.95".into(),
            currency: "USD".into(),
            merchant: "Coffee Shop Downtown".into(),
            category: Category::FoodDining,
            date: "15-04-2025".into(),
            time: "2:30 PM".into(),
            account: "Wise".into(),
        };
        assert_eq!(
            txn.to_sheet_row(),
            vec![
                "15-04-2025",
                "2:30 PM",
                "Coffee Shop Downtown",
                "24.95",
                "USD",
                "Food & Dining",
                "Wise",
            ]
        );
    }
}
