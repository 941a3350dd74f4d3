//! Deterministic prompt construction for transaction formatting.

use serde_json::json;

use spendtrack_core::{Category, CoarseRecord};

/// Build the formatting prompt for one coarse record.
///
/// The same record always yields the same prompt: format rules, the closed
/// category list with per-category guidance, known-merchant anchors, and one
/// worked example to pin the output shape.
pub fn build_prompt(record: &CoarseRecord) -> String {
    let categories_list = Category::ALL
        .iter()
        .map(|c| format!("\"{c}\""))
        .collect::<Vec<_>>()
        .join(", ");

    let category_rules = Category::ALL
        .iter()
        .map(|c| format!("   - {c}: {}", c.prompt_rule()))
        .collect::<Vec<_>>()
        .join("\n");

    let example = json!({
        "amount": "24.95",
        "currency": "USD",
        "merchant": "Coffee Shop Downtown",
        "category": "Food & Dining",
        "date": "15-04-2025",
        "time": "2:30 PM",
        "account": "Wise"
    });
    let example_pretty = serde_json::to_string_pretty(&example).expect("static example serializes");

    format!(
        "Format this transaction as a single JSON object. Important rules:\n\n\
         1. Output MUST be a raw JSON object only - no markdown, no code blocks, no backticks, no extra text\n\
         2. Field requirements:\n\
         \x20  - amount: string with exactly 2 decimal places (e.g., \"10.95\", \"466.40\")\n\
         \x20  - currency: uppercase string (e.g., \"USD\", \"EUR\", \"MXN\")\n\
         \x20  - merchant: full business name including location if provided\n\
         \x20  - category: must be exactly one of these categories: {categories_list}\n\
         \x20  - date: string in DD-MM-YYYY format\n\
         \x20  - time: string in 12-hour HH:MM AM/PM format (hours 1-12, never 00)\n\
         \x20  - account: string (e.g., \"Wise\", \"PayPal\")\n\n\
         3. Allowed categories and their rules:\n{category_rules}\n\n\
         4. Specific merchant categorization:\n\
         \x20  - Web services (like OpenRouter, Namecheap) -> Utilities\n\
         \x20  - Restaurants (like Old Peter, Balam) -> Food & Dining\n\
         \x20  - Retail stores (like Deckers) -> Shopping\n\
         \x20  - Supermarkets (like City Market) -> Grocery\n\n\
         5. Example of correctly formatted transaction:\n{example_pretty}\n\n\
         Transaction to format: description={description:?} date={date:?} account={account:?}",
        description = record.description,
        date = record.date,
        account = record.account,
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> CoarseRecord {
        CoarseRecord {
            description: "You spent 45.67 EUR at Coffee Shop.".to_string(),
            date: "05-01-2023 12:34 PM".to_string(),
            account: "Wise".to_string(),
        }
    }

    #[test]
    fn test_prompt_is_deterministic() {
        assert_eq!(build_prompt(&record()), build_prompt(&record()));
    }

    #[test]
    fn test_prompt_names_every_category() {
        let prompt = build_prompt(&record());
        for cat in Category::ALL {
            assert!(prompt.contains(cat.label()), "missing category {cat}");
        }
    }

    #[test]
    fn test_prompt_embeds_record_and_format_rules() {
        let prompt = build_prompt(&record());
        assert!(prompt.contains("You spent 45.67 EUR at Coffee Shop."));
        assert!(prompt.contains("05-01-2023 12:34 PM"));
        assert!(prompt.contains("DD-MM-YYYY"));
        assert!(prompt.contains("hours 1-12, never 00"));
        assert!(prompt.contains("no markdown"));
    }
}
