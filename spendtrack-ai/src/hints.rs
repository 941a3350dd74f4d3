//! Deterministic merchant-to-category overrides.
//!
//! Known merchants must never be miscategorized by the model, so hint
//! matches take precedence over whatever category the model stated.

use spendtrack_core::{Category, CategoryHint};

/// Category for `merchant` if any hint fragment matches, case-insensitive.
///
/// When several fragments match, the longest fragment wins; a tie keeps the
/// earlier configured hint.
pub fn hint_category(merchant: &str, hints: &[CategoryHint]) -> Option<Category> {
    let merchant_lower = merchant.to_lowercase();
    hints
        .iter()
        .filter(|h| merchant_lower.contains(&h.merchant_fragment.to_lowercase()))
        // min_by_key keeps the first of equals, so ties break on config order.
        .min_by_key(|h| std::cmp::Reverse(h.merchant_fragment.len()))
        .map(|h| h.category)
}
