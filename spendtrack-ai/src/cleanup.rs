//! Response cleanup: strip wrapping artifacts before JSON decoding.

/// Reduce a raw model response to the first JSON object it contains.
///
/// Handles fenced code blocks, language tags, and leading/trailing prose.
/// Returns the input trimmed when no object boundary is found; the decode
/// step rejects it there.
pub fn clean_model_response(raw: &str) -> String {
    let without_fences: String = raw
        .lines()
        .filter(|line| !line.trim_start().starts_with("```"))
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = without_fences.trim().trim_matches('`').trim();
    extract_first_json_object(cleaned)
}

/// Scan for the first balanced `{ ... }`, respecting string literals and
/// escapes.
fn extract_first_json_object(input: &str) -> String {
    let start = match input.find('{') {
        Some(i) => i,
        None => return input.to_string(),
    };

    let mut depth = 0i32;
    let mut in_string = false;
    let mut escape = false;

    for (idx, c) in input.char_indices().skip_while(|(i, _)| *i < start) {
        if escape {
            escape = false;
            continue;
        }
        match c {
            '\\' => escape = true,
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth -= 1;
                if depth == 0 {
                    return input[start..=idx].to_string();
                }
            }
            _ => {}
        }
    }
    input[start..].to_string()
}
