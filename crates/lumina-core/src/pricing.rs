//! Hard-coded per-million-token USD rates, keyed by model-name prefix.

use lumina_logs::UsageLog;

/// (input, output) price per million tokens for a bare model name.
pub fn rates(provider: &str, model: &str) -> (f64, f64) {
    match provider {
        "openai" => {
            if model.starts_with("gpt-4o") {
                (2.50, 10.00)
            } else if model.starts_with("gpt-4") {
                (30.00, 60.00)
            } else if model.starts_with("gpt-3.5") {
                (0.50, 1.50)
            } else if model.starts_with("o1") {
                (15.00, 60.00)
            } else {
                (1.00, 2.00)
            }
        }
        "anthropic" => {
            if model.contains("opus") {
                (15.00, 75.00)
            } else if model.contains("sonnet") {
                (3.00, 15.00)
            } else if model.contains("haiku") {
                (0.25, 1.25)
            } else {
                (3.00, 15.00)
            }
        }
        _ => (1.00, 2.00),
    }
}

/// Cost of a response in USD.
pub fn cost_usd(provider: &str, model: &str, usage: UsageLog) -> f64 {
    let (input_price, output_price) = rates(provider, model);
    usage.prompt_tokens as f64 / 1_000_000.0 * input_price
        + usage.completion_tokens as f64 / 1_000_000.0 * output_price
}
