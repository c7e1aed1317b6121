//! Per-million-token pricing table: built-in defaults overlaid by config
//! overrides (§4.7).

use std::collections::HashMap;

use crate::config::ModelPrice;

/// A handful of common model names, priced in USD per million tokens. Not
/// exhaustive — anything not listed here falls back to a zero-cost estimate
/// unless the config supplies an override.
fn builtin_defaults() -> HashMap<&'static str, ModelPrice> {
    let mut m = HashMap::new();
    m.insert("claude-opus-4", ModelPrice { input_per_million: 15.0, output_per_million: 75.0 });
    m.insert("claude-sonnet-4", ModelPrice { input_per_million: 3.0, output_per_million: 15.0 });
    m.insert("claude-haiku-4", ModelPrice { input_per_million: 0.8, output_per_million: 4.0 });
    m.insert("gpt-4o", ModelPrice { input_per_million: 2.5, output_per_million: 10.0 });
    m.insert("gpt-4o-mini", ModelPrice { input_per_million: 0.15, output_per_million: 0.6 });
    m.insert("o1", ModelPrice { input_per_million: 15.0, output_per_million: 60.0 });
    m
}

pub struct PricingTable {
    prices: HashMap<String, ModelPrice>,
}

impl PricingTable {
    pub fn new(overrides: &HashMap<String, ModelPrice>) -> Self {
        let mut prices: HashMap<String, ModelPrice> =
            builtin_defaults().into_iter().map(|(k, v)| (k.to_string(), v)).collect();
        prices.extend(overrides.clone());
        Self { prices }
    }

    /// Looks up by exact name first, then by substring match against the
    /// table's keys (model names frequently carry a date suffix the table
    /// doesn't enumerate, e.g. `claude-opus-4-20250514`).
    pub fn price_for(&self, model: &str) -> Option<ModelPrice> {
        if let Some(p) = self.prices.get(model) {
            return Some(*p);
        }
        self.prices.iter().find(|(k, _)| model.contains(k.as_str())).map(|(_, v)| *v)
    }

    pub fn cost(&self, model: &str, input_tokens: u32, output_tokens: u32) -> f64 {
        match self.price_for(model) {
            Some(p) => {
                (input_tokens as f64) * p.input_per_million / 1e6 + (output_tokens as f64) * p.output_per_million / 1e6
            }
            None => 0.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exact_match_prices_a_known_model() {
        let table = PricingTable::new(&HashMap::new());
        let cost = table.cost("claude-opus-4", 1_000_000, 1_000_000);
        assert_eq!(cost, 15.0 + 75.0);
    }

    #[test]
    fn substring_match_handles_dated_model_names() {
        let table = PricingTable::new(&HashMap::new());
        let cost = table.cost("claude-opus-4-20250514", 1_000_000, 0);
        assert_eq!(cost, 15.0);
    }

    #[test]
    fn unknown_model_costs_zero() {
        let table = PricingTable::new(&HashMap::new());
        assert_eq!(table.cost("some-unlisted-model", 1000, 1000), 0.0);
    }

    #[test]
    fn config_override_replaces_builtin_price() {
        let mut overrides = HashMap::new();
        overrides.insert("claude-opus-4".to_string(), ModelPrice { input_per_million: 1.0, output_per_million: 2.0 });
        let table = PricingTable::new(&overrides);
        assert_eq!(table.cost("claude-opus-4", 1_000_000, 1_000_000), 3.0);
    }
}
