use chrono::{DateTime, Duration, Utc};
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use std::collections::HashMap;

use crate::config::CostConfig;

/// Built-in $ per MTok (input, output) for common models. Config overrides
/// win; unknown models use the configured fallback rate.
static DEFAULT_PRICES: Lazy<HashMap<&'static str, (f64, f64)>> = Lazy::new(|| {
    HashMap::from([
        ("gpt-4o", (2.50, 10.00)),
        ("gpt-4o-mini", (0.15, 0.60)),
        ("gpt-4.1", (2.00, 8.00)),
        ("gpt-4.1-mini", (0.40, 1.60)),
        ("o3-mini", (1.10, 4.40)),
        ("claude-3-5-haiku", (0.80, 4.00)),
        ("claude-sonnet-4", (3.00, 15.00)),
        ("claude-opus-4", (15.00, 75.00)),
        ("gemini-2.0-flash", (0.10, 0.40)),
    ])
});

/// Token count estimate when the upstream response reports none: ⌈bytes/4⌉.
pub fn estimate_tokens(bytes: usize) -> u64 {
    bytes.div_ceil(4) as u64
}

/// Per-model token → USD conversion plus per-agent daily aggregates.
pub struct CostTracker {
    overrides: HashMap<String, (f64, f64)>,
    default_rate: (f64, f64),
    utc_offset_hours: i32,
    daily: RwLock<HashMap<String, (String, f64)>>,
}

impl CostTracker {
    pub fn new(config: &CostConfig) -> Self {
        let overrides = config
            .model_prices
            .iter()
            .map(|(model, rates)| (model.clone(), (rates[0], rates[1])))
            .collect();
        Self {
            overrides,
            default_rate: (config.default_input_per_mtok, config.default_output_per_mtok),
            utc_offset_hours: config.utc_offset_hours,
            daily: RwLock::new(HashMap::new()),
        }
    }

    fn rates(&self, model: Option<&str>) -> (f64, f64) {
        let Some(model) = model else {
            return self.default_rate;
        };
        if let Some(&rates) = self.overrides.get(model) {
            return rates;
        }
        // Match built-ins by prefix so dated variants (gpt-4o-2024-11-20)
        // price like their family.
        for (known, &rates) in DEFAULT_PRICES.iter() {
            if model == *known || model.starts_with(&format!("{}-", known)) {
                return rates;
            }
        }
        self.default_rate
    }

    /// USD for one action's token usage.
    pub fn cost(&self, model: Option<&str>, tokens_in: u64, tokens_out: u64) -> f64 {
        let (input_rate, output_rate) = self.rates(model);
        (tokens_in as f64 * input_rate + tokens_out as f64 * output_rate) / 1_000_000.0
    }

    /// Local calendar date used for daily buckets.
    fn day_key(&self, at: DateTime<Utc>) -> String {
        (at + Duration::hours(self.utc_offset_hours as i64))
            .format("%Y-%m-%d")
            .to_string()
    }

    /// Add to the agent's daily aggregate, rolling over at local midnight.
    pub fn add_daily(&self, agent_id: &str, cost: f64, at: DateTime<Utc>) {
        let key = self.day_key(at);
        let mut daily = self.daily.write();
        let entry = daily
            .entry(agent_id.to_string())
            .or_insert_with(|| (key.clone(), 0.0));
        if entry.0 != key {
            *entry = (key, 0.0);
        }
        entry.1 += cost;
    }

    pub fn daily_cost(&self, agent_id: &str, at: DateTime<Utc>) -> f64 {
        let key = self.day_key(at);
        let daily = self.daily.read();
        match daily.get(agent_id) {
            Some((day, total)) if *day == key => *total,
            _ => 0.0,
        }
    }
}
