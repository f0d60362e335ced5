use chrono::Duration;
use regex::Regex;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RollbackDirection {
    Increases,
    Decreases,
}

/// Post-promotion rollback trigger, parsed from the small natural-language
/// dialect: `<metric> (increases|decreases) by <N>% within <duration>`,
/// e.g. `error_rate increases by 10% within 1h`.
#[derive(Debug, Clone)]
pub struct RollbackTrigger {
    pub metric: String,
    pub direction: RollbackDirection,
    pub percent: f64,
    pub window: Duration,
}

/// Minimum sessions in the observation window before a trigger may fire.
pub const MIN_SESSIONS_FOR_ROLLBACK: usize = 5;

impl RollbackTrigger {
    pub fn parse(source: &str) -> Result<Self> {
        let pattern = Regex::new(
            r"^\s*(?P<metric>[a-z_][a-z0-9_]*)\s+(?P<dir>increases|decreases)\s+by\s+(?P<pct>\d+(?:\.\d+)?)%\s+within\s+(?P<num>\d+)(?P<unit>[smhd])\s*$",
        )
        .map_err(|e| Error::Config(e.to_string()))?;

        let captures = pattern.captures(source).ok_or_else(|| {
            Error::Config(format!(
                "unparseable rollback trigger '{}' (expected '<metric> increases|decreases by <N>% within <duration>')",
                source
            ))
        })?;

        let number: i64 = captures["num"]
            .parse()
            .map_err(|_| Error::Config(format!("bad duration in trigger '{}'", source)))?;
        let window = match &captures["unit"] {
            "s" => Duration::seconds(number),
            "m" => Duration::minutes(number),
            "h" => Duration::hours(number),
            "d" => Duration::days(number),
            _ => return Err(Error::Config(format!("bad duration unit in '{}'", source))),
        };

        Ok(Self {
            metric: captures["metric"].to_string(),
            direction: if &captures["dir"] == "increases" {
                RollbackDirection::Increases
            } else {
                RollbackDirection::Decreases
            },
            percent: captures["pct"].parse().map_err(|_| {
                Error::Config(format!("bad percentage in trigger '{}'", source))
            })?,
            window,
        })
    }

    /// Whether the trigger fires for the observed values. Requires enough
    /// sessions and a non-zero baseline.
    pub fn fires(&self, current: f64, baseline: f64, sessions_in_window: usize) -> bool {
        if sessions_in_window < MIN_SESSIONS_FOR_ROLLBACK {
            return false;
        }
        if baseline.abs() < f64::EPSILON {
            return false;
        }
        let change_percent = (current - baseline) / baseline * 100.0;
        match self.direction {
            RollbackDirection::Increases => change_percent >= self.percent,
            RollbackDirection::Decreases => -change_percent >= self.percent,
        }
    }
}
