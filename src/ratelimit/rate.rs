//! Refill rates and time units.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Time unit for bucket refill.
///
/// Units are fixed multipliers against one second. `Month` and `Year` are
/// nominal average lengths (2,629,743.83 s and 31,556,926 s), not calendar
/// arithmetic; a limiter spanning such periods drifts against the calendar
/// by design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TimeUnit {
    Microsecond,
    Millisecond,
    Second,
    Minute,
    Hour,
    Day,
    Week,
    Month,
    Year,
}

impl TimeUnit {
    /// Length of this unit in seconds.
    pub fn as_secs_f64(&self) -> f64 {
        match self {
            TimeUnit::Microsecond => 1e-6,
            TimeUnit::Millisecond => 1e-3,
            TimeUnit::Second => 1.0,
            TimeUnit::Minute => 60.0,
            TimeUnit::Hour => 3_600.0,
            TimeUnit::Day => 86_400.0,
            TimeUnit::Week => 604_800.0,
            TimeUnit::Month => 2_629_743.83,
            TimeUnit::Year => 31_556_926.0,
        }
    }
}

impl Default for TimeUnit {
    fn default() -> Self {
        TimeUnit::Second
    }
}

/// A refill rate: `fill` tokens per `unit`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rate {
    fill: u64,
    unit: TimeUnit,
}

impl Rate {
    /// Create a rate of `fill` tokens per `unit`.
    pub fn new(fill: u64, unit: TimeUnit) -> Self {
        Self { fill, unit }
    }

    /// Tokens generated per second.
    pub fn tokens_per_second(&self) -> f64 {
        self.fill as f64 / self.unit.as_secs_f64()
    }

    /// Seconds needed to generate `tokens` tokens at this rate.
    pub fn seconds_for(&self, tokens: f64) -> f64 {
        tokens / self.tokens_per_second()
    }

    /// Duration needed to generate `tokens` tokens, saturating at zero.
    pub fn duration_for(&self, tokens: f64) -> Duration {
        Duration::from_secs_f64(self.seconds_for(tokens).max(0.0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unit_lengths() {
        assert_eq!(TimeUnit::Second.as_secs_f64(), 1.0);
        assert_eq!(TimeUnit::Minute.as_secs_f64(), 60.0);
        assert_eq!(TimeUnit::Hour.as_secs_f64(), 3_600.0);
        assert_eq!(TimeUnit::Day.as_secs_f64(), 86_400.0);
        assert_eq!(TimeUnit::Week.as_secs_f64(), 7.0 * 86_400.0);
    }

    #[test]
    fn test_month_and_year_are_nominal() {
        // Average Gregorian lengths, deliberately not calendar-aware.
        assert_eq!(TimeUnit::Month.as_secs_f64(), 2_629_743.83);
        assert_eq!(TimeUnit::Year.as_secs_f64(), 31_556_926.0);
    }

    #[test]
    fn test_tokens_per_second() {
        assert_eq!(Rate::new(5, TimeUnit::Second).tokens_per_second(), 5.0);
        assert_eq!(Rate::new(60, TimeUnit::Minute).tokens_per_second(), 1.0);
        assert_eq!(Rate::new(1, TimeUnit::Millisecond).tokens_per_second(), 1_000.0);
    }

    #[test]
    fn test_seconds_for_tokens() {
        let rate = Rate::new(10, TimeUnit::Second);
        assert_eq!(rate.seconds_for(5.0), 0.5);
        assert_eq!(rate.duration_for(5.0), Duration::from_millis(500));
        // Negative demand saturates to a zero wait.
        assert_eq!(rate.duration_for(-1.0), Duration::ZERO);
    }

    #[test]
    fn test_unit_parses_from_lowercase_name() {
        let unit: TimeUnit = serde_yaml::from_str("second").unwrap();
        assert_eq!(unit, TimeUnit::Second);
        let unit: TimeUnit = serde_yaml::from_str("microsecond").unwrap();
        assert_eq!(unit, TimeUnit::Microsecond);
    }
}
