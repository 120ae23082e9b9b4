use crate::domain::market::timeframe::Timeframe;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Prefix of indicator names emitted by this subsystem (`ml_logreg`, ...).
/// Anything else in the signal store comes from the classic indicator engine.
pub const ML_INDICATOR_PREFIX: &str = "ml_";

pub fn ml_indicator(model_key: &str) -> String {
    format!("{}{}", ML_INDICATOR_PREFIX, model_key)
}

pub fn is_ml_indicator(indicator: &str) -> bool {
    indicator.starts_with(ML_INDICATOR_PREFIX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Long,
    Short,
    Hold,
}

impl Direction {
    pub fn is_directional(&self) -> bool {
        !matches!(self, Direction::Hold)
    }

    /// +1 long, -1 short, 0 hold
    pub fn vote(&self) -> f64 {
        match self {
            Direction::Long => 1.0,
            Direction::Short => -1.0,
            Direction::Hold => 0.0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Long => "long",
            Direction::Short => "short",
            Direction::Hold => "hold",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "long" | "buy" => Ok(Direction::Long),
            "short" | "sell" => Ok(Direction::Short),
            "hold" | "neutral" => Ok(Direction::Hold),
            _ => anyhow::bail!("Invalid direction: {}", s),
        }
    }
}

/// Risk grade 1..=5. 1 is the strongest, lowest-risk call; 5 the weakest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct RiskLevel(u8);

impl RiskLevel {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 5;

    pub fn new(level: i64) -> anyhow::Result<Self> {
        if !(Self::MIN as i64..=Self::MAX as i64).contains(&level) {
            anyhow::bail!("Risk level out of range: {}", level);
        }
        Ok(Self(level as u8))
    }

    /// Builds a level, clamping out-of-range input into 1..=5
    pub fn clamped(level: i64) -> Self {
        Self(level.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn value(&self) -> u8 {
        self.0
    }

    /// One level toward higher risk, capped at the worst level
    pub fn bump(&self) -> Self {
        Self((self.0 + 1).min(Self::MAX))
    }
}

impl TryFrom<i64> for RiskLevel {
    type Error = anyhow::Error;

    fn try_from(value: i64) -> anyhow::Result<Self> {
        RiskLevel::new(value)
    }
}

impl From<RiskLevel> for i64 {
    fn from(r: RiskLevel) -> Self {
        r.0 as i64
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "risk{}", self.0)
    }
}

/// Trading signal, either classic (technical indicator) or ML derived
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Signal {
    pub id: Option<i64>,
    pub symbol: String,
    pub interval: Timeframe,
    pub indicator: String,
    pub timestamp: DateTime<Utc>,
    pub direction: Direction,
    pub risk: RiskLevel,
    pub details: String,
}

impl Signal {
    pub fn new(
        symbol: impl Into<String>,
        interval: Timeframe,
        indicator: impl Into<String>,
        timestamp: DateTime<Utc>,
        direction: Direction,
        risk: RiskLevel,
        details: String,
    ) -> Self {
        Self {
            id: None,
            symbol: symbol.into(),
            interval,
            indicator: indicator.into(),
            timestamp,
            direction,
            risk,
            details,
        }
    }
}

/// Query for `SignalStore::list_signals`. `None` fields do not filter.
#[derive(Debug, Clone, Default)]
pub struct SignalFilter {
    pub symbol: Option<String>,
    pub interval: Option<Timeframe>,
    pub indicator: Option<String>,
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl SignalFilter {
    /// Signals for one candle: `from == to == timestamp`
    pub fn at(symbol: &str, interval: Timeframe, timestamp: DateTime<Utc>) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            interval: Some(interval),
            from: Some(timestamp),
            to: Some(timestamp),
            ..Default::default()
        }
    }

    pub fn matches(&self, signal: &Signal) -> bool {
        self.symbol.as_ref().is_none_or(|s| *s == signal.symbol)
            && self.interval.is_none_or(|i| i == signal.interval)
            && self.indicator.as_ref().is_none_or(|i| *i == signal.indicator)
            && self.from.is_none_or(|f| signal.timestamp >= f)
            && self.to.is_none_or(|t| signal.timestamp <= t)
    }
}
