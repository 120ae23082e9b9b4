use anyhow::{Result, anyhow};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Candle interval a feature row, candle or model is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Timeframe {
    OneMin,
    FiveMin,
    FifteenMin,
    OneHour,
    FourHour,
    OneDay,
}

impl Timeframe {
    /// Returns the duration of this timeframe in minutes
    pub fn to_minutes(&self) -> i64 {
        match self {
            Timeframe::OneMin => 1,
            Timeframe::FiveMin => 5,
            Timeframe::FifteenMin => 15,
            Timeframe::OneHour => 60,
            Timeframe::FourHour => 240,
            Timeframe::OneDay => 1440,
        }
    }

    /// Returns the duration in seconds
    pub fn to_seconds(&self) -> i64 {
        self.to_minutes() * 60
    }

    /// Canonical short label, also used inside model keys (`iforest_1h`)
    pub fn as_str(&self) -> &'static str {
        match self {
            Timeframe::OneMin => "1m",
            Timeframe::FiveMin => "5m",
            Timeframe::FifteenMin => "15m",
            Timeframe::OneHour => "1h",
            Timeframe::FourHour => "4h",
            Timeframe::OneDay => "1d",
        }
    }

    /// Returns the start of the candle containing `ts`.
    ///
    /// Daily candles start at midnight UTC, every other interval is aligned
    /// on multiples of its own length since the epoch.
    pub fn period_start(&self, ts: DateTime<Utc>) -> DateTime<Utc> {
        let secs = ts.timestamp();
        let period = self.to_seconds();
        let start = secs - secs.rem_euclid(period);
        Utc.timestamp_opt(start, 0).single().unwrap_or(ts)
    }

    pub fn is_period_start(&self, ts: DateTime<Utc>) -> bool {
        self.period_start(ts) == ts
    }
}

impl FromStr for Timeframe {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "1m" | "1min" => Ok(Timeframe::OneMin),
            "5m" | "5min" => Ok(Timeframe::FiveMin),
            "15m" | "15min" => Ok(Timeframe::FifteenMin),
            "1h" | "1hour" => Ok(Timeframe::OneHour),
            "4h" | "4hour" => Ok(Timeframe::FourHour),
            "1d" | "1day" => Ok(Timeframe::OneDay),
            _ => Err(anyhow!(
                "Invalid interval: '{}'. Valid options: 1m, 5m, 15m, 1h, 4h, 1d",
                s
            )),
        }
    }
}

impl TryFrom<String> for Timeframe {
    type Error = anyhow::Error;

    fn try_from(value: String) -> Result<Self> {
        Timeframe::from_str(&value)
    }
}

impl From<Timeframe> for String {
    fn from(tf: Timeframe) -> Self {
        tf.as_str().to_string()
    }
}

impl fmt::Display for Timeframe {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Parses a comma-separated interval list such as `"1h,4h"`, dropping duplicates.
pub fn parse_timeframe_list(s: &str) -> Result<Vec<Timeframe>> {
    let mut out = Vec::new();
    for part in s.split(',').filter(|p| !p.trim().is_empty()) {
        let tf = Timeframe::from_str(part)?;
        if !out.contains(&tf) {
            out.push(tf);
        }
    }
    Ok(out)
}
