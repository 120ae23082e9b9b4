use crate::domain::market::Timeframe;
use crate::domain::ml::{FEATURE_COUNT, FeatureRow};
use crate::infrastructure::persistence::datetime_from_unix;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;
use std::str::FromStr;

/// One CSV line as exported by the feature engine.
/// Column order of the feature fields follows `FEATURE_NAMES`.
#[derive(Debug, Deserialize)]
struct FeatureRecord {
    symbol: String,
    interval: String,
    open_time: i64,
    ret_1: f64,
    ret_3: f64,
    ret_6: f64,
    ret_12: f64,
    vol_6: f64,
    vol_24: f64,
    volume_z: f64,
    rsi_14: f64,
    macd: f64,
    macd_signal: f64,
    macd_hist: f64,
    bb_position: f64,
    bb_width: f64,
    label: Option<bool>,
}

impl FeatureRecord {
    fn into_row(self) -> Result<FeatureRow> {
        let interval = Timeframe::from_str(&self.interval)?;
        let open_time = datetime_from_unix(self.open_time)?;
        if !interval.is_period_start(open_time) {
            anyhow::bail!(
                "{} {} open_time {} is not aligned to the interval",
                self.symbol,
                interval,
                open_time
            );
        }
        let features = vec![
            self.ret_1,
            self.ret_3,
            self.ret_6,
            self.ret_12,
            self.vol_6,
            self.vol_24,
            self.volume_z,
            self.rsi_14,
            self.macd,
            self.macd_signal,
            self.macd_hist,
            self.bb_position,
            self.bb_width,
        ];
        debug_assert_eq!(features.len(), FEATURE_COUNT);

        let row = FeatureRow::new(self.symbol, interval, open_time, features);
        Ok(match self.label {
            Some(label) => row.with_label(label),
            None => row,
        })
    }
}

/// Parse feature rows from CSV with a header line
pub fn read_feature_rows<R: Read>(reader: R) -> Result<Vec<FeatureRow>> {
    let mut rdr = csv::Reader::from_reader(reader);
    let mut rows = Vec::new();

    for (line, result) in rdr.deserialize().enumerate() {
        let record: FeatureRecord =
            result.with_context(|| format!("Malformed feature record at row {}", line + 1))?;
        rows.push(record.into_row()?);
    }
    Ok(rows)
}

pub fn read_feature_csv(path: &Path) -> Result<Vec<FeatureRow>> {
    let file = File::open(path).with_context(|| format!("Failed to open {:?}", path))?;
    read_feature_rows(BufReader::new(file))
}

#[cfg(test)]
mod tests {
    use super::*;

    const HEADER: &str = "symbol,interval,open_time,ret_1,ret_3,ret_6,ret_12,vol_6,vol_24,volume_z,rsi_14,macd,macd_signal,macd_hist,bb_position,bb_width,label";

    #[test]
    fn test_reads_labeled_and_unlabeled_rows() {
        let csv = format!(
            "{}\nBTCUSDT,1h,1704067200,0.01,0.02,0.03,0.04,0.1,0.2,1.5,55,0.3,0.2,0.1,0.6,0.05,true\nETHUSDT,1h,1704070800,0,0,0,0,0,0,0,50,0,0,0,0.5,0.02,\n",
            HEADER
        );
        let rows = read_feature_rows(csv.as_bytes()).unwrap();

        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].features.len(), FEATURE_COUNT);
        assert_eq!(rows[0].features[7], 55.0);
        assert_eq!(rows[0].label, Some(true));
        assert_eq!(rows[1].label, None);
        assert_eq!(rows[1].interval, Timeframe::OneHour);
    }

    #[test]
    fn test_rejects_unknown_interval() {
        let csv = format!(
            "{}\nBTCUSDT,7h,1704067200,0,0,0,0,0,0,0,50,0,0,0,0.5,0.02,false\n",
            HEADER
        );
        assert!(read_feature_rows(csv.as_bytes()).is_err());
    }

    #[test]
    fn test_rejects_misaligned_open_time() {
        // 00:30 is not the start of an hourly candle
        let csv = format!(
            "{}\nBTCUSDT,1h,1704069000,0,0,0,0,0,0,0,50,0,0,0,0.5,0.02,false\n",
            HEADER
        );
        let err = read_feature_rows(csv.as_bytes()).unwrap_err();
        assert!(err.to_string().contains("not aligned"));
    }
}
