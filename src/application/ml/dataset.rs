//! Dataset construction and time-series-safe partitioning

use crate::domain::errors::MlError;
use crate::domain::ml::FeatureRow;
use chrono::{DateTime, Utc};

pub const TRAIN_FRACTION: f64 = 0.70;
pub const VALIDATION_FRACTION: f64 = 0.15;

/// Supervised samples in chronological order
#[derive(Debug, Clone, Default)]
pub struct LabeledDataset {
    pub samples: Vec<Vec<f64>>,
    pub labels: Vec<bool>,
    pub open_times: Vec<DateTime<Utc>>,
}

impl LabeledDataset {
    /// Keeps labeled rows only, sorted by open time (stable, so rows of
    /// different symbols at the same time keep their store order).
    pub fn from_rows(rows: &[FeatureRow]) -> Self {
        let mut labeled: Vec<&FeatureRow> = rows.iter().filter(|r| r.is_labeled()).collect();
        labeled.sort_by_key(|r| r.open_time);

        let mut ds = LabeledDataset::default();
        for row in labeled {
            if let Some(label) = row.label {
                ds.samples.push(row.sanitized_features());
                ds.labels.push(label);
                ds.open_times.push(row.open_time);
            }
        }
        ds
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn time_range(&self) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        Some((*self.open_times.first()?, *self.open_times.last()?))
    }

    pub fn split(&self) -> Result<DatasetSplit, MlError> {
        let bounds = SplitBounds::chronological(self.len())?;
        Ok(DatasetSplit {
            train_x: self.samples[..bounds.train_end].to_vec(),
            train_y: self.labels[..bounds.train_end].to_vec(),
            validation_x: self.samples[bounds.train_end..bounds.validation_end].to_vec(),
            validation_y: self.labels[bounds.train_end..bounds.validation_end].to_vec(),
            test_x: self.samples[bounds.validation_end..].to_vec(),
            test_y: self.labels[bounds.validation_end..].to_vec(),
            bounds,
        })
    }
}

/// Index boundaries of a train / validation / test partition:
/// train `[0, train_end)`, validation `[train_end, validation_end)`,
/// test `[validation_end, len)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SplitBounds {
    pub len: usize,
    pub train_end: usize,
    pub validation_end: usize,
}

impl SplitBounds {
    /// 70/15/15 by index order, never shuffled.
    ///
    /// Boundaries are clamped so train and test are never empty; validation
    /// may be empty for tiny datasets.
    pub fn chronological(len: usize) -> Result<Self, MlError> {
        if len < 2 {
            return Err(MlError::InsufficientSamples {
                context: "chronological split".to_string(),
                have: len,
                need: 2,
            });
        }
        let train_end = ((len as f64 * TRAIN_FRACTION).floor() as usize).clamp(1, len - 1);
        let validation_end = ((len as f64 * (TRAIN_FRACTION + VALIDATION_FRACTION)).floor()
            as usize)
            .clamp(train_end, len - 1);

        Ok(Self {
            len,
            train_end,
            validation_end,
        })
    }

    pub fn train_len(&self) -> usize {
        self.train_end
    }

    pub fn validation_len(&self) -> usize {
        self.validation_end - self.train_end
    }

    pub fn test_len(&self) -> usize {
        self.len - self.validation_end
    }
}

#[derive(Debug, Clone)]
pub struct DatasetSplit {
    pub train_x: Vec<Vec<f64>>,
    pub train_y: Vec<bool>,
    pub validation_x: Vec<Vec<f64>>,
    pub validation_y: Vec<bool>,
    pub test_x: Vec<Vec<f64>>,
    pub test_y: Vec<bool>,
    pub bounds: SplitBounds,
}

/// Raw feature matrix for unsupervised training, in chronological order
pub fn unlabeled_matrix(rows: &[FeatureRow]) -> Vec<Vec<f64>> {
    let mut sorted: Vec<&FeatureRow> = rows.iter().collect();
    sorted.sort_by_key(|r| r.open_time);
    sorted.iter().map(|r| r.sanitized_features()).collect()
}
