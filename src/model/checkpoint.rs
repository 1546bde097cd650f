use crate::basis::{LotLedger, WashSaleTracker};
use chrono::{NaiveDate, Utc};
use ron::{de::SpannedError, ser::PrettyConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

pub const CHECKPOINT_VERSION: &str = "1.0.0";

#[derive(Debug, Error)]
pub enum CheckpointError {
    #[error("I/O error")]
    Io(#[from] std::io::Error),

    #[error("Unable to deserialize")]
    Deserialize(#[from] SpannedError),

    #[error("Unable to serialize")]
    Serialize(#[from] ron::Error),

    #[error("Expected version `{CHECKPOINT_VERSION}`, found `{0}`")]
    Version(String),
}

/// State for carrying open lots and pending wash sales across tax years.
#[derive(Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct State {
    pub(crate) header: CheckpointHeader,

    /// Open lots with their cost basis, per lot key.
    pub lots: LotLedger,

    /// Disallowed losses that have not found a replacement buy yet.
    pub wash_sales: WashSaleTracker,
}

/// Header for checkpoints.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CheckpointHeader {
    /// When the checkpoint was saved.
    pub time: String,

    /// Checkpoint version.
    pub semver: String,

    /// Date of the most recent transaction processed.
    pub latest_row_date: Option<NaiveDate>,
}

impl Default for CheckpointHeader {
    fn default() -> Self {
        Self {
            time: format!("{}", Utc::now().format("%F %T")),
            semver: CHECKPOINT_VERSION.to_string(),
            latest_row_date: None,
        }
    }
}

impl State {
    pub fn new(
        lots: LotLedger,
        wash_sales: WashSaleTracker,
        latest_row_date: Option<NaiveDate>,
    ) -> Self {
        Self {
            header: CheckpointHeader {
                latest_row_date,
                ..Default::default()
            },
            lots,
            wash_sales,
        }
    }

    pub fn latest_row_date(&self) -> Option<NaiveDate> {
        self.header.latest_row_date
    }

    /// Load a `State` from the given path.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, CheckpointError> {
        let serialized = std::fs::read_to_string(path)?;

        Self::from_ron(&serialized)
    }

    /// Save a `State` to the given path.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), CheckpointError> {
        std::fs::write(path, self.to_ron()?)?;

        Ok(())
    }

    fn from_ron(serialized: &str) -> Result<Self, CheckpointError> {
        let state: State = ron::from_str(serialized)?;

        // Validate header.
        if state.header.semver == CHECKPOINT_VERSION {
            Ok(state)
        } else {
            Err(CheckpointError::Version(state.header.semver))
        }
    }

    fn to_ron(&self) -> Result<String, CheckpointError> {
        Ok(ron::ser::to_string_pretty(self, PrettyConfig::default())?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Lot;
    use crate::model::LotKey;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%F").unwrap()
    }

    #[test]
    fn checkpoint_round_trip_keeps_lots_and_deferrals() {
        let key = LotKey::option("SPY", "SPY 3/17/2023 Put $390.00");
        let mut lots = LotLedger::new();
        lots.append(
            &key,
            Lot::new("2".parse().unwrap(), "155.5".parse().unwrap(), date("2023-03-01")),
        );
        let mut wash_sales = WashSaleTracker::new();
        wash_sales.defer(
            &key,
            "1".parse().unwrap(),
            "40".parse().unwrap(),
            date("2023-03-02"),
            date("2023-03-03"),
        );

        let state = State::new(lots, wash_sales, Some(date("2023-03-02")));
        let loaded = State::from_ron(&state.to_ron().unwrap()).unwrap();

        assert_eq!(loaded.lots, state.lots);
        assert_eq!(loaded.wash_sales, state.wash_sales);
        assert_eq!(loaded.latest_row_date(), Some(date("2023-03-02")));
    }

    #[test]
    fn checkpoint_version_mismatch() {
        let serialized = State::default()
            .to_ron()
            .unwrap()
            .replace(CHECKPOINT_VERSION, "0.0.1");

        assert!(matches!(
            State::from_ron(&serialized),
            Err(CheckpointError::Version(version)) if version == "0.0.1",
        ));
    }
}
