use crate::model::{LotKey, Quantity};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// How a closing transaction without enough open lots was handled.
#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum Resolution {
    /// The transaction was not applied.
    Rejected,

    /// The available lots were consumed and the remainder treated as zero-cost.
    Clamped,
}

#[derive(Copy, Clone, Debug, Eq, Ord, PartialEq, PartialOrd)]
pub enum Severity {
    Warning,
    Error,
}

/// Something in the input that the engine could not account for exactly.
///
/// Anomalies are collected over the whole run rather than aborting it, so that every problem
/// in a ledger can be reported at once.
#[derive(Clone, Debug, Deserialize, Eq, Error, PartialEq, Serialize)]
pub enum Anomaly {
    #[error("{key} on {date}: quantity `{raw}` is not a number, treated as zero")]
    MalformedQuantity {
        key: LotKey,
        date: NaiveDate,
        raw: String,
    },

    #[error("{key} on {date}: closing {requested} with only {available} open ({resolution})")]
    OversoldPosition {
        key: LotKey,
        date: NaiveDate,
        requested: Quantity,
        available: Quantity,
        resolution: Resolution,
    },

    #[error("{key} on {date}: closing {quantity} with no open lots ({resolution})")]
    UnmatchedClose {
        key: LotKey,
        date: NaiveDate,
        quantity: Quantity,
        resolution: Resolution,
    },

    #[error("{key} on {date}: buy has zero quantity, no lot created")]
    ZeroQuantityBuy { key: LotKey, date: NaiveDate },

    #[error("{key} on {date}: close has zero quantity, skipped")]
    ZeroQuantityClose { key: LotKey, date: NaiveDate },

    #[error("{instrument} on {date}: unsupported transaction code `{code}`, skipped")]
    UnsupportedCode {
        instrument: String,
        date: NaiveDate,
        code: String,
    },
}

impl Anomaly {
    pub fn severity(&self) -> Severity {
        match self {
            Self::OversoldPosition { resolution, .. } | Self::UnmatchedClose { resolution, .. } => {
                match resolution {
                    Resolution::Rejected => Severity::Error,
                    Resolution::Clamped => Severity::Warning,
                }
            }
            Self::MalformedQuantity { .. }
            | Self::ZeroQuantityBuy { .. }
            | Self::ZeroQuantityClose { .. }
            | Self::UnsupportedCode { .. } => Severity::Warning,
        }
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Rejected => "rejected",
            Self::Clamped => "clamped",
        })
    }
}
