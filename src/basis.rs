pub use self::engine::{Engine, EngineConfig, OversoldPolicy, OversoldPolicyError};
pub use self::lot::{Consumption, Lot, LotChunk, LotLedger};
pub use self::wash::{BuyIndex, PendingWashSale, StrandedWashSale, WashSaleTracker};
pub use self::wash::WASH_SALE_WINDOW;
use crate::model::{Anomaly, Severity};
use error_iter::ErrorIter as _;
use std::fmt::Display;
use thiserror::Error;

mod engine;
mod lot;
mod wash;

#[derive(Debug, Error)]
pub enum CheckListError {
    #[error("Did not pass CheckList: {0} error(s)")]
    Failed(usize),
}

/// The checklist gates a run on its anomalies. Warnings are printed and tolerated; any error
/// fails the run after every anomaly has been printed.
pub struct CheckList<'a> {
    anomalies: &'a [Anomaly],
}

impl Display for CheckList<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "Lot CheckList")?;
        writeln!(f, "=== =========")?;
        writeln!(f)?;

        if self.anomalies.is_empty() {
            writeln!(f, "No issues detected! 🎉")?;
        }

        for anomaly in self.anomalies {
            let marker = match anomaly.severity() {
                Severity::Warning => "⚠️",
                Severity::Error => "❌",
            };
            writeln!(f, "{marker} {anomaly}")?;
            for source in anomaly.sources().skip(1) {
                writeln!(f, "     Caused by {source}")?;
            }
        }

        Ok(())
    }
}

impl<'a> CheckList<'a> {
    /// Print the checklist and fail if any anomaly is an error.
    pub fn execute(anomalies: &'a [Anomaly]) -> Result<(), CheckListError> {
        let checklist = Self { anomalies };
        println!("{checklist}");

        match checklist.error_count() {
            0 => Ok(()),
            errors => Err(CheckListError::Failed(errors)),
        }
    }

    fn error_count(&self) -> usize {
        self.anomalies
            .iter()
            .filter(|anomaly| anomaly.severity() == Severity::Error)
            .count()
    }
}
