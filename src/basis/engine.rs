use crate::basis::{BuyIndex, Lot, LotLedger, StrandedWashSale, WashSaleTracker};
use crate::model::{Anomaly, GainTerm, InstrumentTotals, LotKey, Quantity, Realization};
use crate::model::{RealizedChunk, Report, Resolution, Severity, State, TransType};
use crate::model::{Transaction, UsdAmount};
use chrono::{Datelike as _, NaiveDate};
use std::{collections::BTreeMap, str::FromStr};
use thiserror::Error;
use tracing::{debug, error, info, warn};

#[derive(Debug, Error)]
#[error("Unknown oversold policy `{0}`, expected `reject` or `clamp`")]
pub struct OversoldPolicyError(String);

/// What to do with a close that asks for more than the open lots hold.
#[derive(Copy, Clone, Debug, Default, Eq, PartialEq)]
pub enum OversoldPolicy {
    /// Skip the close entirely and report an error.
    #[default]
    Reject,

    /// Consume what is open and treat the remainder as zero-cost shares bought on the close date.
    Clamp,
}

#[derive(Clone, Debug, Default)]
pub struct EngineConfig {
    /// Only closes settling in this year update totals and the worksheet.
    pub tax_year: Option<i32>,
    pub oversold: OversoldPolicy,

    /// Move expired, unabsorbed wash-sale deferrals back into realized losses.
    pub realize_expired_deferrals: bool,
}

/// Drives the lot ledger and wash-sale tracker over one ordered transaction stream.
#[derive(Debug)]
pub struct Engine {
    config: EngineConfig,
    lots: LotLedger,
    wash_sales: WashSaleTracker,
    instruments: BTreeMap<String, InstrumentTotals>,
    realizations: Vec<Realization>,
    stranded: Vec<StrandedWashSale>,
    anomalies: Vec<Anomaly>,
    resumed_after: Option<NaiveDate>,
    latest_row_date: Option<NaiveDate>,
}

impl FromStr for OversoldPolicy {
    type Err = OversoldPolicyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reject" => Ok(Self::Reject),
            "clamp" => Ok(Self::Clamp),
            _ => Err(OversoldPolicyError(s.to_string())),
        }
    }
}

impl EngineConfig {
    fn in_tax_year(&self, date: NaiveDate) -> bool {
        self.tax_year.is_none_or(|year| date.year() == year)
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        Self::from_state(config, State::default())
    }

    /// Continue from the open lots and pending deferrals of a previous run.
    pub fn from_state(config: EngineConfig, state: State) -> Self {
        let resumed_after = state.latest_row_date();

        Self {
            config,
            lots: state.lots,
            wash_sales: state.wash_sales,
            instruments: BTreeMap::new(),
            realizations: Vec::new(),
            stranded: Vec::new(),
            anomalies: Vec::new(),
            resumed_after,
            latest_row_date: resumed_after,
        }
    }

    /// Process `transactions`, which must be in processing order, and produce the report together
    /// with the state to carry forward.
    pub fn run(mut self, transactions: &[Transaction]) -> (Report, State) {
        if let (Some(resumed_after), Some(first)) = (self.resumed_after, transactions.first()) {
            if first.date < resumed_after {
                warn!(
                    "Checkpoint already covers activity through {resumed_after}, \
                    but input starts on {}",
                    first.date,
                );
            }
        }

        let buys = BuyIndex::new(transactions);

        for (ordinal, tx) in transactions.iter().enumerate() {
            debug!(
                "Processing #{ordinal}: {} {} {} on {}",
                tx.trans_type,
                tx.quantity,
                tx.key(),
                tx.date,
            );

            self.sweep_expired(tx.date);

            if tx.is_buy() {
                self.handle_buy(tx);
            } else {
                self.handle_close(ordinal, tx, &buys);
            }

            self.latest_row_date = self.latest_row_date.max(Some(tx.date));
        }

        info!(
            "Processed {} transactions: {} realizations, {} anomalies",
            transactions.len(),
            self.realizations.len(),
            self.anomalies.len(),
        );

        let report = Report::aggregate(
            self.config.tax_year,
            self.instruments,
            self.realizations,
            &self.lots,
            &self.wash_sales,
            self.stranded,
            self.anomalies,
        );
        let state = State::new(self.lots, self.wash_sales, self.latest_row_date);

        (report, state)
    }

    fn handle_buy(&mut self, tx: &Transaction) {
        let key = tx.key();

        if tx.quantity.is_zero() {
            self.record(Anomaly::ZeroQuantityBuy { key, date: tx.date });
            return;
        }

        let total_cost = tx.amount.abs();
        let adjustment = self.wash_sales.apply_to_buy(&key, tx.date, tx.quantity);
        if !adjustment.is_zero() {
            debug!(
                "Adding {adjustment} of disallowed losses to {key} bought on {}",
                tx.date,
            );
        }

        // A nonzero quantity always has a per-unit price.
        let price = (total_cost + adjustment)
            .per_unit(tx.quantity)
            .unwrap_or_default();
        self.lots.append(&key, Lot::new(tx.quantity, price, tx.date));
    }

    fn handle_close(&mut self, ordinal: usize, tx: &Transaction, buys: &BuyIndex) {
        let key = tx.key();
        let available = self.lots.open_quantity(&key);

        let resolution = match self.config.oversold {
            OversoldPolicy::Reject => Resolution::Rejected,
            OversoldPolicy::Clamp => Resolution::Clamped,
        };

        // An expiration without a quantity closes all open interest.
        let unspecified_expiration =
            tx.quantity.is_zero() && tx.trans_type == TransType::OptionExpire;
        let quantity = if unspecified_expiration {
            available
        } else {
            tx.quantity
        };

        if quantity.is_zero() {
            let anomaly = if unspecified_expiration {
                // Nothing is open to expire. Clamping has nothing to realize either.
                Anomaly::UnmatchedClose {
                    key,
                    date: tx.date,
                    quantity,
                    resolution,
                }
            } else {
                Anomaly::ZeroQuantityClose { key, date: tx.date }
            };
            self.record(anomaly);
            return;
        }

        if quantity > available {
            let anomaly = if available.is_zero() {
                Anomaly::UnmatchedClose {
                    key: key.clone(),
                    date: tx.date,
                    quantity,
                    resolution,
                }
            } else {
                Anomaly::OversoldPosition {
                    key: key.clone(),
                    date: tx.date,
                    requested: quantity,
                    available,
                    resolution,
                }
            };
            self.record(anomaly);

            if resolution == Resolution::Rejected {
                return;
            }
        }

        let proceeds = tx.amount;
        let chunks = self.consume(&key, quantity, proceeds, tx.date);
        let cost_basis: UsdAmount = chunks.iter().map(|chunk| chunk.cost_basis).sum();
        let net_gain_loss = proceeds - cost_basis;

        // Lookback only sees lots left over after this close consumed its own.
        let replacement = buys.replacement_quantity(&self.lots, &key, ordinal, tx.date, quantity);

        let mut disallowed = UsdAmount::ZERO;
        if net_gain_loss.is_negative() && replacement.is_positive() {
            let deferred_qty = quantity.min(replacement);
            let loss = net_gain_loss.abs();
            let loss_per_share = loss.per_unit(quantity).unwrap_or_default();

            disallowed = loss.prorate(deferred_qty, quantity);
            self.wash_sales
                .defer(&key, deferred_qty, loss_per_share, tx.date, tx.settle_date);
        }
        let realized = net_gain_loss + disallowed;

        if !self.config.in_tax_year(tx.settle_date) {
            debug!("{key} close on {} settles outside the tax year", tx.date);
            return;
        }

        let totals = self.instruments.entry(tx.instrument.clone()).or_default();
        for chunk in &chunks {
            totals.record_chunk(chunk);
        }
        totals.record_realized(realized);
        totals.record_disallowed(disallowed);

        self.realizations.push(Realization {
            date: tx.date,
            settle_date: tx.settle_date,
            key,
            trans_type: tx.trans_type,
            quantity,
            proceeds,
            cost_basis,
            net_gain_loss,
            realized,
            disallowed,
            chunks,
        });
    }

    /// Consume lots for a close and split `proceeds` across them by quantity.
    fn consume(
        &mut self,
        key: &LotKey,
        quantity: Quantity,
        proceeds: UsdAmount,
        date: NaiveDate,
    ) -> Vec<RealizedChunk> {
        let consumption = self.lots.consume(key, quantity);

        let mut parts: Vec<_> = consumption
            .chunks
            .into_iter()
            .map(|chunk| (chunk.quantity, chunk.cost_basis, chunk.acquired))
            .collect();
        if consumption.shortfall.is_positive() {
            // Clamped remainder: zero cost, acquired on the close date.
            parts.push((consumption.shortfall, UsdAmount::ZERO, date));
        }

        let mut remaining = proceeds;
        let last = parts.len().saturating_sub(1);

        parts
            .into_iter()
            .enumerate()
            .map(|(i, (chunk_qty, cost_basis, acquired))| {
                // The last chunk takes the remainder so chunk proceeds add up exactly.
                let chunk_proceeds = if i == last {
                    remaining
                } else {
                    proceeds.prorate(chunk_qty, quantity)
                };
                remaining -= chunk_proceeds;

                let holding_days = (date - acquired).num_days();

                RealizedChunk {
                    quantity: chunk_qty,
                    proceeds: chunk_proceeds,
                    cost_basis,
                    acquired,
                    holding_days,
                    term: GainTerm::from_holding_days(holding_days),
                }
            })
            .collect()
    }

    /// Move deferrals that can no longer attach to a buy on `date` to the stranded list.
    fn sweep_expired(&mut self, date: NaiveDate) {
        for (key, deferral) in self.wash_sales.expire(date) {
            let loss = deferral.remaining_loss();
            let realized = self.config.realize_expired_deferrals
                && self.config.in_tax_year(deferral.settle_date);

            if realized {
                self.instruments
                    .entry(key.instrument.clone())
                    .or_default()
                    .release_disallowed(loss);
                info!(
                    "Wash sale deferral for {key} from {} expired, realizing {loss}",
                    deferral.sale_date,
                );
            } else {
                warn!(
                    "Wash sale deferral for {key} from {} expired with {loss} unabsorbed",
                    deferral.sale_date,
                );
            }

            self.stranded.push(StrandedWashSale {
                key,
                deferral,
                realized,
            });
        }
    }

    fn record(&mut self, anomaly: Anomaly) {
        match anomaly.severity() {
            Severity::Error => error!("{anomaly}"),
            Severity::Warning => warn!("{anomaly}"),
        }
        self.anomalies.push(anomaly);
    }
}
