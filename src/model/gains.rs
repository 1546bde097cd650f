use crate::basis::{LotLedger, PendingWashSale, StrandedWashSale, WashSaleTracker};
use crate::model::{Anomaly, LotKey, Quantity, TransType, UsdAmount};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt::Display};

/// Minimum holding period for long-term treatment.
pub const LONG_TERM_DAYS: i64 = 365;

#[derive(Copy, Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub enum GainTerm {
    Short,
    Long,
}

/// Gross totals for one holding-period term.
#[derive(Copy, Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct TermTotals {
    pub gross_sales: UsdAmount,
    pub gross_cost_basis: UsdAmount,
    pub gain: UsdAmount,
}

/// Running accumulators for one instrument.
///
/// Losses are negative. `disallowed_losses` is a positive magnitude and informational: it never
/// takes part in [`InstrumentTotals::net`].
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct InstrumentTotals {
    pub realized_gains: UsdAmount,
    pub realized_losses: UsdAmount,
    pub disallowed_losses: UsdAmount,
    pub gross_sales: UsdAmount,
    pub gross_cost_basis: UsdAmount,
    pub long_term: TermTotals,
    pub short_term: TermTotals,

    /// Open quantity across every lot key for this instrument.
    pub open_quantity: Quantity,
    pub open_cost_basis: UsdAmount,
}

/// One closing transaction as it was realized.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Realization {
    pub date: NaiveDate,
    pub settle_date: NaiveDate,
    pub key: LotKey,
    pub trans_type: TransType,
    pub quantity: Quantity,
    pub proceeds: UsdAmount,
    pub cost_basis: UsdAmount,

    /// `proceeds - cost_basis`, before any wash-sale deferral.
    pub net_gain_loss: UsdAmount,

    /// The part of `net_gain_loss` recognized now.
    pub realized: UsdAmount,

    /// The loss deferred into replacement lots (positive).
    pub disallowed: UsdAmount,
    pub chunks: Vec<RealizedChunk>,
}

/// The part of a realization drawn from one lot.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct RealizedChunk {
    pub quantity: Quantity,
    pub proceeds: UsdAmount,
    pub cost_basis: UsdAmount,
    pub acquired: NaiveDate,
    pub holding_days: i64,
    pub term: GainTerm,
}

/// Lots still held for a key when the run ends.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct OpenPosition {
    pub key: LotKey,
    pub lots: usize,
    pub quantity: Quantity,
    pub cost_basis: UsdAmount,
}

/// A deferral still waiting for a replacement buy when the run ends.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PendingDeferral {
    pub key: LotKey,
    pub deferral: PendingWashSale,
}

/// Everything one run of the engine produced.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Report {
    pub tax_year: Option<i32>,
    pub instruments: BTreeMap<String, InstrumentTotals>,
    pub realizations: Vec<Realization>,
    pub open_positions: Vec<OpenPosition>,
    pub pending_wash_sales: Vec<PendingDeferral>,
    pub stranded_wash_sales: Vec<StrandedWashSale>,
    pub anomalies: Vec<Anomaly>,

    /// Net realized gain or loss across all instruments.
    pub total: UsdAmount,
}

/// Per-close worksheet, one row per lot chunk.
pub struct RealizationDetails<'a> {
    realizations: &'a [Realization],
}

pub struct PositionDetails<'a> {
    positions: &'a [OpenPosition],
}

pub struct WashSaleDetails<'a> {
    pending: &'a [PendingDeferral],
    stranded: &'a [StrandedWashSale],
}

impl GainTerm {
    pub fn from_holding_days(days: i64) -> Self {
        if days >= LONG_TERM_DAYS {
            Self::Long
        } else {
            Self::Short
        }
    }
}

impl Display for GainTerm {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Short => "Short Term",
            Self::Long => "Long Term",
        })
    }
}

impl TermTotals {
    fn add(&mut self, proceeds: UsdAmount, cost_basis: UsdAmount) {
        self.gross_sales += proceeds;
        self.gross_cost_basis += cost_basis;
        self.gain += proceeds - cost_basis;
    }
}

impl InstrumentTotals {
    /// Net realized gain or loss.
    pub fn net(&self) -> UsdAmount {
        self.realized_gains + self.realized_losses
    }

    pub(crate) fn record_chunk(&mut self, chunk: &RealizedChunk) {
        self.gross_sales += chunk.proceeds;
        self.gross_cost_basis += chunk.cost_basis;

        match chunk.term {
            GainTerm::Long => self.long_term.add(chunk.proceeds, chunk.cost_basis),
            GainTerm::Short => self.short_term.add(chunk.proceeds, chunk.cost_basis),
        }
    }

    /// Record a realized amount. Gains and losses go to separate accumulators.
    pub(crate) fn record_realized(&mut self, amount: UsdAmount) {
        if amount.is_negative() {
            self.realized_losses += amount;
        } else {
            self.realized_gains += amount;
        }
    }

    pub(crate) fn record_disallowed(&mut self, loss: UsdAmount) {
        self.disallowed_losses += loss;
    }

    /// Move a previously disallowed loss into realized losses.
    pub(crate) fn release_disallowed(&mut self, loss: UsdAmount) {
        self.disallowed_losses -= loss;
        self.realized_losses -= loss;
    }
}

impl Report {
    /// Fold the engine's final state into a report.
    pub fn aggregate(
        tax_year: Option<i32>,
        mut instruments: BTreeMap<String, InstrumentTotals>,
        realizations: Vec<Realization>,
        lots: &LotLedger,
        wash_sales: &WashSaleTracker,
        stranded_wash_sales: Vec<StrandedWashSale>,
        anomalies: Vec<Anomaly>,
    ) -> Self {
        let open_positions: Vec<_> = lots
            .positions()
            .map(|(key, fifo)| OpenPosition {
                key: key.clone(),
                lots: fifo.len(),
                quantity: fifo.iter().map(|lot| lot.quantity).sum(),
                cost_basis: fifo.iter().map(|lot| lot.total_cost()).sum(),
            })
            .collect();

        for position in &open_positions {
            let totals = instruments.entry(position.key.instrument.clone()).or_default();
            totals.open_quantity += position.quantity;
            totals.open_cost_basis += position.cost_basis;
        }

        let pending_wash_sales = wash_sales
            .pending()
            .flat_map(|(key, pending)| {
                pending.iter().map(|deferral| PendingDeferral {
                    key: key.clone(),
                    deferral: deferral.clone(),
                })
            })
            .collect();

        let total = instruments.values().map(InstrumentTotals::net).sum();

        Self {
            tax_year,
            instruments,
            realizations,
            open_positions,
            pending_wash_sales,
            stranded_wash_sales,
            anomalies,
            total,
        }
    }

    pub fn realization_details(&self) -> Option<RealizationDetails<'_>> {
        (!self.realizations.is_empty()).then_some(RealizationDetails {
            realizations: &self.realizations,
        })
    }

    pub fn position_details(&self) -> Option<PositionDetails<'_>> {
        (!self.open_positions.is_empty()).then_some(PositionDetails {
            positions: &self.open_positions,
        })
    }

    pub fn wash_sale_details(&self) -> Option<WashSaleDetails<'_>> {
        (!self.pending_wash_sales.is_empty() || !self.stranded_wash_sales.is_empty()).then_some(
            WashSaleDetails {
                pending: &self.pending_wash_sales,
                stranded: &self.stranded_wash_sales,
            },
        )
    }
}

/// Per-instrument sums followed by a grand total row.
impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Write the CSV header
        writeln!(
            f,
            concat!(
                // Columns A-E
                r#""Instrument","Net Gain/Loss","Realized Gains","Realized Losses","Disallowed Losses","#,
                // Columns F-G
                r#""Gross Sales","Gross Cost Basis","#,
                // Columns H-J
                r#""Long Term Sales","Long Term Cost Basis","Long Term Gain","#,
                // Columns K-M
                r#""Short Term Sales","Short Term Cost Basis","Short Term Gain","#,
                // Columns N-O
                r#""Open Quantity","Open Cost Basis""#,
            )
        )?;

        for (instrument, totals) in &self.instruments {
            writeln!(f, r#""{instrument}",{totals}"#)?;
        }

        // Unlabeled columns are left empty so the row lines up with the table.
        writeln!(f, r#""Total","{}","","","","","","","","","","","","","""#, self.total)
    }
}

impl Display for InstrumentTotals {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Columns B-E
        write!(
            f,
            r#""{net}","{gains}","{losses}","{disallowed}","#,
            net = self.net(),
            gains = self.realized_gains,
            losses = self.realized_losses,
            disallowed = self.disallowed_losses,
        )?;
        // Columns F-G
        write!(
            f,
            r#""{sales}","{cost_basis}","#,
            sales = self.gross_sales,
            cost_basis = self.gross_cost_basis,
        )?;
        // Columns H-M
        for term in [&self.long_term, &self.short_term] {
            write!(
                f,
                r#""{}","{}","{}","#,
                term.gross_sales, term.gross_cost_basis, term.gain,
            )?;
        }
        // Columns N-O
        write!(
            f,
            r#""{quantity}","{cost_basis}""#,
            quantity = self.open_quantity,
            cost_basis = self.open_cost_basis,
        )
    }
}

impl Display for RealizationDetails<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Write the CSV header
        writeln!(
            f,
            concat!(
                // Columns A-E
                r#""Date","Settle Date","Lot Key","Type","Quantity","#,
                // Columns F-H
                r#""Proceeds","Cost Basis","Net Gain/Loss","#,
                // Columns I-J
                r#""Realized","Disallowed","#,
                // Columns K-M
                r#""Acquired","Holding Days","Term""#,
            )
        )?;

        // A realization row carries the close totals, followed by one row per lot chunk.
        for realization in self.realizations {
            writeln!(
                f,
                r#""{date}","{settle}","{key}","{trans_type}","{quantity}","{proceeds}","{cost_basis}","{net}","{realized}","{disallowed}","","","""#,
                date = realization.date,
                settle = realization.settle_date,
                key = realization.key,
                trans_type = realization.trans_type,
                quantity = realization.quantity,
                proceeds = realization.proceeds,
                cost_basis = realization.cost_basis,
                net = realization.net_gain_loss,
                realized = realization.realized,
                disallowed = realization.disallowed,
            )?;

            for chunk in &realization.chunks {
                writeln!(
                    f,
                    r#""","","","","{quantity}","{proceeds}","{cost_basis}","{gain}","","","{acquired}","{days}","{term}""#,
                    quantity = chunk.quantity,
                    proceeds = chunk.proceeds,
                    cost_basis = chunk.cost_basis,
                    gain = chunk.proceeds - chunk.cost_basis,
                    acquired = chunk.acquired,
                    days = chunk.holding_days,
                    term = chunk.term,
                )?;
            }
        }

        Ok(())
    }
}

impl Display for PositionDetails<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, r#""Lot Key","Lots","Quantity","Cost Basis""#)?;

        for position in self.positions {
            writeln!(
                f,
                r#""{}","{}","{}","{}""#,
                position.key, position.lots, position.quantity, position.cost_basis,
            )?;
        }

        Ok(())
    }
}

impl Display for WashSaleDetails<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(
            f,
            concat!(
                r#""Status","Lot Key","Sale Date","Expiration","#,
                r#""Remaining Quantity","Loss Per Share","Remaining Loss""#,
            )
        )?;

        let pending = self
            .pending
            .iter()
            .map(|row| ("Pending", &row.key, &row.deferral));
        let stranded = self.stranded.iter().map(|row| {
            let status = if row.realized {
                "Expired (Realized)"
            } else {
                "Expired"
            };
            (status, &row.key, &row.deferral)
        });

        for (status, key, deferral) in pending.chain(stranded) {
            writeln!(
                f,
                r#""{status}","{key}","{sale}","{expiration}","{quantity}","{per_share}","{loss}""#,
                sale = deferral.sale_date,
                expiration = deferral.expiration,
                quantity = deferral.remaining_qty,
                per_share = deferral.loss_per_share,
                loss = deferral.remaining_loss(),
            )?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Lot;
    use rust_decimal::Decimal;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%F").unwrap()
    }

    fn usd(n: i64) -> UsdAmount {
        UsdAmount::from(Decimal::from(n))
    }

    fn qty(n: i64) -> Quantity {
        Quantity::from(Decimal::from(n))
    }

    #[test]
    fn holding_period_boundary() {
        assert_eq!(GainTerm::from_holding_days(364), GainTerm::Short);
        assert_eq!(GainTerm::from_holding_days(365), GainTerm::Long);
    }

    #[test]
    fn net_excludes_disallowed() {
        let mut totals = InstrumentTotals::default();
        totals.record_realized(usd(300));
        totals.record_realized(usd(-600));
        totals.record_disallowed(usd(400));

        assert_eq!(totals.realized_gains, usd(300));
        assert_eq!(totals.realized_losses, usd(-600));
        assert_eq!(totals.net(), usd(-300));

        totals.release_disallowed(usd(100));
        assert_eq!(totals.disallowed_losses, usd(300));
        assert_eq!(totals.net(), usd(-400));
    }

    #[test]
    fn aggregate_folds_open_positions_and_total() {
        let mut lots = LotLedger::new();
        lots.append(
            &LotKey::equity("ACME"),
            Lot::new(qty(10), usd(5), date("2023-01-02")),
        );
        lots.append(
            &LotKey::option("ACME", "ACME 1/19/2024 Call $10.00"),
            Lot::new(qty(2), usd(100), date("2023-01-02")),
        );

        let mut instruments = BTreeMap::new();
        let mut acme = InstrumentTotals::default();
        acme.record_realized(usd(250));
        instruments.insert("ACME".to_string(), acme);
        let mut zeta = InstrumentTotals::default();
        zeta.record_realized(usd(-75));
        instruments.insert("ZETA".to_string(), zeta);

        let report = Report::aggregate(
            Some(2023),
            instruments,
            Vec::new(),
            &lots,
            &WashSaleTracker::new(),
            Vec::new(),
            Vec::new(),
        );

        assert_eq!(report.total, usd(175));
        assert_eq!(report.open_positions.len(), 2);
        assert_eq!(report.instruments["ACME"].open_quantity, qty(12));
        assert_eq!(report.instruments["ACME"].open_cost_basis, usd(250));
        assert!(report.realization_details().is_none());
        assert!(report.wash_sale_details().is_none());

        let summary = report.to_string();
        let mut lines = summary.lines().skip(1);
        assert_eq!(
            lines.next(),
            Some(r#""ACME","250.00","250.00","0.00","0.00","0.00","0.00","0.00","0.00","0.00","0.00","0.00","0.00","12","250.00""#),
        );
        assert_eq!(
            lines.last(),
            Some(r#""Total","175.00","","","","","","","","","","","","","""#),
        );
    }
}
