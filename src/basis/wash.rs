use crate::basis::LotLedger;
use crate::model::{LotKey, Quantity, Transaction, UsdAmount};
use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Days on each side of a loss sale in which a purchase counts as a replacement.
pub const WASH_SALE_WINDOW: Days = Days::new(30);

/// A disallowed loss waiting for a replacement purchase to absorb it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct PendingWashSale {
    /// Shares or contracts whose loss has not been attached to a new lot yet.
    pub remaining_qty: Quantity,
    pub loss_per_share: UsdAmount,

    /// Last day a buy can absorb this deferral.
    pub expiration: NaiveDate,

    /// Trade date of the loss sale.
    pub sale_date: NaiveDate,

    /// Settlement date of the loss sale, which decides its tax year.
    pub settle_date: NaiveDate,
}

/// A deferral that expired before any buy absorbed all of it.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct StrandedWashSale {
    pub key: LotKey,
    pub deferral: PendingWashSale,

    /// Whether the stranded loss was moved back into realized losses.
    pub realized: bool,
}

/// Pending deferrals per [`LotKey`], in creation order.
#[derive(Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
#[serde(transparent)]
pub struct WashSaleTracker {
    pending: BTreeMap<LotKey, Vec<PendingWashSale>>,
}

/// Every buy in the transaction stream, indexed per key for the lookahead window.
///
/// Entries are kept in stream order. The stream is sorted by date first, so both the ordinal and
/// the date columns are ascending and can be binary searched.
#[derive(Debug, Default)]
pub struct BuyIndex {
    buys: BTreeMap<LotKey, Vec<BuyEntry>>,
}

#[derive(Debug)]
struct BuyEntry {
    ordinal: usize,
    date: NaiveDate,
    quantity: Quantity,
}

impl PendingWashSale {
    pub fn remaining_loss(&self) -> UsdAmount {
        self.loss_per_share.times(self.remaining_qty)
    }
}

impl WashSaleTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a deferred loss for `quantity` shares of `key`.
    ///
    /// The deferral can attach to buys up to 30 days after `sale_date`, inclusive.
    pub fn defer(
        &mut self,
        key: &LotKey,
        quantity: Quantity,
        loss_per_share: UsdAmount,
        sale_date: NaiveDate,
        settle_date: NaiveDate,
    ) {
        if !quantity.is_positive() {
            return;
        }

        let expiration = sale_date + WASH_SALE_WINDOW;
        debug!("Deferring loss of {loss_per_share}/share on {quantity} of {key} until {expiration}");

        self.pending
            .entry(key.clone())
            .or_default()
            .push(PendingWashSale {
                remaining_qty: quantity,
                loss_per_share,
                expiration,
                sale_date,
                settle_date,
            });
    }

    /// Absorb pending deferrals into a buy of `buy_quantity` shares on `buy_date`.
    ///
    /// Returns the total cost-basis adjustment for the new lot. Each replacement share absorbs at
    /// most one deferred share, oldest deferral first.
    pub fn apply_to_buy(
        &mut self,
        key: &LotKey,
        buy_date: NaiveDate,
        buy_quantity: Quantity,
    ) -> UsdAmount {
        let Some(pending) = self.pending.get_mut(key) else {
            return UsdAmount::ZERO;
        };

        let mut capacity = buy_quantity;
        let mut adjustment = UsdAmount::ZERO;

        for deferral in pending.iter_mut() {
            if !capacity.is_positive() {
                break;
            }
            if deferral.expiration < buy_date {
                continue;
            }

            let absorbed = capacity.min(deferral.remaining_qty);
            adjustment += deferral.loss_per_share.times(absorbed);
            deferral.remaining_qty -= absorbed;
            capacity -= absorbed;
        }

        pending.retain(|deferral| deferral.remaining_qty.is_positive());
        if pending.is_empty() {
            self.pending.remove(key);
        }

        adjustment
    }

    /// Remove every deferral that can no longer attach to a buy on or after `as_of`.
    pub fn expire(&mut self, as_of: NaiveDate) -> Vec<(LotKey, PendingWashSale)> {
        let mut expired = Vec::new();

        self.pending.retain(|key, pending| {
            let (gone, live): (Vec<_>, Vec<_>) = std::mem::take(pending)
                .into_iter()
                .partition(|deferral| deferral.expiration < as_of);
            *pending = live;
            expired.extend(gone.into_iter().map(|deferral| (key.clone(), deferral)));

            !pending.is_empty()
        });

        expired
    }

    /// Deferrals still waiting for a replacement, per key.
    pub fn pending(&self) -> impl Iterator<Item = (&LotKey, &[PendingWashSale])> {
        self.pending
            .iter()
            .map(|(key, pending)| (key, pending.as_slice()))
    }

    pub fn pending_for(&self, key: &LotKey) -> &[PendingWashSale] {
        self.pending.get(key).map(Vec::as_slice).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

impl BuyIndex {
    /// Index every buy in `transactions`, which must already be in processing order.
    pub fn new(transactions: &[Transaction]) -> Self {
        let mut buys: BTreeMap<LotKey, Vec<BuyEntry>> = BTreeMap::new();

        for (ordinal, tx) in transactions.iter().enumerate() {
            if tx.is_buy() {
                buys.entry(tx.key()).or_default().push(BuyEntry {
                    ordinal,
                    date: tx.date,
                    quantity: tx.quantity,
                });
            }
        }

        Self { buys }
    }

    /// Quantity bought for `key` after stream position `ordinal` and on or before `until`.
    ///
    /// Position decides, not date: a buy on the same day as the close but later in the stream
    /// counts, and a same-day buy earlier in the stream does not.
    pub fn quantity_after(&self, key: &LotKey, ordinal: usize, until: NaiveDate) -> Quantity {
        let Some(entries) = self.buys.get(key) else {
            return Quantity::ZERO;
        };

        let start = entries.partition_point(|entry| entry.ordinal <= ordinal);
        let end = entries.partition_point(|entry| entry.date <= until);

        entries
            .get(start..end)
            .unwrap_or_default()
            .iter()
            .map(|entry| entry.quantity)
            .sum()
    }

    /// How many of the `quantity` shares closed at stream position `ordinal` have a replacement.
    ///
    /// Counts lots of `key` still open after the close that were acquired in the 30 days up to and
    /// including `date` (capped at `quantity`), plus buys later in the stream dated within 30 days
    /// after `date`. Must be called after the close has consumed its lots, so the lots being sold
    /// never stand in as their own replacement.
    pub fn replacement_quantity(
        &self,
        lots: &LotLedger,
        key: &LotKey,
        ordinal: usize,
        date: NaiveDate,
        quantity: Quantity,
    ) -> Quantity {
        let on_hand = lots
            .quantity_acquired_between(key, date - WASH_SALE_WINDOW, date)
            .min(quantity);
        let upcoming = self.quantity_after(key, ordinal, date + WASH_SALE_WINDOW);

        on_hand + upcoming
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::basis::Lot;
    use crate::model::TransType;
    use rust_decimal::Decimal;

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%F").unwrap()
    }

    fn qty(n: i64) -> Quantity {
        Quantity::from(Decimal::from(n))
    }

    fn usd(n: i64) -> UsdAmount {
        UsdAmount::from(Decimal::from(n))
    }

    fn buy(day: &str, instrument: &str, quantity: i64) -> Transaction {
        Transaction {
            seq: 0,
            date: date(day),
            process_date: date(day),
            settle_date: date(day),
            instrument: instrument.to_string(),
            trans_type: TransType::Buy,
            quantity: qty(quantity),
            amount: usd(-quantity),
            description: String::new(),
        }
    }

    #[test]
    fn deferral_expires_thirty_days_after_sale() {
        let key = LotKey::equity("ACME");
        let mut tracker = WashSaleTracker::new();
        tracker.defer(&key, qty(10), usd(5), date("2023-01-10"), date("2023-01-12"));

        assert_eq!(tracker.pending_for(&key)[0].expiration, date("2023-02-09"));

        // Still attachable on the expiration day itself.
        assert!(tracker.expire(date("2023-02-09")).is_empty());

        let expired = tracker.expire(date("2023-02-10"));
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0, key);
        assert!(tracker.is_empty());
    }

    #[test]
    fn apply_to_buy_absorbs_oldest_first() {
        let key = LotKey::equity("ACME");
        let mut tracker = WashSaleTracker::new();
        tracker.defer(&key, qty(10), usd(5), date("2023-01-10"), date("2023-01-12"));
        tracker.defer(&key, qty(10), usd(2), date("2023-01-11"), date("2023-01-13"));

        // 10 shares at $5, then 5 shares at $2.
        let adjustment = tracker.apply_to_buy(&key, date("2023-01-20"), qty(15));
        assert_eq!(adjustment, usd(60));

        let pending = tracker.pending_for(&key);
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].remaining_qty, qty(5));
        assert_eq!(pending[0].loss_per_share, usd(2));
    }

    #[test]
    fn apply_to_buy_skips_expired_and_other_keys() {
        let key = LotKey::equity("ACME");
        let mut tracker = WashSaleTracker::new();
        tracker.defer(&key, qty(10), usd(5), date("2023-01-01"), date("2023-01-03"));

        assert_eq!(
            tracker.apply_to_buy(&LotKey::equity("OTHER"), date("2023-01-05"), qty(10)),
            UsdAmount::ZERO,
        );
        assert_eq!(
            tracker.apply_to_buy(&key, date("2023-02-01"), qty(10)),
            UsdAmount::ZERO,
        );
        assert_eq!(tracker.pending_for(&key)[0].remaining_qty, qty(10));
    }

    #[test]
    fn lookahead_counts_only_later_buys_in_window() {
        let transactions = vec![
            buy("2023-01-01", "ACME", 7),
            buy("2023-01-10", "ACME", 100),
            buy("2023-01-10", "ACME", 3),
            buy("2023-01-15", "OTHER", 9),
            buy("2023-02-09", "ACME", 20),
            buy("2023-02-10", "ACME", 50),
        ];
        let index = BuyIndex::new(&transactions);
        let key = LotKey::equity("ACME");

        // A close positioned right after the second row sees the 3 and the 20 only.
        let upcoming = index.quantity_after(&key, 1, date("2023-01-10") + WASH_SALE_WINDOW);
        assert_eq!(upcoming, qty(23));
        assert_eq!(
            index.quantity_after(&LotKey::equity("NONE"), 0, date("2023-12-31")),
            Quantity::ZERO,
        );
    }

    #[test]
    fn lookback_counts_open_lots_in_window_capped_at_close() {
        let key = LotKey::equity("ACME");
        let mut lots = LotLedger::new();
        lots.append(&key, Lot::new(qty(100), usd(50), date("2022-11-01")));
        lots.append(&key, Lot::new(qty(40), usd(45), date("2023-01-02")));
        let index = BuyIndex::default();

        let consumption = lots.consume(&key, qty(100));
        assert!(consumption.shortfall.is_zero());

        let replacement =
            index.replacement_quantity(&lots, &key, 2, date("2023-01-11"), qty(100));
        assert_eq!(replacement, qty(40));

        let replacement = index.replacement_quantity(&lots, &key, 2, date("2023-01-11"), qty(25));
        assert_eq!(replacement, qty(25));
    }
}
