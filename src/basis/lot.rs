use crate::model::{LotKey, Quantity, UsdAmount};
use crate::util::{fifo::FIFO, HasSplit};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::{cmp::Ordering, collections::BTreeMap};
use tracing::trace;

/// A batch of shares or contracts acquired in one transaction.
///
/// We are deliberately NOT implementing Clone so a lot cannot be consumed twice. Lots only
/// move between the ledger queue and a consumption result.
#[derive(Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Lot {
    /// Remaining quantity. Always positive while the lot is queued.
    pub quantity: Quantity,

    /// Per-unit cost basis, including any wash-sale adjustment applied at purchase.
    pub price: UsdAmount,

    /// Acquisition date.
    pub date: NaiveDate,
}

/// The part of a lot consumed by a closing transaction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LotChunk {
    pub quantity: Quantity,
    pub cost_basis: UsdAmount,
    pub acquired: NaiveDate,
}

/// Everything taken from a queue to satisfy one close.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Consumption {
    /// Chunks in FIFO order.
    pub chunks: Vec<LotChunk>,

    /// Requested quantity that no open lot could cover.
    pub shortfall: Quantity,
}

/// Open lots for every [`LotKey`], each in its own FIFO.
///
/// When an asset is bought, it is appended to the tail of its key's FIFO. When sold, lots at
/// the head are removed until the sale is fulfilled; the remainder of a partially consumed lot
/// is split off and returned to the head.
#[derive(Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct LotLedger {
    queues: BTreeMap<LotKey, FIFO<Lot>>,
}

#[derive(Debug)]
pub(crate) struct SplittableTakeWhile<A: Sized> {
    pub(crate) takes: Vec<A>,
    pub(crate) remain: Option<A>, // empty if exact fit into takes
    pub(crate) shortfall: Quantity,
}

impl Lot {
    pub fn new(quantity: Quantity, price: UsdAmount, date: NaiveDate) -> Self {
        Self {
            quantity,
            price,
            date,
        }
    }

    pub fn total_cost(&self) -> UsdAmount {
        self.price.times(self.quantity)
    }

    fn split(self, take: Quantity) -> HasSplit<Self> {
        HasSplit {
            take: Self::new(take, self.price, self.date),
            leave: Self::new(self.quantity - take, self.price, self.date),
        }
    }

    fn into_chunk(self) -> LotChunk {
        LotChunk {
            quantity: self.quantity,
            cost_basis: self.total_cost(),
            acquired: self.date,
        }
    }
}

impl FIFO<Lot> {
    /// Pop lots from the front until `amount` is covered, splitting the last lot if needed.
    ///
    /// In the case that we are asking to sell more than we have, this leaves the FIFO empty and
    /// reports the uncovered quantity as `shortfall`.
    pub(crate) fn splittable_take_while(&mut self, amount: Quantity) -> SplittableTakeWhile<Lot> {
        let mut takes = Vec::new();
        let mut so_far = Quantity::ZERO;

        while let Some(lot) = self.pop_front() {
            let sum = so_far + lot.quantity;

            match sum.cmp(&amount) {
                Ordering::Equal => {
                    takes.push(lot);

                    return SplittableTakeWhile {
                        takes,
                        remain: None,
                        shortfall: Quantity::ZERO,
                    };
                }
                Ordering::Greater => {
                    let split = lot.split(amount - so_far);
                    trace!(
                        "Split lot from {}: take {}, leave {}",
                        split.take.date,
                        split.take.quantity,
                        split.leave.quantity,
                    );

                    takes.push(split.take);

                    return SplittableTakeWhile {
                        takes,
                        remain: Some(split.leave),
                        shortfall: Quantity::ZERO,
                    };
                }
                Ordering::Less => {
                    // We are consuming the entire lot and continuing the loop.
                    takes.push(lot);

                    so_far = sum;
                }
            }
        }

        SplittableTakeWhile {
            takes,
            remain: None,
            shortfall: amount - so_far,
        }
    }
}

impl LotLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a lot to the tail of the FIFO for `key`.
    pub fn append(&mut self, key: &LotKey, lot: Lot) {
        debug_assert!(lot.quantity.is_positive());

        self.queues.entry(key.clone()).or_default().append_back(lot);
    }

    /// Remove `quantity` units from the head of the FIFO for `key`.
    ///
    /// Fully consumed lots are removed, and a key with no remaining lots is dropped entirely.
    pub fn consume(&mut self, key: &LotKey, quantity: Quantity) -> Consumption {
        if !quantity.is_positive() {
            return Consumption::default();
        }

        let Some(fifo) = self.queues.get_mut(key) else {
            return Consumption {
                chunks: Vec::new(),
                shortfall: quantity,
            };
        };

        let stw = fifo.splittable_take_while(quantity);

        // Produce the remainder back onto the FIFO.
        if let Some(remain) = stw.remain {
            fifo.push_front(remain);
        }
        if fifo.is_empty() {
            self.queues.remove(key);
        }

        Consumption {
            chunks: stw.takes.into_iter().map(Lot::into_chunk).collect(),
            shortfall: stw.shortfall,
        }
    }

    /// Sum of remaining quantities for `key`.
    pub fn open_quantity(&self, key: &LotKey) -> Quantity {
        self.lots(key).map(|lot| lot.quantity).sum()
    }

    /// Quantity of open lots for `key` acquired within `start..=end`.
    pub fn quantity_acquired_between(
        &self,
        key: &LotKey,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Quantity {
        self.lots(key)
            .filter(|lot| (start..=end).contains(&lot.date))
            .map(|lot| lot.quantity)
            .sum()
    }

    /// Open lots for `key`, oldest first.
    pub fn lots(&self, key: &LotKey) -> impl Iterator<Item = &Lot> {
        self.queues.get(key).into_iter().flat_map(|fifo| fifo.iter())
    }

    /// Every key with open lots, in key order.
    pub fn positions(&self) -> impl Iterator<Item = (&LotKey, &FIFO<Lot>)> {
        self.queues.iter()
    }

    pub fn is_empty(&self) -> bool {
        self.queues.is_empty()
    }
}
