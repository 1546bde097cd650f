use crate::model::{Anomaly, Quantity, UsdAmount};
use crate::util::year_ext::GetYear;
use chrono::{Datelike as _, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, warn};

/// Trade classification. Every code that moves lots resolves to exactly one of these.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum TransType {
    Buy,
    Sell,
    OptionOpen,
    OptionClose,
    OptionExpire,
}

/// Cash movements that never touch a lot.
#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub enum CashFlowKind {
    Dividend,
    Interest,
    Fee,
    Transfer,
}

/// What a raw transaction code means to the engine.
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub(crate) enum Code {
    Trade(TransType),
    CashFlow(CashFlowKind),

    /// Short option positions are not modelled.
    Unsupported,

    /// Anything else (journal entries, stock lending, splits, ...).
    Ignored,
}

impl Code {
    /// The single place raw broker codes are interpreted.
    pub(crate) fn resolve(code: &str) -> Self {
        match code.trim() {
            "Buy" | "BUY" => Self::Trade(TransType::Buy),
            "Sell" | "SELL" => Self::Trade(TransType::Sell),
            "BTO" | "OPTION_OPEN" => Self::Trade(TransType::OptionOpen),
            "STC" | "OPTION_CLOSE" => Self::Trade(TransType::OptionClose),
            "OEXP" | "OPTION_EXPIRE" => Self::Trade(TransType::OptionExpire),
            "STO" | "BTC" => Self::Unsupported,
            "CDIV" | "MDIV" => Self::CashFlow(CashFlowKind::Dividend),
            "INT" => Self::CashFlow(CashFlowKind::Interest),
            "GOLD" | "AFEE" | "DFEE" | "MINT" => Self::CashFlow(CashFlowKind::Fee),
            "ACH" => Self::CashFlow(CashFlowKind::Transfer),
            _ => Self::Ignored,
        }
    }
}

impl TransType {
    pub fn from_code(code: &str) -> Option<Self> {
        match Code::resolve(code) {
            Code::Trade(trans_type) => Some(trans_type),
            Code::CashFlow(_) | Code::Unsupported | Code::Ignored => None,
        }
    }

    pub fn is_option(self) -> bool {
        matches!(
            self,
            Self::OptionOpen | Self::OptionClose | Self::OptionExpire
        )
    }

    pub fn is_buy(self) -> bool {
        matches!(self, Self::Buy | Self::OptionOpen)
    }

    pub fn is_sell(self) -> bool {
        !self.is_buy()
    }
}

impl fmt::Display for TransType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Buy => "BUY",
            Self::Sell => "SELL",
            Self::OptionOpen => "OPTION_OPEN",
            Self::OptionClose => "OPTION_CLOSE",
            Self::OptionExpire => "OPTION_EXPIRE",
        })
    }
}

/// The partition for FIFO queues and wash-sale deferrals.
///
/// Equities are keyed by ticker alone. Options also carry the full contract description, so
/// different strikes and expirations on the same underlying never share a queue.
#[derive(Clone, Debug, Deserialize, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize)]
pub struct LotKey {
    pub instrument: String,
    pub contract: Option<String>,
}

impl LotKey {
    pub fn equity(instrument: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            contract: None,
        }
    }

    pub fn option(instrument: impl Into<String>, contract: impl Into<String>) -> Self {
        Self {
            instrument: instrument.into(),
            contract: Some(contract.into()),
        }
    }
}

impl fmt::Display for LotKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.contract {
            Some(contract) => f.write_str(contract),
            None => f.write_str(&self.instrument),
        }
    }
}

/// A canonical trade record.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct Transaction {
    /// Position of the source row across all inputs, in reading order.
    pub seq: usize,
    pub date: NaiveDate,
    pub process_date: NaiveDate,
    pub settle_date: NaiveDate,
    pub instrument: String,
    pub trans_type: TransType,

    /// Zero when unspecified. Expirations resolve a zero quantity against open interest.
    pub quantity: Quantity,

    /// Negative for buys, positive for sells and expirations.
    pub amount: UsdAmount,
    pub description: String,
}

impl Transaction {
    pub fn is_option(&self) -> bool {
        self.trans_type.is_option()
    }

    pub fn is_buy(&self) -> bool {
        self.trans_type.is_buy()
    }

    pub fn is_sell(&self) -> bool {
        self.trans_type.is_sell()
    }

    pub fn key(&self) -> LotKey {
        if self.is_option() {
            LotKey::option(&self.instrument, &self.description)
        } else {
            LotKey::equity(&self.instrument)
        }
    }
}

/// Tax-year attribution follows the settlement date.
impl GetYear for Transaction {
    fn get_year(&self) -> i32 {
        self.settle_date.year()
    }
}

/// A dividend, interest payment, fee, or transfer.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct CashFlow {
    pub date: NaiveDate,
    pub instrument: String,
    pub kind: CashFlowKind,
    pub amount: UsdAmount,
}

impl GetYear for CashFlow {
    fn get_year(&self) -> i32 {
        self.date.year()
    }
}

/// One row of a brokerage activity export, with dates and money already converted.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
pub struct ActivityRow {
    pub activity_date: NaiveDate,
    pub process_date: NaiveDate,
    pub settle_date: NaiveDate,
    pub instrument: String,
    pub description: String,
    pub trans_code: String,

    /// Left as text; resolved by [`Ledger::from_rows`].
    pub quantity: String,
    pub price: UsdAmount,
    pub amount: UsdAmount,
}

/// Normalized activity, sorted and ready for the engine.
#[derive(Clone, Debug, Default)]
pub struct Ledger {
    pub transactions: Vec<Transaction>,
    pub cash_flows: Vec<CashFlow>,
    pub anomalies: Vec<Anomaly>,

    /// Rows with codes that are neither trades nor cash flows.
    pub ignored: usize,
}

impl Ledger {
    /// Normalize raw rows. `rows` must be in input order; the position of each row becomes the
    /// tie-breaker for same-day transactions.
    pub fn from_rows<I>(rows: I) -> Self
    where
        I: IntoIterator<Item = ActivityRow>,
    {
        let mut ledger = Self::default();

        for (seq, row) in rows.into_iter().enumerate() {
            let code = match Code::resolve(&row.trans_code) {
                Code::Trade(_) if is_short(&row.quantity) => Code::Unsupported,
                code => code,
            };

            match code {
                Code::Trade(trans_type) => {
                    let tx = ledger.normalize_trade(seq, trans_type, row);
                    debug!("Normalized: {tx:?}");
                    ledger.transactions.push(tx);
                }
                Code::CashFlow(kind) => ledger.cash_flows.push(CashFlow {
                    date: row.activity_date,
                    instrument: row.instrument,
                    kind,
                    amount: row.amount,
                }),
                Code::Unsupported => {
                    let anomaly = Anomaly::UnsupportedCode {
                        instrument: row.instrument,
                        date: row.activity_date,
                        code: row.trans_code,
                    };
                    warn!("{anomaly}");
                    ledger.anomalies.push(anomaly);
                }
                Code::Ignored => {
                    debug!("Ignoring `{}` row for `{}`", row.trans_code, row.instrument);
                    ledger.ignored += 1;
                }
            }
        }

        ledger.transactions.sort_by(|a, b| {
            a.date
                .cmp(&b.date)
                .then(a.process_date.cmp(&b.process_date))
                .then(a.settle_date.cmp(&b.settle_date))
                // Exports list the newest activity first, so later rows happened earlier.
                .then(b.seq.cmp(&a.seq))
        });
        ledger.cash_flows.sort_by_key(|cash_flow| cash_flow.date);

        ledger
    }

    fn normalize_trade(&mut self, seq: usize, trans_type: TransType, row: ActivityRow) -> Transaction {
        let mut tx = Transaction {
            seq,
            date: row.activity_date,
            process_date: row.process_date,
            settle_date: row.settle_date,
            instrument: row.instrument,
            trans_type,
            quantity: Quantity::ZERO,
            amount: row.amount,
            description: row.description,
        };

        match parse_quantity(&row.quantity) {
            Some(quantity) => tx.quantity = quantity,
            None => {
                let anomaly = Anomaly::MalformedQuantity {
                    key: tx.key(),
                    date: tx.date,
                    raw: row.quantity,
                };
                warn!("{anomaly}");
                self.anomalies.push(anomaly);
            }
        }

        tx
    }
}

/// Short option positions carry an `S` marker on the quantity, e.g. `1S` on an expiration.
fn is_short(raw: &str) -> bool {
    raw.trim().ends_with('S')
}

/// Parse a quantity column. Empty means unspecified (zero). Returns `None` when malformed.
fn parse_quantity(raw: &str) -> Option<Quantity> {
    let trimmed = raw.trim().replace(',', "");

    if trimmed.is_empty() {
        return Some(Quantity::ZERO);
    }

    trimmed.parse().ok()
}
