use crate::model::{CashFlow, CashFlowKind, UsdAmount};
use crate::util::year_ext::GetYear as _;
use serde::{Deserialize, Serialize};
use std::fmt::Display;

/// Cash flows that are reported next to, never inside, realized gains.
#[derive(Clone, Debug, Default, Deserialize, Eq, PartialEq, Serialize)]
pub struct IncomeSums {
    pub tax_year: Option<i32>,
    pub dividends: UsdAmount,
    pub interest: UsdAmount,

    /// Fees as charged, normally negative.
    pub fees: UsdAmount,
    pub deposits: UsdAmount,

    /// Withdrawals as charged, normally negative.
    pub withdrawals: UsdAmount,
}

impl IncomeSums {
    /// Sum `cash_flows` dated in `tax_year`, or all of them when no year is given.
    pub fn new(cash_flows: &[CashFlow], tax_year: Option<i32>) -> Self {
        let mut sums = Self {
            tax_year,
            ..Default::default()
        };

        for cash_flow in cash_flows
            .iter()
            .filter(|cash_flow| tax_year.is_none_or(|year| cash_flow.get_year() == year))
        {
            match cash_flow.kind {
                CashFlowKind::Dividend => sums.dividends += cash_flow.amount,
                CashFlowKind::Interest => sums.interest += cash_flow.amount,
                CashFlowKind::Fee => sums.fees += cash_flow.amount,
                CashFlowKind::Transfer if cash_flow.amount.is_negative() => {
                    sums.withdrawals += cash_flow.amount
                }
                CashFlowKind::Transfer => sums.deposits += cash_flow.amount,
            }
        }

        sums
    }

    /// Dividends plus interest.
    pub fn income(&self) -> UsdAmount {
        self.dividends + self.interest
    }
}

impl Display for IncomeSums {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, r#""","Amount""#)?;
        writeln!(f, r#""Dividends","{}""#, self.dividends)?;
        writeln!(f, r#""Interest","{}""#, self.interest)?;
        writeln!(f, r#""Dividends + Interest","{}""#, self.income())?;
        writeln!(f, r#""Fees","{}""#, self.fees)?;
        writeln!(f, r#""Deposits","{}""#, self.deposits)?;
        writeln!(f, r#""Withdrawals","{}""#, self.withdrawals)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn flow(day: &str, kind: CashFlowKind, amount: &str) -> CashFlow {
        CashFlow {
            date: NaiveDate::parse_from_str(day, "%F").unwrap(),
            instrument: String::new(),
            kind,
            amount: amount.parse().unwrap(),
        }
    }

    #[test]
    fn sums_only_the_requested_year() {
        let cash_flows = [
            flow("2022-12-30", CashFlowKind::Dividend, "99"),
            flow("2023-01-15", CashFlowKind::Dividend, "12.50"),
            flow("2023-02-01", CashFlowKind::Interest, "0.37"),
            flow("2023-02-01", CashFlowKind::Fee, "-5"),
            flow("2023-03-01", CashFlowKind::Transfer, "1000"),
            flow("2023-04-01", CashFlowKind::Transfer, "-250"),
        ];

        let sums = IncomeSums::new(&cash_flows, Some(2023));
        assert_eq!(sums.dividends, "12.50".parse().unwrap());
        assert_eq!(sums.income(), "12.87".parse().unwrap());
        assert_eq!(sums.fees, "-5".parse().unwrap());
        assert_eq!(sums.deposits, "1000".parse().unwrap());
        assert_eq!(sums.withdrawals, "-250".parse().unwrap());

        let all = IncomeSums::new(&cash_flows, None);
        assert_eq!(all.dividends, "111.50".parse().unwrap());
    }
}
