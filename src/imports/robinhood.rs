use crate::model::{ActivityRow, ConvertAmountError, Stats, UsdAmount};
use chrono::NaiveDate;
use serde::Deserialize;
use std::{io::Read, path::Path};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum ActivityError {
    #[error("CSV Error")]
    Io(#[from] csv::Error),

    #[error("Date parsing error on line {0}")]
    Date(u64, #[source] chrono::ParseError),

    #[error("Money parsing error on line {0}")]
    Money(u64, #[source] ConvertAmountError),
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ActivityCSVRow {
    #[serde(rename = "Activity Date")]
    pub(crate) activity_date: String,
    #[serde(rename = "Process Date")]
    pub(crate) process_date: String,
    #[serde(rename = "Settle Date")]
    pub(crate) settle_date: String,
    #[serde(rename = "Instrument")]
    pub(crate) instrument: String,
    #[serde(rename = "Description")]
    pub(crate) description: String,
    #[serde(rename = "Trans Code")]
    pub(crate) trans_code: String,
    #[serde(rename = "Quantity")]
    pub(crate) quantity: String,
    #[serde(rename = "Price")]
    pub(crate) price: String,
    #[serde(rename = "Amount")]
    pub(crate) amount: String,
}

/// Read a brokerage account activity CSV export.
pub fn read_activity(
    s: &mut Stats,
    path: impl AsRef<Path>,
) -> Result<Vec<ActivityRow>, ActivityError> {
    let reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .from_path(path)?;

    read_records(s, reader)
}

/// Same as [`read_activity`], for any reader.
pub fn read_activity_from<R: Read>(
    s: &mut Stats,
    rdr: R,
) -> Result<Vec<ActivityRow>, ActivityError> {
    let reader = csv::ReaderBuilder::new()
        .comment(Some(b'#'))
        .flexible(true)
        .from_reader(rdr);

    read_records(s, reader)
}

fn read_records<R: Read>(
    s: &mut Stats,
    mut reader: csv::Reader<R>,
) -> Result<Vec<ActivityRow>, ActivityError> {
    let headers = reader.headers()?.clone();
    let mut rows = Vec::new();

    debug!("Parsing Activity rows");
    for result in reader.records() {
        let record = result?;

        // The export ends with a blank row followed by a disclaimer.
        if record.len() < headers.len() || record.iter().all(|field| field.trim().is_empty()) {
            debug!("End of activity rows");
            break;
        }

        let line = record.position().map_or(0, |pos| pos.line());
        let record: ActivityCSVRow = record.deserialize(Some(&headers))?;
        debug!("Deserialized: {record:?}");

        let record2 = activity_parse(line, record)?;
        debug!("Parsed: {record2:?}");

        rows.push(record2);
        s.inc_activity();
    }

    Ok(rows)
}

fn activity_parse(line: u64, r: ActivityCSVRow) -> Result<ActivityRow, ActivityError> {
    let date = |s: &str| parse_date(s).map_err(|err| ActivityError::Date(line, err));
    let money = |s: &str| parse_money(s).map_err(|err| ActivityError::Money(line, err));

    Ok(ActivityRow {
        activity_date: date(&r.activity_date)?,
        process_date: date(&r.process_date)?,
        settle_date: date(&r.settle_date)?,
        instrument: r.instrument.trim().to_string(),
        description: r.description,
        trans_code: r.trans_code.trim().to_string(),
        quantity: r.quantity,
        price: money(&r.price)?,
        amount: money(&r.amount)?,
    })
}

/// Parse an `MM/DD/YYYY` date.
pub(crate) fn parse_date(s: &str) -> Result<NaiveDate, chrono::ParseError> {
    NaiveDate::parse_from_str(s.trim(), "%m/%d/%Y")
}

/// Parse a dollar amount like `$1,234.56`. Parentheses mean negative: `($1,234.56)`.
///
/// An empty string is zero.
pub(crate) fn parse_money(s: &str) -> Result<UsdAmount, ConvertAmountError> {
    let s = s.trim();
    if s.is_empty() {
        return Ok(UsdAmount::ZERO);
    }

    let (negative, s) = match s.strip_prefix('(').and_then(|s| s.strip_suffix(')')) {
        Some(inner) => (true, inner),
        None => (false, s),
    };
    let amount: UsdAmount = s.replace(['$', ','], "").parse()?;

    Ok(if negative { -amount } else { amount })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tracing_test::traced_test;

    const ACTIVITY: &str = r#""Activity Date","Process Date","Settle Date","Instrument","Description","Trans Code","Quantity","Price","Amount"
"3/17/2023","3/17/2023","3/20/2023","SPY","SPY 3/17/2023 Put $390.00","OEXP","1S","",""
"3/01/2023","3/01/2023","3/03/2023","AAPL","Apple
CUSIP: 037833100","Sell","5","$150.25","$751.25"
"2/15/2023","2/15/2023","2/15/2023","AAPL","Cash Div: R/D 2023-02-13 P/D 2023-02-16 - 10 shares at 0.23","CDIV","","","$2.30"
"1/05/2023","1/05/2023","1/09/2023","AAPL","Apple
CUSIP: 037833100","Buy","10","$1,250.00","($12,500.00)"
""
"The data provided is for informational purposes only."
"#;

    #[test]
    #[traced_test]
    fn read_export_until_footer() {
        let _ = tracing_log::LogTracer::init();

        let mut stats = Stats::default();
        let rows = read_activity_from(&mut stats, ACTIVITY.as_bytes()).unwrap();

        assert_eq!(rows.len(), 4);
        assert_eq!(stats.activity_rows(), 4);

        assert_eq!(rows[0].trans_code, "OEXP");
        assert_eq!(rows[0].quantity, "1S");
        assert_eq!(rows[0].amount, UsdAmount::ZERO);
        assert_eq!(rows[0].settle_date, NaiveDate::from_ymd_opt(2023, 3, 20).unwrap());

        assert_eq!(rows[1].description, "Apple\nCUSIP: 037833100");
        assert_eq!(rows[1].amount, "751.25".parse().unwrap());
        assert_eq!(rows[3].price, "1250".parse().unwrap());
        assert_eq!(rows[3].amount, "-12500".parse().unwrap());
    }

    #[test]
    fn bad_date_reports_line() {
        let csv = concat!(
            r#""Activity Date","Process Date","Settle Date","Instrument","Description","Trans Code","Quantity","Price","Amount""#,
            "\n",
            r#""2023-01-05","1/05/2023","1/09/2023","AAPL","Apple","Buy","10","$1.00","($10.00)""#,
            "\n",
        );

        let err = read_activity_from(&mut Stats::default(), csv.as_bytes()).unwrap_err();
        assert!(matches!(err, ActivityError::Date(2, _)));
    }

    #[test]
    fn money_formats() {
        assert_eq!(parse_money("").unwrap(), UsdAmount::ZERO);
        assert_eq!(parse_money("$1,234.56").unwrap(), "1234.56".parse().unwrap());
        assert_eq!(parse_money("($1,234.56)").unwrap(), "-1234.56".parse().unwrap());
        assert_eq!(parse_money("-$3.00").unwrap(), "-3".parse().unwrap());
        assert!(parse_money("$abc").is_err());
    }
}
