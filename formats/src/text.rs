//! Field formatting shared by the text codecs.

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;

use healthsim_types::Money;

/// `CCYYMMDD`, as used by HL7 v2, X12 `D8` and NCPDP dates.
pub(crate) fn d8(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

pub(crate) fn parse_d8(raw: &str) -> Option<NaiveDate> {
    NaiveDate::parse_from_str(raw.trim(), "%Y%m%d").ok()
}

/// `CCYYMMDDHHMMSS`.
pub(crate) fn ts(at: NaiveDateTime) -> String {
    at.format("%Y%m%d%H%M%S").to_string()
}

/// Shortest decimal rendering: `14.60` becomes `14.6`, `1500.00` becomes `1500`.
pub(crate) fn decimal(value: Decimal) -> String {
    value.normalize().to_string()
}

pub(crate) fn money(value: Money) -> String {
    decimal(value.amount())
}

/// Left-justified, space-padded and truncated to `width`.
pub(crate) fn fixed(value: &str, width: usize) -> String {
    let truncated: String = value.chars().take(width).collect();
    format!("{truncated:<width$}")
}

/// One RFC 4180 CSV field.
pub(crate) fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

pub(crate) fn csv_row<S: AsRef<str>>(fields: &[S]) -> String {
    let mut row = fields
        .iter()
        .map(|field| csv_field(field.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    row.push_str("\r\n");
    row
}
