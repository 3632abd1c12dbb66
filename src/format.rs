//! Boundary text formats: `DD/MM/YYYY` dates and localized money amounts.

use std::str::FromStr;

use chrono::NaiveDate;
use rust_decimal::{Decimal, RoundingStrategy};

const DATE_FORMAT: &str = "%d/%m/%Y";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatError {
    Date(String),
    Amount(String),
    Separator(String),
}

impl std::fmt::Display for FormatError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FormatError::Date(s) => write!(f, "invalid date '{s}', expected DD/MM/YYYY"),
            FormatError::Amount(s) => write!(f, "invalid amount '{s}'"),
            FormatError::Separator(s) => write!(f, "invalid decimal separator '{s}', expected ',' or '.'"),
        }
    }
}

impl std::error::Error for FormatError {}

/// Character placed between the integer and fractional part of displayed amounts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DecimalSeparator {
    #[default]
    Comma,
    Dot,
}

impl FromStr for DecimalSeparator {
    type Err = FormatError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "," | "comma" => Ok(DecimalSeparator::Comma),
            "." | "dot" => Ok(DecimalSeparator::Dot),
            other => Err(FormatError::Separator(other.to_string())),
        }
    }
}

/// Parse a strict `DD/MM/YYYY` calendar date.
pub fn parse_date(s: &str) -> Result<NaiveDate, FormatError> {
    let bytes = s.as_bytes();
    let shaped = bytes.len() == 10
        && bytes
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 2 || i == 5 { *b == b'/' } else { b.is_ascii_digit() });
    if !shaped {
        return Err(FormatError::Date(s.to_string()));
    }
    NaiveDate::parse_from_str(s, DATE_FORMAT).map_err(|_| FormatError::Date(s.to_string()))
}

pub fn format_date(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

/// Parse a non-negative amount written with either `,` or `.` as separator.
pub fn parse_amount(s: &str) -> Result<Decimal, FormatError> {
    let trimmed = s.trim();
    if trimmed.is_empty() || (trimmed.contains(',') && trimmed.contains('.')) {
        return Err(FormatError::Amount(s.to_string()));
    }
    Decimal::from_str(&trimmed.replace(',', ".")).map_err(|_| FormatError::Amount(s.to_string()))
}

/// Round half away from zero to two places and render with `sep`.
pub fn format_amount(amount: Decimal, sep: DecimalSeparator) -> String {
    let mut shown = amount.round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero);
    shown.rescale(2);
    let text = shown.to_string();
    match sep {
        DecimalSeparator::Comma => text.replace('.', ","),
        DecimalSeparator::Dot => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_day_month_year() {
        let d = parse_date("05/08/2023").unwrap();
        assert_eq!(d, NaiveDate::from_ymd_opt(2023, 8, 5).unwrap());
        assert_eq!(format_date(d), "05/08/2023");
    }

    #[test]
    fn rejects_malformed_dates() {
        for bad in ["5/8/2023", "2023-08-05", "31/02/2023", "05/13/2023", "", "05/08/23", "aa/bb/cccc"] {
            assert!(parse_date(bad).is_err(), "{bad} should be rejected");
        }
    }

    #[test]
    fn leap_day_is_valid() {
        assert!(parse_date("29/02/2024").is_ok());
        assert!(parse_date("29/02/2023").is_err());
    }

    #[test]
    fn amount_accepts_both_separators() {
        assert_eq!(parse_amount("50").unwrap(), Decimal::new(50, 0));
        assert_eq!(parse_amount("49,90").unwrap(), Decimal::new(4990, 2));
        assert_eq!(parse_amount("49.90").unwrap(), Decimal::new(4990, 2));
        assert!(parse_amount("1.000,50").is_err());
        assert!(parse_amount("abc").is_err());
        assert!(parse_amount(" ").is_err());
    }

    #[test]
    fn amount_display_pads_and_rounds_half_up() {
        assert_eq!(format_amount(Decimal::new(200, 0), DecimalSeparator::Comma), "200,00");
        assert_eq!(format_amount(Decimal::new(200, 0), DecimalSeparator::Dot), "200.00");
        assert_eq!(format_amount(Decimal::new(10005, 3), DecimalSeparator::Dot), "10.01");
        assert_eq!(format_amount(Decimal::new(10004, 3), DecimalSeparator::Dot), "10.00");
        assert_eq!(format_amount(Decimal::new(15, 1), DecimalSeparator::Comma), "1,50");
    }

    #[test]
    fn separator_from_config_text() {
        assert_eq!(",".parse::<DecimalSeparator>().unwrap(), DecimalSeparator::Comma);
        assert_eq!("dot".parse::<DecimalSeparator>().unwrap(), DecimalSeparator::Dot);
        assert!(";".parse::<DecimalSeparator>().is_err());
    }
}
