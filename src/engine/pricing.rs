use rust_decimal::Decimal;

use crate::model::DateSpan;

use super::EngineError;

/// `max(1, days) × daily_rate`, kept at full precision.
pub fn price(span: &DateSpan, daily_rate: Decimal) -> Result<Decimal, EngineError> {
    Decimal::from(span.billable_days())
        .checked_mul(daily_rate)
        .ok_or(EngineError::LimitExceeded("price overflow"))
}
