//! Usage metering types

use chrono::{DateTime, Datelike, Months, NaiveDate, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::UserId;

/// Consumption counters for one user over one calendar month
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsagePeriod {
    pub id: Uuid,
    pub user_id: UserId,
    /// First day of the month
    pub period_start: NaiveDate,
    /// Last day of the month
    pub period_end: NaiveDate,
    pub analyses_used: i64,
    pub storage_used_gb: Decimal,
    pub chat_messages_used: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Calendar-month window containing `date`, as (first day, last day)
pub fn month_bounds(date: NaiveDate) -> (NaiveDate, NaiveDate) {
    let start = date.with_day(1).unwrap_or(date);
    let end = start
        .checked_add_months(Months::new(1))
        .and_then(|next| next.pred_opt())
        .unwrap_or(start);
    (start, end)
}

/// Increments to apply to the current usage period
///
/// Fields left as `None` are untouched. Increments are never negative;
/// corrections go through an administrative path outside the engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageDelta {
    #[serde(default)]
    pub analyses_used: Option<i64>,
    #[serde(default)]
    pub storage_used_gb: Option<Decimal>,
    #[serde(default)]
    pub chat_messages_used: Option<i64>,
}

impl UsageDelta {
    /// Delta consuming a number of analyses
    pub fn analyses(count: i64) -> Self {
        Self {
            analyses_used: Some(count),
            ..Self::default()
        }
    }

    /// Name of the first negative field, if any
    pub fn negative_field(&self) -> Option<&'static str> {
        if self.analyses_used.is_some_and(|v| v < 0) {
            return Some("analyses_used");
        }
        if self.storage_used_gb.is_some_and(|v| v < Decimal::ZERO) {
            return Some("storage_used_gb");
        }
        if self.chat_messages_used.is_some_and(|v| v < 0) {
            return Some("chat_messages_used");
        }
        None
    }

    pub fn is_empty(&self) -> bool {
        self.analyses_used.is_none()
            && self.storage_used_gb.is_none()
            && self.chat_messages_used.is_none()
    }
}
