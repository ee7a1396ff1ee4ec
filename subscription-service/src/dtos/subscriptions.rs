//! Request and response bodies for the subscription API.
//!
//! Dates travel as `MM-YYYY` strings and are parsed here; anything that fails
//! to parse is rejected with 422 before the service is called.

use crate::models::{
    EndDateChange, NewSubscription, Subscription, SubscriptionFilter, SubscriptionUpdate,
};
use chrono::NaiveDate;
use serde::{Deserialize, Deserializer, Serialize};
use service_core::error::AppError;
use uuid::Uuid;
use validator::Validate;

pub const INVALID_DATE_MSG: &str = "invalid date format, expected MM-YYYY";
pub const START_AFTER_END_MSG: &str = "start_date cannot be after end_date";

/// Parse a strict `MM-YYYY` string to the first day of that month.
pub fn parse_month(raw: &str) -> Result<NaiveDate, AppError> {
    let bytes = raw.as_bytes();
    let well_formed = bytes.len() == 7
        && bytes[2] == b'-'
        && bytes[..2].iter().all(u8::is_ascii_digit)
        && bytes[3..].iter().all(u8::is_ascii_digit);
    if !well_formed {
        return Err(AppError::Unprocessable(INVALID_DATE_MSG.to_string()));
    }

    NaiveDate::parse_from_str(&format!("01-{}", raw), "%d-%m-%Y")
        .map_err(|_| AppError::Unprocessable(INVALID_DATE_MSG.to_string()))
}

pub fn format_month(date: NaiveDate) -> String {
    date.format("%m-%Y").to_string()
}

/// Distinguishes an absent field from an explicit `null`.
fn present<'de, D>(deserializer: D) -> Result<Option<Option<String>>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer).map(Some)
}

#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct CreateSubscriptionRequest {
    #[validate(length(min = 1, message = "Service name is required"))]
    pub service_name: String,
    #[validate(range(min = 0, message = "Monthly cost cannot be negative"))]
    pub monthly_cost: i64,
    pub user_id: Uuid,
    pub start_date: String,
    pub end_date: Option<String>,
}

impl CreateSubscriptionRequest {
    /// Parse dates and check the window. An empty `end_date` means open-ended.
    pub fn into_domain(self) -> Result<NewSubscription, AppError> {
        let start_date = parse_month(&self.start_date)?;
        let end_date = match self.end_date.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(parse_month(raw)?),
        };

        if matches!(end_date, Some(end) if start_date > end) {
            return Err(AppError::Unprocessable(START_AFTER_END_MSG.to_string()));
        }

        Ok(NewSubscription {
            service_name: self.service_name,
            monthly_cost: self.monthly_cost,
            user_id: self.user_id,
            start_date,
            end_date,
        })
    }
}

/// Partial update. `end_date` absent keeps the stored value, `null` clears it.
#[derive(Debug, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct UpdateSubscriptionRequest {
    #[validate(length(min = 1, message = "Service name cannot be empty"))]
    pub service_name: Option<String>,
    #[validate(range(min = 0, message = "Monthly cost cannot be negative"))]
    pub monthly_cost: Option<i64>,
    #[serde(default, deserialize_with = "present")]
    pub end_date: Option<Option<String>>,
}

impl UpdateSubscriptionRequest {
    pub fn into_domain(self) -> Result<SubscriptionUpdate, AppError> {
        let end_date = match self.end_date {
            None => EndDateChange::Unchanged,
            Some(None) => EndDateChange::Cleared,
            Some(Some(raw)) => EndDateChange::SetTo(parse_month(&raw)?),
        };

        Ok(SubscriptionUpdate {
            service_name: self.service_name,
            monthly_cost: self.monthly_cost,
            end_date,
        })
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListSubscriptionsQuery {
    pub user_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub page: Option<i64>,
    pub page_size: Option<i64>,
}

impl From<ListSubscriptionsQuery> for SubscriptionFilter {
    fn from(query: ListSubscriptionsQuery) -> Self {
        SubscriptionFilter {
            user_id: query.user_id,
            service_name: query.service_name,
            page: query.page,
            page_size: query.page_size,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct TotalCostQuery {
    pub user_id: Option<Uuid>,
    pub service_name: Option<String>,
    pub start: Option<String>,
    pub end: Option<String>,
}

impl TotalCostQuery {
    /// Resolve to a filter and a period. A missing start means the beginning
    /// of time, a missing end means December 9999.
    pub fn into_domain(self) -> Result<(SubscriptionFilter, NaiveDate, NaiveDate), AppError> {
        let start = match self.start.as_deref() {
            Some(raw) => parse_month(raw)?,
            None => beginning_of_time(),
        };
        let end = match self.end.as_deref() {
            Some(raw) => parse_month(raw)?,
            None => end_of_time(),
        };

        let filter = SubscriptionFilter {
            user_id: self.user_id,
            service_name: self.service_name,
            ..Default::default()
        };
        Ok((filter, start, end))
    }
}

fn beginning_of_time() -> NaiveDate {
    NaiveDate::from_ymd_opt(1, 1, 1).unwrap_or(NaiveDate::MIN)
}

fn end_of_time() -> NaiveDate {
    NaiveDate::from_ymd_opt(9999, 12, 1).unwrap_or(NaiveDate::MAX)
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct SubscriptionResponse {
    pub id: Uuid,
    pub service_name: String,
    pub monthly_cost: i64,
    pub user_id: Uuid,
    pub start_date: String,
    pub end_date: Option<String>,
}

impl From<Subscription> for SubscriptionResponse {
    fn from(sub: Subscription) -> Self {
        Self {
            id: sub.id,
            service_name: sub.service_name,
            monthly_cost: sub.monthly_cost,
            user_id: sub.user_id,
            start_date: format_month(sub.start_date),
            end_date: sub.end_date.map(format_month),
        }
    }
}

#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct TotalCostResponse {
    pub total_cost: i64,
}
