//! Subscription model.

use chrono::{DateTime, Datelike, NaiveDate, Utc};
use sqlx::FromRow;
use uuid::Uuid;

/// Truncate a date to the first day of its month.
pub fn month_start(date: NaiveDate) -> NaiveDate {
    date.with_day(1).unwrap_or(date)
}

/// A billable subscription as persisted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct Subscription {
    pub id: Uuid,
    pub service_name: String,
    /// Monthly cost in the smallest currency unit.
    pub monthly_cost: i64,
    pub user_id: Uuid,
    pub start_date: NaiveDate,
    /// `None` means open-ended.
    pub end_date: Option<NaiveDate>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Subscription {
    /// Whether the end date, if any, is on or after the start date.
    pub fn has_valid_window(&self) -> bool {
        match self.end_date {
            Some(end) => end >= self.start_date,
            None => true,
        }
    }
}

/// Input for creating a subscription. Identifier and timestamps are assigned
/// by storage.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSubscription {
    pub service_name: String,
    pub monthly_cost: i64,
    pub user_id: Uuid,
    pub start_date: NaiveDate,
    pub end_date: Option<NaiveDate>,
}

impl NewSubscription {
    /// Copy with both window boundaries moved to the first of their month.
    pub fn normalized(mut self) -> Self {
        self.start_date = month_start(self.start_date);
        self.end_date = self.end_date.map(month_start);
        self
    }
}

/// What an update does to the end date.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EndDateChange {
    #[default]
    Unchanged,
    SetTo(NaiveDate),
    Cleared,
}

/// Partial update of a subscription. Absent fields keep their stored value.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscriptionUpdate {
    pub service_name: Option<String>,
    pub monthly_cost: Option<i64>,
    pub end_date: EndDateChange,
}

impl SubscriptionUpdate {
    /// Apply the present fields to `sub` and stamp `updated_at`.
    pub fn apply_to(self, sub: &mut Subscription, now: DateTime<Utc>) {
        if let Some(name) = self.service_name {
            sub.service_name = name;
        }
        if let Some(cost) = self.monthly_cost {
            sub.monthly_cost = cost;
        }
        match self.end_date {
            EndDateChange::Unchanged => {}
            EndDateChange::SetTo(date) => sub.end_date = Some(month_start(date)),
            EndDateChange::Cleared => sub.end_date = None,
        }
        sub.updated_at = now;
    }
}
