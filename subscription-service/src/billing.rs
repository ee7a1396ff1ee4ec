//! Period billing at whole-month granularity.

use crate::models::{month_start, Subscription};
use chrono::{Datelike, NaiveDate};

/// Cost contributed by `sub` over the closed period `[period_start, period_end]`.
///
/// All boundaries are truncated to the first of their month, so a partially
/// covered month is billed in full.
pub fn subscription_cost(
    sub: &Subscription,
    period_start: NaiveDate,
    period_end: NaiveDate,
) -> i64 {
    let sub_start = month_start(sub.start_date);
    let sub_end = sub.end_date.map(month_start);
    let period_start = month_start(period_start);
    let period_end = month_start(period_end);

    if sub_start > period_end {
        return 0;
    }
    if matches!(sub_end, Some(end) if end < period_start) {
        return 0;
    }

    let billing_start = sub_start.max(period_start);
    let billing_end = match sub_end {
        Some(end) => end.min(period_end),
        None => period_end,
    };

    if billing_start > billing_end {
        return 0;
    }

    months_inclusive(billing_start, billing_end).saturating_mul(sub.monthly_cost)
}

/// Sum of [`subscription_cost`] over `subs`.
pub fn total_cost<'a, I>(subs: I, period_start: NaiveDate, period_end: NaiveDate) -> i64
where
    I: IntoIterator<Item = &'a Subscription>,
{
    subs.into_iter().fold(0i64, |acc, sub| {
        acc.saturating_add(subscription_cost(sub, period_start, period_end))
    })
}

/// Number of calendar months in `[start, end]`, counting both ends.
fn months_inclusive(start: NaiveDate, end: NaiveDate) -> i64 {
    let years = i64::from(end.year()) - i64::from(start.year());
    let months = i64::from(end.month()) - i64::from(start.month());
    years * 12 + months + 1
}
