//! Domain models for subscription-service.

mod filter;
mod subscription;

pub use filter::{PageLimits, SubscriptionFilter};
pub use subscription::{
    month_start, EndDateChange, NewSubscription, Subscription, SubscriptionUpdate,
};
