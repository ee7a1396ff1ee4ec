pub mod subscriptions;

pub use subscriptions::{
    CreateSubscriptionRequest, ListSubscriptionsQuery, SubscriptionResponse, TotalCostQuery,
    TotalCostResponse, UpdateSubscriptionRequest,
};
