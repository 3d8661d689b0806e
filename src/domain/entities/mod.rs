pub mod billing_event;
pub mod distribution_schedule;
pub mod plan;
pub mod subscription_tier;
pub mod user_billing;
