pub mod billing_webhook;
pub mod distribution;
pub mod identity;
pub mod ledger;
