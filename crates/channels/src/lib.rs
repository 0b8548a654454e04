//! Outbound delivery: the email transport and the throttled dispatch
//! scheduler that fans rendered messages out to it in batches.

pub mod dispatch;
pub mod email;

pub use dispatch::{DispatchJob, DispatchScheduler};
pub use email::SendGridProvider;
