pub mod client;
pub mod error;
#[cfg(test)]
pub(crate) mod fake;
pub mod wire;

pub use client::{HttpSchedulerClient, SchedulerApi};
pub use error::ApiError;
