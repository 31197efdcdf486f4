//! Enrollment services.

mod enrollment;
mod rate_limit;

pub use enrollment::{DeviceSummary, Enrollment, OverlayConfig};
pub use rate_limit::{EnrollmentRateLimiter, RateLimited};
