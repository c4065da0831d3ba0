//! Stream combinators for telemetry subscribers

mod throttle;

pub use throttle::{Throttle, ThrottleExt};
