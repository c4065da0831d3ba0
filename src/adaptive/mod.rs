//! Adaptive video profile control.
//!
//! The controller reads closed telemetry slices, decides when a vehicle's encoder should
//! step down or up the quality ladder, and runs the request/acknowledge handshake with
//! the vehicle. Each decision is recorded as flag bits in the slice where it happened.
//!
//! ```rust
//! use groundlink::adaptive::{AdaptiveVideoController, SwitchState, VideoProfile};
//! use groundlink::config::AdaptiveConfig;
//! use groundlink::link::NullLink;
//! use groundlink::telemetry::RuntimeInfoStore;
//!
//! let mut store = RuntimeInfoStore::new(100, 0);
//! let mut controller = AdaptiveVideoController::new(AdaptiveConfig::default(), 1);
//!
//! let request = controller.request_user_profile(7, VideoProfile::LowQuality, &mut store, 0);
//! controller.send_pending(&NullLink, 0);
//! assert!(controller.on_switch_confirmation(request.request_id, 4, 7, &mut store, 20));
//! assert_eq!(controller.state(7), SwitchState::Stable);
//! assert_eq!(controller.confirmed_profile(7), VideoProfile::LowQuality);
//! ```

mod controller;
mod policy;
mod profile;

pub use controller::{AdaptiveVideoController, ProfileSwitchRequest, SwitchState};
pub use policy::{LinkAssessment, SliceVerdict, assess, classify};
pub use profile::{SwitchReason, VideoProfile};

/// Flag bits recorded in each slice's `adaptive_flags`.
pub use crate::types::flags::adaptive as flags;
