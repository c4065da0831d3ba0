//! Per-vehicle profile switch state machine

use std::collections::HashMap;

use tracing::{debug, info, warn};

use super::policy::{LinkAssessment, assess};
use super::profile::{SwitchReason, VideoProfile};
use crate::config::AdaptiveConfig;
use crate::link::LinkSender;
use crate::packet::SwitchRequestPacket;
use crate::telemetry::RuntimeInfoStore;
use crate::types::Millis;
use crate::types::flags::adaptive;

/// A profile change asked of a vehicle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProfileSwitchRequest {
    /// Monotonic and never 0.
    pub request_id: u32,
    pub vehicle_id: u32,
    pub profile: VideoProfile,
    pub reason: SwitchReason,
    pub issued_at_ms: Millis,
    pub last_sent_at_ms: Option<Millis>,
    pub send_count: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SwitchState {
    Stable,
    /// Minted but not yet handed to the link.
    SwitchRequested(ProfileSwitchRequest),
    /// Sent; waiting for the vehicle's acknowledgment.
    AwaitingConfirmation(ProfileSwitchRequest),
}

impl SwitchState {
    pub fn request(&self) -> Option<&ProfileSwitchRequest> {
        match self {
            SwitchState::Stable => None,
            SwitchState::SwitchRequested(request) | SwitchState::AwaitingConfirmation(request) => {
                Some(request)
            }
        }
    }
}

#[derive(Debug, Clone)]
struct VehicleProfileState {
    state: SwitchState,
    confirmed: VideoProfile,
    last_requested: Option<VideoProfile>,
    last_switch_ms: Option<Millis>,
    // Slices older than this do not count toward the next decision.
    window_start_ms: Millis,
}

impl VehicleProfileState {
    fn new(initial: VideoProfile) -> Self {
        Self {
            state: SwitchState::Stable,
            confirmed: initial,
            last_requested: None,
            last_switch_ms: None,
            window_start_ms: 0,
        }
    }
}

/// Steers each vehicle's encoder profile from link telemetry.
///
/// Lowering reacts to a short run of bad slices; raising needs a longer run of clean
/// slices and a hold time since the last switch.
#[derive(Debug)]
pub struct AdaptiveVideoController {
    config: AdaptiveConfig,
    station_id: u32,
    next_request_id: u32,
    vehicles: HashMap<u32, VehicleProfileState>,
}

impl AdaptiveVideoController {
    pub fn new(config: AdaptiveConfig, station_id: u32) -> Self {
        Self { config, station_id, next_request_id: 1, vehicles: HashMap::new() }
    }

    /// Decide whether a stable vehicle should switch, and mint the request if so.
    pub fn evaluate(
        &mut self,
        vehicle_id: u32,
        store: &mut RuntimeInfoStore,
        now_ms: Millis,
    ) -> Option<ProfileSwitchRequest> {
        if !self.config.enabled || vehicle_id == 0 {
            return None;
        }
        let top = self.config.top_profile;
        let vehicle = self.vehicles.entry(vehicle_id).or_insert_with(|| VehicleProfileState::new(top));
        if vehicle.state != SwitchState::Stable {
            return None;
        }

        let LinkAssessment { bad_streak, good_streak } =
            assess(store, vehicle.window_start_ms, &self.config);
        let held = vehicle
            .last_switch_ms
            .is_none_or(|at| now_ms.saturating_sub(at) >= self.config.raise_hold_ms);

        let (profile, reason) = if bad_streak >= self.config.lower_window_slices {
            (vehicle.confirmed.lower(top)?, SwitchReason::AdaptiveLower)
        } else if good_streak >= self.config.raise_window_slices && held {
            (vehicle.confirmed.higher(top)?, SwitchReason::AdaptiveHigher)
        } else {
            return None;
        };

        info!(vehicle_id, ?profile, ?reason, bad_streak, good_streak, "Requesting profile switch");
        Some(self.issue(vehicle_id, profile, reason, store, now_ms))
    }

    /// Ask for `profile` on behalf of the operator, superseding any outstanding request.
    pub fn request_user_profile(
        &mut self,
        vehicle_id: u32,
        profile: VideoProfile,
        store: &mut RuntimeInfoStore,
        now_ms: Millis,
    ) -> ProfileSwitchRequest {
        if let Some(previous) = self.vehicles.get(&vehicle_id).and_then(|v| v.state.request()) {
            debug!(vehicle_id, request_id = previous.request_id, "Superseding outstanding request");
        }
        info!(vehicle_id, ?profile, "User profile request");
        self.issue(vehicle_id, profile, SwitchReason::User, store, now_ms)
    }

    /// Send new requests and re-send unconfirmed ones whose resend interval elapsed.
    ///
    /// Returns the number of datagrams handed to the link.
    pub fn send_pending(&mut self, link: &dyn LinkSender, now_ms: Millis) -> usize {
        let mut sent = 0;
        for (&vehicle_id, vehicle) in &mut self.vehicles {
            let request = match &mut vehicle.state {
                SwitchState::Stable => continue,
                SwitchState::SwitchRequested(request) => request,
                SwitchState::AwaitingConfirmation(request) => {
                    let due = request.last_sent_at_ms.is_none_or(|at| {
                        now_ms.saturating_sub(at) >= self.config.resend_interval_ms
                    });
                    if !due {
                        continue;
                    }
                    request
                }
            };

            let datagram = SwitchRequestPacket {
                request_id: request.request_id,
                profile: request.profile.code(),
                reason: request.reason.code(),
            }
            .encode(self.station_id, vehicle_id);
            if let Err(e) = link.send(vehicle_id, datagram) {
                warn!(vehicle_id, request_id = request.request_id, error = %e, "Failed to send profile switch");
                continue;
            }

            request.last_sent_at_ms = Some(now_ms);
            request.send_count += 1;
            sent += 1;
            let request = *request;
            if request.send_count == 1 {
                debug!(vehicle_id, request_id = request.request_id, "Profile switch sent");
            }
            vehicle.state = SwitchState::AwaitingConfirmation(request);
        }
        sent
    }

    /// Apply the vehicle's acknowledgment. Returns false, changing nothing, when
    /// `request_id` is not the vehicle's outstanding request.
    pub fn on_switch_confirmation(
        &mut self,
        request_id: u32,
        profile: u8,
        vehicle_id: u32,
        store: &mut RuntimeInfoStore,
        now_ms: Millis,
    ) -> bool {
        let top = self.config.top_profile;
        let Some(vehicle) = self.vehicles.get_mut(&vehicle_id) else {
            debug!(vehicle_id, request_id, "Confirmation from vehicle without requests");
            return false;
        };
        let request = match vehicle.state {
            SwitchState::AwaitingConfirmation(request) if request.request_id == request_id => request,
            _ => {
                debug!(vehicle_id, request_id, "Ignoring stale profile confirmation");
                return false;
            }
        };

        let confirmed = VideoProfile::from_code(profile).unwrap_or(request.profile);
        let mut bits = adaptive::ACK_RECEIVED | request.reason.requested_flag();
        match (vehicle.confirmed.rung(top), confirmed.rung(top)) {
            (Some(from), Some(to)) if to < from => bits |= adaptive::SWITCHED_LOWER,
            (Some(from), Some(to)) if to > from => bits |= adaptive::SWITCHED_HIGHER,
            _ => {}
        }
        if request.reason == SwitchReason::User {
            bits |= adaptive::SWITCHED_USER_SELECTABLE;
        }
        store.set_adaptive_flags(bits);
        if let Some(sent_at) = request.last_sent_at_ms {
            store.record_vehicle_ack(vehicle_id, now_ms.saturating_sub(sent_at));
        }

        info!(vehicle_id, request_id, from = ?vehicle.confirmed, to = ?confirmed, "Profile switch confirmed");
        vehicle.confirmed = confirmed;
        vehicle.state = SwitchState::Stable;
        vehicle.last_switch_ms = Some(now_ms);
        vehicle.window_start_ms = now_ms;
        true
    }

    /// Abandon requests left unconfirmed past the confirmation timeout.
    pub fn expire(&mut self, now_ms: Millis) -> Vec<ProfileSwitchRequest> {
        let mut abandoned = Vec::new();
        for vehicle in self.vehicles.values_mut() {
            let Some(request) = vehicle.state.request().copied() else {
                continue;
            };
            if now_ms.saturating_sub(request.issued_at_ms) < self.config.confirmation_timeout_ms {
                continue;
            }
            warn!(
                vehicle_id = request.vehicle_id,
                request_id = request.request_id,
                sends = request.send_count,
                "Profile switch unconfirmed, abandoning"
            );
            vehicle.state = SwitchState::Stable;
            abandoned.push(request);
        }
        abandoned
    }

    /// Expire, evaluate every vehicle in the telemetry table, then send.
    pub fn poll(&mut self, store: &mut RuntimeInfoStore, link: &dyn LinkSender, now_ms: Millis) -> usize {
        self.expire(now_ms);
        let vehicles: Vec<u32> = store.vehicles().collect();
        for vehicle_id in vehicles {
            self.evaluate(vehicle_id, store, now_ms);
        }
        self.send_pending(link, now_ms)
    }

    /// Last profile the vehicle confirmed; the top profile before any confirmation.
    pub fn confirmed_profile(&self, vehicle_id: u32) -> VideoProfile {
        self.vehicles.get(&vehicle_id).map_or(self.config.top_profile, |v| v.confirmed)
    }

    pub fn last_requested_profile(&self, vehicle_id: u32) -> Option<VideoProfile> {
        self.vehicles.get(&vehicle_id).and_then(|v| v.last_requested)
    }

    pub fn state(&self, vehicle_id: u32) -> SwitchState {
        self.vehicles.get(&vehicle_id).map_or(SwitchState::Stable, |v| v.state)
    }

    fn issue(
        &mut self,
        vehicle_id: u32,
        profile: VideoProfile,
        reason: SwitchReason,
        store: &mut RuntimeInfoStore,
        now_ms: Millis,
    ) -> ProfileSwitchRequest {
        let request_id = self.next_request_id;
        self.next_request_id = self.next_request_id.wrapping_add(1).max(1);

        let request = ProfileSwitchRequest {
            request_id,
            vehicle_id,
            profile,
            reason,
            issued_at_ms: now_ms,
            last_sent_at_ms: None,
            send_count: 0,
        };
        let top = self.config.top_profile;
        let vehicle = self.vehicles.entry(vehicle_id).or_insert_with(|| VehicleProfileState::new(top));
        vehicle.state = SwitchState::SwitchRequested(request);
        vehicle.last_requested = Some(profile);
        vehicle.window_start_ms = now_ms;
        store.set_adaptive_flags(reason.requested_flag());
        request
    }
}
