//! Inbound packet dispatch.
//!
//! The router owns every mutable piece of the pipeline: the telemetry store, the
//! reassembler pool and the adaptive controller. It is driven from a single task, so
//! nothing in here locks.

mod registry;

use std::sync::Arc;

use tracing::{debug, trace, warn};

pub use registry::{MIN_SOFTWARE_BUILD, StaticRegistry, VehicleDescriptor, VehicleRegistry};

use crate::adaptive::{AdaptiveVideoController, ProfileSwitchRequest, VideoProfile};
use crate::config::StationConfig;
use crate::link::LinkSender;
use crate::packet::{self, Packet};
use crate::telemetry::{MAX_RADIO_INTERFACES, PacketEvent, RuntimeInfoStore};
use crate::types::Millis;
use crate::video::{Outcome, ReassemblerPool, ReassemblyIo, VideoSink};

/// Why a datagram was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    UnknownVehicle,
    /// The vehicle's software predates this packet format.
    ProtocolMismatch,
    Malformed,
}

/// What became of one inbound datagram.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteOutcome {
    Video(Outcome),
    /// No reassembler slot was free for a new stream.
    PoolExhausted,
    /// A profile switch acknowledgment; `accepted` is false for stale ids.
    Confirmation { accepted: bool },
    /// Valid but not for this pipeline; counted as a data packet.
    Ignored,
    Rejected(RejectReason),
}

/// Work done by one housekeeping tick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub skipped_blocks: usize,
    pub switch_requests_sent: usize,
    /// Idle streams whose reassembler slot was freed.
    pub released_streams: usize,
    pub slice_closed: bool,
}

pub struct PacketRouter {
    store: RuntimeInfoStore,
    pool: ReassemblerPool,
    controller: AdaptiveVideoController,
    registry: Box<dyn VehicleRegistry>,
    link: Arc<dyn LinkSender>,
    sink: Box<dyn VideoSink>,
}

impl std::fmt::Debug for PacketRouter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketRouter")
            .field("slice", &self.store.current_index())
            .field("pool", &self.pool)
            .field("controller", &self.controller)
            .finish()
    }
}

impl PacketRouter {
    pub fn new(
        config: &StationConfig,
        registry: Box<dyn VehicleRegistry>,
        link: Arc<dyn LinkSender>,
        sink: Box<dyn VideoSink>,
        now_ms: Millis,
    ) -> Self {
        Self {
            store: RuntimeInfoStore::new(config.telemetry.slice_interval_ms, now_ms),
            pool: ReassemblerPool::new(
                config.reassembly.clone(),
                config.retransmission.clone(),
                config.station_id,
            ),
            controller: AdaptiveVideoController::new(config.adaptive.clone(), config.station_id),
            registry,
            link,
            sink,
        }
    }

    /// Dispatch one datagram received on radio `interface`.
    pub fn route(&mut self, interface: usize, datagram: &[u8], now_ms: Millis) -> RouteOutcome {
        if interface >= MAX_RADIO_INTERFACES {
            warn!(interface, "Datagram from unsupported radio interface");
            return RouteOutcome::Rejected(RejectReason::Malformed);
        }

        let (header, packet) = match packet::decode(datagram) {
            Ok(decoded) => decoded,
            Err(e) => {
                debug!(interface, len = datagram.len(), error = %e, "Dropping malformed datagram");
                return RouteOutcome::Rejected(RejectReason::Malformed);
            }
        };

        let vehicle_id = header.vehicle_id_src;
        let Some(vehicle) = self.registry.find_vehicle(vehicle_id) else {
            trace!(vehicle_id, "Datagram from unknown vehicle");
            return RouteOutcome::Rejected(RejectReason::UnknownVehicle);
        };
        if !vehicle.is_compatible() {
            debug!(
                vehicle_id,
                software_build = vehicle.software_build,
                minimum = MIN_SOFTWARE_BUILD,
                "Vehicle software too old"
            );
            return RouteOutcome::Rejected(RejectReason::ProtocolMismatch);
        }
        self.store.admit_vehicle(vehicle_id);

        match packet {
            Packet::Video(video) => {
                let Some(reassembler) = self.pool.get_or_create(vehicle_id, video.video.stream_id, now_ms)
                else {
                    self.store.record_packet_event(interface, PacketEvent::Video);
                    return RouteOutcome::PoolExhausted;
                };
                let mut io =
                    ReassemblyIo::new(now_ms, &mut self.store, self.link.as_ref(), self.sink.as_mut());
                RouteOutcome::Video(reassembler.handle_packet(interface, &video, &mut io))
            }
            Packet::SwitchAck(ack) => {
                self.store.record_packet_event(interface, PacketEvent::Data);
                let accepted = self.controller.on_switch_confirmation(
                    ack.request_id,
                    ack.profile,
                    vehicle_id,
                    &mut self.store,
                    now_ms,
                );
                RouteOutcome::Confirmation { accepted }
            }
            Packet::RetransmissionRequest(_) | Packet::SwitchRequest(_) | Packet::Other => {
                self.store.record_packet_event(interface, PacketEvent::Data);
                trace!(vehicle_id, packet_type = header.packet_type, "Ignoring non-video packet");
                RouteOutcome::Ignored
            }
        }
    }

    /// Signal strength reported by the radio for one antenna of `interface`.
    ///
    /// Record it before routing the datagram it came with, so the sample lands in the
    /// same slice as the packet.
    pub fn record_radio_sample(&mut self, interface: usize, antenna: usize, dbm: i16, noise: i16) {
        self.store.record_radio_sample(interface, antenna, dbm, noise);
    }

    /// Timeouts, adaptive decisions, idle stream release and slice advancement.
    pub fn tick(&mut self, now_ms: Millis) -> TickReport {
        let mut io = ReassemblyIo::new(now_ms, &mut self.store, self.link.as_ref(), self.sink.as_mut());
        let skipped_blocks = self.pool.check_timeouts(&mut io);
        let switch_requests_sent = self.controller.poll(&mut self.store, self.link.as_ref(), now_ms);
        let released_streams = self.pool.release_idle(now_ms);
        let slice_closed = self.store.advance_if_due(now_ms);
        TickReport { skipped_blocks, switch_requests_sent, released_streams, slice_closed }
    }

    /// Close the current slice if its interval is over. Returns whether it closed.
    pub fn advance_if_due(&mut self, now_ms: Millis) -> bool {
        self.store.advance_if_due(now_ms)
    }

    /// Queue an operator profile request; it goes out on the next tick.
    pub fn request_user_profile(
        &mut self,
        vehicle_id: u32,
        profile: VideoProfile,
        now_ms: Millis,
    ) -> ProfileSwitchRequest {
        self.controller.request_user_profile(vehicle_id, profile, &mut self.store, now_ms)
    }

    pub fn store(&self) -> &RuntimeInfoStore {
        &self.store
    }

    pub fn pool(&self) -> &ReassemblerPool {
        &self.pool
    }

    pub fn controller(&self) -> &AdaptiveVideoController {
        &self.controller
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ReassemblyConfig, VehicleEntry};
    use crate::packet::{RetransmissionRequest, SwitchAckPacket};
    use crate::test_utils::{BlockBuilder, RecordingLink, TEST_STATION_ID, TEST_VEHICLE_ID};
    use crate::video::DeliveredPacket;
    use std::sync::Mutex;

    #[derive(Clone, Default)]
    struct SharedSink(Arc<Mutex<Vec<DeliveredPacket>>>);

    impl VideoSink for SharedSink {
        fn deliver(&mut self, packet: DeliveredPacket) {
            if let Ok(mut delivered) = self.0.lock() {
                delivered.push(packet);
            }
        }
    }

    impl SharedSink {
        fn len(&self) -> usize {
            self.0.lock().map(|d| d.len()).unwrap_or_default()
        }
    }

    fn config() -> StationConfig {
        StationConfig {
            station_id: TEST_STATION_ID,
            reassembly: ReassemblyConfig { pool_capacity: 1, idle_release_ms: 1_000, ..Default::default() },
            vehicles: vec![
                VehicleEntry { vehicle_id: TEST_VEHICLE_ID, software_build: 260, name: "quad".into() },
                VehicleEntry { vehicle_id: 0x2002, software_build: 241, name: "old".into() },
                VehicleEntry { vehicle_id: 0x3003, software_build: 300, name: "wing".into() },
            ],
            ..Default::default()
        }
    }

    fn router(link: &RecordingLink, sink: &SharedSink) -> PacketRouter {
        let config = config();
        PacketRouter::new(
            &config,
            Box::new(StaticRegistry::from_config(&config.vehicles)),
            Arc::new(link.clone()),
            Box::new(sink.clone()),
            0,
        )
    }

    #[test]
    fn video_reaches_the_reassembler() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        let block = BlockBuilder::new(0, 2, 0).build();
        let outcomes: Vec<_> =
            block.datagrams().iter().map(|d| router.route(1, d, 5)).collect();
        assert_eq!(outcomes.last(), Some(&RouteOutcome::Video(Outcome::EndOfBlock)));
        assert_eq!(sink.len(), 2);
        assert_eq!(router.store().slice(0).interfaces[1].rx_video_packets, 2);
        assert_eq!(router.store().vehicles().collect::<Vec<_>>(), vec![TEST_VEHICLE_ID]);
    }

    #[test]
    fn unknown_old_and_malformed_are_rejected() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        let stranger = BlockBuilder::new(0, 1, 0).vehicle(0x9999).build().datagrams();
        assert_eq!(router.route(0, &stranger[0], 1), RouteOutcome::Rejected(RejectReason::UnknownVehicle));

        let old = BlockBuilder::new(0, 1, 0).vehicle(0x2002).build().datagrams();
        assert_eq!(router.route(0, &old[0], 1), RouteOutcome::Rejected(RejectReason::ProtocolMismatch));

        assert_eq!(router.route(0, &[0x62, 0, 3], 1), RouteOutcome::Rejected(RejectReason::Malformed));
        let valid = BlockBuilder::new(0, 1, 0).build().datagrams();
        assert_eq!(router.route(7, &valid[0], 1), RouteOutcome::Rejected(RejectReason::Malformed));

        assert!(!router.store().slice(0).has_traffic());
        assert_eq!(router.store().vehicles().count(), 0);
    }

    #[test]
    fn control_packets_count_as_data() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        let request = RetransmissionRequest { stream_id: 0, block_index: 1, indices: vec![0] };
        let datagram = request.encode(TEST_VEHICLE_ID, TEST_STATION_ID);
        assert_eq!(router.route(0, &datagram, 1), RouteOutcome::Ignored);

        let ack = SwitchAckPacket { request_id: 99, profile: 3 }.encode(TEST_VEHICLE_ID, TEST_STATION_ID);
        assert_eq!(router.route(0, &ack, 1), RouteOutcome::Confirmation { accepted: false });
        assert_eq!(router.store().slice(0).interfaces[0].rx_data_packets, 2);
    }

    #[test]
    fn acknowledged_user_request_round_trip() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        let request = router.request_user_profile(TEST_VEHICLE_ID, VideoProfile::LowQuality, 0);
        let report = router.tick(10);
        assert_eq!(report.switch_requests_sent, 1);

        let ack = SwitchAckPacket { request_id: request.request_id, profile: VideoProfile::LowQuality.code() }
            .encode(TEST_VEHICLE_ID, TEST_STATION_ID);
        assert_eq!(router.route(0, &ack, 30), RouteOutcome::Confirmation { accepted: true });
        assert_eq!(router.controller().confirmed_profile(TEST_VEHICLE_ID), VideoProfile::LowQuality);
    }

    #[test]
    fn second_stream_hits_the_pool_limit() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        let first = BlockBuilder::new(0, 2, 0).build().datagrams();
        router.route(0, &first[0], 1);
        let other = BlockBuilder::new(0, 2, 0).vehicle(0x3003).build().datagrams();
        assert_eq!(router.route(0, &other[0], 1), RouteOutcome::PoolExhausted);

        assert_eq!(router.route(0, &first[1], 2), RouteOutcome::Video(Outcome::EndOfBlock));
        assert_eq!(router.pool().len(), 1);
    }

    #[test]
    fn idle_stream_frees_its_slot() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        let first = BlockBuilder::new(0, 2, 0).build().datagrams();
        router.route(0, &first[0], 1);
        assert_eq!(router.tick(900).released_streams, 0);

        let other = BlockBuilder::new(0, 1, 0).vehicle(0x3003).build().datagrams();
        assert_eq!(router.route(0, &other[0], 950), RouteOutcome::PoolExhausted);

        assert_eq!(router.tick(1_001).released_streams, 1);
        assert!(router.pool().is_empty());
        assert_eq!(router.route(0, &other[0], 1_002), RouteOutcome::Video(Outcome::EndOfBlock));
        assert!(router.pool().get(0x3003, 0).is_some());
    }

    #[test]
    fn weak_signal_alone_lowers_the_profile() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        let video = BlockBuilder::new(0, 1, 0).build().datagrams();
        router.route(0, &video[0], 1);
        for now in (10..=400).step_by(10) {
            router.record_radio_sample(0, 0, -95, -100);
            router.tick(now);
        }

        let switches: Vec<_> = link
            .datagrams()
            .iter()
            .filter_map(|d| match packet::decode(d) {
                Ok((_, Packet::SwitchRequest(request))) => Some(request.profile),
                _ => None,
            })
            .collect();
        assert_eq!(switches.first(), Some(&VideoProfile::MediumQuality.code()));
        assert_eq!(router.controller().last_requested_profile(TEST_VEHICLE_ID), Some(VideoProfile::MediumQuality));
        assert!(router.store().slice(1).best_antenna_dbm().is_some_and(|dbm| dbm < -88));
    }

    #[test]
    fn tick_closes_slices_on_schedule() {
        let link = RecordingLink::default();
        let sink = SharedSink::default();
        let mut router = router(&link, &sink);

        assert!(!router.tick(99).slice_closed);
        assert!(router.tick(100).slice_closed);
        assert_eq!(router.store().current_index(), 1);
    }
}
