//! Per-slice aggregates

use super::ring::TimeSlot;
use super::{
    LINK_QUALITY_UNKNOWN, MAX_CONCURRENT_VEHICLES, MAX_RADIO_ANTENNAS, MAX_RADIO_INTERFACES,
};
use crate::types::{AdaptiveFlags, Millis};

/// Packet-level event attributed to one radio interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketEvent {
    /// A video shard was accepted.
    Video,
    /// A non-video packet (requests, acks, unknown types) arrived.
    Data,
    /// A run of positions was skipped in the interface's packet sequence.
    Missing(u16),
}

/// Receive counters for one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceCounters {
    pub rx_video_packets: u16,
    pub rx_data_packets: u16,
    pub rx_missing_packets: u16,
    pub rx_missing_max_gap: u16,
}

/// Signal statistics for one antenna.
///
/// `samples` doubles as the "has data" marker: min/max/avg are meaningless while it is 0.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AntennaSignal {
    pub dbm_last: i16,
    pub dbm_min: i16,
    pub dbm_max: i16,
    pub dbm_avg: i16,
    pub noise_last: i16,
    pub noise_min: i16,
    pub noise_max: i16,
    pub noise_avg: i16,
    pub dbm_change_min: i16,
    pub dbm_change_max: i16,
    pub samples: u16,
}

impl AntennaSignal {
    /// Fold one sample in. `change` is the difference from the antenna's previous sample,
    /// when there was one.
    pub(crate) fn record(&mut self, dbm: i16, noise: i16, change: Option<i16>) {
        if self.samples == 0 {
            *self = AntennaSignal {
                dbm_last: dbm,
                dbm_min: dbm,
                dbm_max: dbm,
                dbm_avg: dbm,
                noise_last: noise,
                noise_min: noise,
                noise_max: noise,
                noise_avg: noise,
                dbm_change_min: change.unwrap_or(0),
                dbm_change_max: change.unwrap_or(0),
                samples: 1,
            };
            return;
        }

        self.dbm_last = dbm;
        self.dbm_min = self.dbm_min.min(dbm);
        self.dbm_max = self.dbm_max.max(dbm);
        self.dbm_avg = running_average(self.dbm_avg, dbm, self.samples);
        self.noise_last = noise;
        self.noise_min = self.noise_min.min(noise);
        self.noise_max = self.noise_max.max(noise);
        self.noise_avg = running_average(self.noise_avg, noise, self.samples);
        if let Some(change) = change {
            self.dbm_change_min = self.dbm_change_min.min(change);
            self.dbm_change_max = self.dbm_change_max.max(change);
        }
        self.samples = self.samples.saturating_add(1);
    }

    pub fn has_data(&self) -> bool {
        self.samples > 0
    }
}

fn running_average(avg: i16, sample: i16, samples: u16) -> i16 {
    let n = i32::from(samples);
    ((i32::from(avg) * n + i32::from(sample)) / (n + 1)) as i16
}

/// Signal statistics for one interface.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InterfaceSignal {
    pub antenna_count: u8,
    pub antennas: [AntennaSignal; MAX_RADIO_ANTENNAS],
}

/// Block-level reassembly counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BlockCounters {
    pub processed_packets: u16,
    pub recv_video_data_packets: u16,
    pub recv_video_ec_packets: u16,
    pub recv_end_of_frame: u16,
    pub output_video_packets: u16,
    pub output_single_ec_used: u16,
    pub output_two_ec_used: u16,
    pub output_multiple_ec_used: u16,
    pub output_max_ec_used: u16,
    pub skipped_blocks: u16,
    pub retransmitted_packets: u16,
}

/// Per-vehicle round-trip statistics.
///
/// Round trips are stored clamped to `1..=u16::MAX`, so `max_ack_ms == 0` means no ack
/// was seen in the slice.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct VehicleSliceStats {
    pub min_ack_ms: u16,
    pub max_ack_ms: u16,
    pub retransmissions_requested: u16,
    pub retransmissions_acked: u16,
}

impl VehicleSliceStats {
    pub(crate) fn record_ack(&mut self, round_trip_ms: u64) {
        let rtt = round_trip_ms.clamp(1, u64::from(u16::MAX)) as u16;
        if self.max_ack_ms == 0 {
            self.min_ack_ms = rtt;
            self.max_ack_ms = rtt;
        } else {
            self.min_ack_ms = self.min_ack_ms.min(rtt);
            self.max_ack_ms = self.max_ack_ms.max(rtt);
        }
    }

    pub fn has_acks(&self) -> bool {
        self.max_ack_ms > 0
    }
}

/// One fixed-duration window of aggregated link counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSlice {
    pub start_ms: Millis,
    pub interfaces: [InterfaceCounters; MAX_RADIO_INTERFACES],
    pub signal: [InterfaceSignal; MAX_RADIO_INTERFACES],
    pub blocks: BlockCounters,
    pub link_quality_percent: u8,
    pub adaptive_flags: AdaptiveFlags,
    pub vehicles: [VehicleSliceStats; MAX_CONCURRENT_VEHICLES],
}

impl Default for TimeSlice {
    fn default() -> Self {
        Self {
            start_ms: 0,
            interfaces: Default::default(),
            signal: Default::default(),
            blocks: BlockCounters::default(),
            link_quality_percent: LINK_QUALITY_UNKNOWN,
            adaptive_flags: AdaptiveFlags::default(),
            vehicles: Default::default(),
        }
    }
}

impl TimeSlot for TimeSlice {
    fn reset(&mut self, start_ms: Millis) {
        *self = TimeSlice { start_ms, ..TimeSlice::default() };
    }
}

impl TimeSlice {
    pub(crate) fn record_event(&mut self, interface: usize, event: PacketEvent) {
        let Some(counters) = self.interfaces.get_mut(interface) else {
            return;
        };
        match event {
            PacketEvent::Video => {
                counters.rx_video_packets = counters.rx_video_packets.saturating_add(1)
            }
            PacketEvent::Data => {
                counters.rx_data_packets = counters.rx_data_packets.saturating_add(1)
            }
            PacketEvent::Missing(run) => {
                counters.rx_missing_packets = counters.rx_missing_packets.saturating_add(run);
                counters.rx_missing_max_gap = counters.rx_missing_max_gap.max(run);
            }
        }
    }

    /// Video shards received on every interface.
    pub fn total_video_packets(&self) -> u32 {
        self.interfaces.iter().map(|c| u32::from(c.rx_video_packets)).sum()
    }

    /// Positions reported missing on every interface.
    pub fn total_missing_packets(&self) -> u32 {
        self.interfaces.iter().map(|c| u32::from(c.rx_missing_packets)).sum()
    }

    /// Loss over all interfaces, or `None` when the slice saw no video traffic.
    pub fn loss_percent(&self) -> Option<u8> {
        let received = self.total_video_packets();
        let missing = self.total_missing_packets();
        let total = received + missing;
        if total == 0 {
            return None;
        }
        Some((missing * 100 / total) as u8)
    }

    /// Strongest average dBm across all antennas that reported.
    pub fn best_antenna_dbm(&self) -> Option<i16> {
        self.signal
            .iter()
            .flat_map(|interface| interface.antennas.iter())
            .filter(|antenna| antenna.has_data())
            .map(|antenna| antenna.dbm_avg)
            .max()
    }

    /// Finalize derived fields when the slice stops being current.
    pub(crate) fn close(&mut self) {
        self.link_quality_percent = match self.loss_percent() {
            Some(loss) => 100 - loss,
            None => LINK_QUALITY_UNKNOWN,
        };
    }

    /// Whether the slice saw any video traffic at all.
    pub fn has_traffic(&self) -> bool {
        self.total_video_packets() + self.total_missing_packets() > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn antenna_statistics_track_extremes_and_average() {
        let mut antenna = AntennaSignal::default();
        antenna.record(-60, -95, None);
        antenna.record(-70, -90, Some(-10));
        antenna.record(-50, -92, Some(20));

        assert_eq!(antenna.dbm_last, -50);
        assert_eq!(antenna.dbm_min, -70);
        assert_eq!(antenna.dbm_max, -50);
        assert_eq!(antenna.dbm_avg, -60);
        assert_eq!(antenna.noise_min, -95);
        assert_eq!(antenna.noise_max, -90);
        assert_eq!(antenna.dbm_change_min, -10);
        assert_eq!(antenna.dbm_change_max, 20);
        assert_eq!(antenna.samples, 3);
    }

    #[test]
    fn counters_saturate() {
        let mut slice = TimeSlice::default();
        slice.interfaces[1].rx_missing_packets = u16::MAX - 1;
        slice.record_event(1, PacketEvent::Missing(7));
        slice.record_event(1, PacketEvent::Missing(3));
        assert_eq!(slice.interfaces[1].rx_missing_packets, u16::MAX);
        assert_eq!(slice.interfaces[1].rx_missing_max_gap, 7);

        slice.record_event(9, PacketEvent::Video);
        assert_eq!(slice.total_video_packets(), 0);
    }

    #[test]
    fn link_quality_on_close() {
        let mut slice = TimeSlice::default();
        slice.close();
        assert_eq!(slice.link_quality_percent, LINK_QUALITY_UNKNOWN);

        for _ in 0..3 {
            slice.record_event(0, PacketEvent::Video);
        }
        slice.record_event(2, PacketEvent::Missing(1));
        slice.close();
        assert_eq!(slice.loss_percent(), Some(25));
        assert_eq!(slice.link_quality_percent, 75);
    }

    #[test]
    fn ack_round_trips_clamp_to_nonzero() {
        let mut stats = VehicleSliceStats::default();
        assert!(!stats.has_acks());
        stats.record_ack(0);
        stats.record_ack(40);
        stats.record_ack(1_000_000);
        assert_eq!(stats.min_ack_ms, 1);
        assert_eq!(stats.max_ack_ms, u16::MAX);
    }

    #[test]
    fn reset_clears_everything_but_start() {
        let mut slice = TimeSlice::default();
        slice.blocks.skipped_blocks = 4;
        slice.adaptive_flags.insert(crate::types::flags::adaptive::ACK_RECEIVED);
        slice.reset(500);
        assert_eq!(slice, TimeSlice { start_ms: 500, ..TimeSlice::default() });
    }
}
