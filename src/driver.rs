//! Driver spawns and runs the packet processing task

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior, interval};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use crate::adaptive::VideoProfile;
use crate::router::PacketRouter;
use crate::source::PacketSource;
use crate::telemetry::{RuntimeInfoStore, TelemetryRegion};
use crate::types::Millis;

/// Requests from the station handle into the driver task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StationCommand {
    RequestProfile { vehicle_id: u32, profile: VideoProfile },
}

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Snapshot of the store after each closed slice
    pub telemetry: watch::Receiver<Option<Arc<RuntimeInfoStore>>>,
    pub commands: mpsc::Sender<StationCommand>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
    /// Hands the router back when the task ends
    pub task: JoinHandle<PacketRouter>,
}

/// Runs the receive pipeline on one task.
///
/// The task owns the router and the source, so every mutation of the pipeline happens
/// on it. It wakes for datagrams, operator commands, and a housekeeping tick four
/// times per slice.
pub struct Driver;

impl Driver {
    const MAX_ERRORS: u32 = 10;

    pub fn spawn<S>(router: PacketRouter, source: S, region: Option<TelemetryRegion>) -> DriverChannels
    where
        S: PacketSource,
    {
        let (telemetry_tx, telemetry_rx) = watch::channel(None);
        let (command_tx, command_rx) = mpsc::channel(16);
        let cancel = CancellationToken::new();

        let task_cancel = cancel.clone();
        let task = tokio::spawn(async move {
            Self::packet_task(router, source, region, telemetry_tx, command_rx, task_cancel).await
        });

        DriverChannels { telemetry: telemetry_rx, commands: command_tx, cancel, task }
    }

    async fn packet_task<S>(
        mut router: PacketRouter,
        mut source: S,
        mut region: Option<TelemetryRegion>,
        telemetry_tx: watch::Sender<Option<Arc<RuntimeInfoStore>>>,
        mut commands: mpsc::Receiver<StationCommand>,
        cancel: CancellationToken,
    ) -> PacketRouter
    where
        S: PacketSource,
    {
        let start = Instant::now();
        let now_ms = || start.elapsed().as_millis() as Millis;

        let tick_period = Duration::from_millis((router.store().slice_interval_ms() / 4).max(1));
        let mut ticker = interval(tick_period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        info!(interfaces = source.interface_count(), tick_ms = tick_period.as_millis() as u64, "Packet task started");
        let mut datagrams = 0u64;
        let mut error_count = 0u32;

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Packet task cancelled");
                    break;
                }
                Some(command) = commands.recv() => {
                    match command {
                        StationCommand::RequestProfile { vehicle_id, profile } => {
                            router.request_user_profile(vehicle_id, profile, now_ms());
                        }
                    }
                }
                _ = ticker.tick() => {
                    let report = router.tick(now_ms());
                    if report.skipped_blocks > 0 || report.switch_requests_sent > 0 || report.released_streams > 0 {
                        debug!(?report, "Housekeeping");
                    }
                    if report.slice_closed {
                        Self::publish(&router, region.as_mut(), &telemetry_tx);
                    }
                }
                result = source.next_datagram() => match result {
                    Ok(Some(datagram)) => {
                        datagrams += 1;
                        error_count = 0;
                        let now = now_ms();
                        if router.advance_if_due(now) {
                            Self::publish(&router, region.as_mut(), &telemetry_tx);
                        }
                        for sample in &datagram.signal {
                            router.record_radio_sample(
                                datagram.interface,
                                usize::from(sample.antenna),
                                sample.dbm,
                                sample.noise,
                            );
                        }
                        let outcome = router.route(datagram.interface, &datagram.payload, now);
                        trace!(interface = datagram.interface, ?outcome, "Datagram routed");
                    }
                    Ok(None) => {
                        info!(datagrams, "Packet source ended");
                        break;
                    }
                    Err(e) => {
                        error_count += 1;
                        error!(error = %e, attempt = error_count, max = Self::MAX_ERRORS, "Packet source error");
                        if error_count >= Self::MAX_ERRORS {
                            error!("Too many packet source errors, shutting down");
                            break;
                        }
                        // Exponential backoff: 50ms, 100ms, 200ms, ...
                        let backoff = Duration::from_millis(50 * (1 << error_count.min(5)));
                        tokio::time::sleep(backoff).await;
                    }
                },
            }
        }

        // Final snapshot so subscribers see the state at shutdown.
        Self::publish(&router, region.as_mut(), &telemetry_tx);
        info!(datagrams, "Packet task ended");
        router
    }

    fn publish(
        router: &PacketRouter,
        region: Option<&mut TelemetryRegion>,
        telemetry_tx: &watch::Sender<Option<Arc<RuntimeInfoStore>>>,
    ) {
        let store = router.store();
        if let Some(region) = region {
            if let Err(e) = region.publish(store) {
                warn!(path = %region.path().display(), error = %e, "Failed to publish telemetry region");
            }
        }
        telemetry_tx.send_replace(Some(Arc::new(store.clone())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{StationConfig, VehicleEntry};
    use crate::router::StaticRegistry;
    use crate::packet::{self, Packet};
    use crate::source::{AntennaSample, InboundDatagram};
    use crate::sources::ChannelSource;
    use crate::test_utils::{BlockBuilder, RecordingLink, TEST_STATION_ID, TEST_VEHICLE_ID};
    use crate::video::DeliveredPacket;

    fn router(link: &RecordingLink) -> PacketRouter {
        let config = StationConfig {
            station_id: TEST_STATION_ID,
            vehicles: vec![VehicleEntry {
                vehicle_id: TEST_VEHICLE_ID,
                software_build: 260,
                name: String::new(),
            }],
            ..Default::default()
        };
        PacketRouter::new(
            &config,
            Box::new(StaticRegistry::from_config(&config.vehicles)),
            Arc::new(link.clone()),
            Box::new(Vec::<DeliveredPacket>::new()),
            0,
        )
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_snapshots_as_slices_close() -> anyhow::Result<()> {
        let (tx, source) = ChannelSource::channel(16, 1);
        let channels = Driver::spawn(router(&RecordingLink::default()), source, None);
        let mut telemetry = channels.telemetry.clone();

        for datagram in BlockBuilder::new(0, 3, 1).build().datagrams() {
            tx.send(InboundDatagram::new(0, datagram)).await?;
        }

        tokio::time::sleep(Duration::from_millis(250)).await;
        telemetry.changed().await?;
        let snapshot = telemetry.borrow().clone().expect("snapshot published");
        let video: u32 = snapshot.recent(crate::telemetry::SLICE_COUNT).map(|s| s.total_video_packets()).sum();
        assert_eq!(video, 4);
        assert!(snapshot.current_index() >= 2);

        channels.cancel.cancel();
        let router = channels.task.await?;
        assert_eq!(router.pool().len(), 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn radio_signal_reaches_the_adaptive_policy() -> anyhow::Result<()> {
        let link = RecordingLink::default();
        let (tx, source) = ChannelSource::channel(16, 1);
        let channels = Driver::spawn(router(&link), source, None);

        let weak = AntennaSample { antenna: 0, dbm: -95, noise: -101 };
        for block in 0..45u32 {
            let datagram = BlockBuilder::new(block, 1, 0).build().datagrams().remove(0);
            tx.send(InboundDatagram::new(0, datagram).with_signal([weak])).await?;
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        channels.cancel.cancel();
        let router = channels.task.await?;
        assert_eq!(router.store().slice(1).best_antenna_dbm(), Some(-95));
        assert_eq!(router.controller().last_requested_profile(TEST_VEHICLE_ID), Some(VideoProfile::MediumQuality));
        let switch_requests = link
            .datagrams()
            .iter()
            .filter(|d| matches!(packet::decode(d), Ok((_, Packet::SwitchRequest(_)))))
            .count();
        assert!(switch_requests >= 1);
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn source_end_stops_the_task() -> anyhow::Result<()> {
        let (tx, source) = ChannelSource::channel(4, 1);
        let channels = Driver::spawn(router(&RecordingLink::default()), source, None);
        drop(tx);

        let router = channels.task.await?;
        assert!(router.pool().is_empty());
        assert!(channels.telemetry.borrow().is_some());
        Ok(())
    }
}
