//! Ground station entry point

use std::sync::Arc;
use std::time::Duration;

use futures::{Stream, StreamExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::adaptive::VideoProfile;
use crate::config::StationConfig;
use crate::driver::{Driver, StationCommand};
use crate::link::{LinkSender, NullLink, UdpLink};
use crate::router::{PacketRouter, StaticRegistry};
use crate::source::PacketSource;
use crate::sources::UdpSource;
use crate::stream::ThrottleExt;
use crate::telemetry::{RuntimeInfoStore, TelemetryRegion};
use crate::types::UpdateRate;
use crate::video::{ChannelSink, DeliveredPacket, VideoSink};
use crate::{LinkError, Result};

/// Starts receive pipelines.
pub struct GroundStation;

impl GroundStation {
    /// Start the pipeline on `source`. Must be called from within a Tokio runtime.
    ///
    /// Fails only when the configuration is invalid or the shared telemetry region
    /// cannot be created.
    pub fn start<S>(
        config: &StationConfig,
        source: S,
        link: Arc<dyn LinkSender>,
        sink: Box<dyn VideoSink>,
    ) -> Result<StationHandle>
    where
        S: PacketSource,
    {
        config.validate()?;
        let region = config.telemetry.region_path.as_ref().map(TelemetryRegion::create).transpose()?;

        let registry = StaticRegistry::from_config(&config.vehicles);
        info!(station_id = config.station_id, vehicles = registry.len(), "Starting ground station");
        let router = PacketRouter::new(config, Box::new(registry), link, sink, 0);
        let channels = Driver::spawn(router, source, region);

        Ok(StationHandle {
            telemetry: channels.telemetry,
            commands: channels.commands,
            slice_interval: Duration::from_millis(config.telemetry.slice_interval_ms),
            cancel: channels.cancel,
            task: Some(channels.task),
        })
    }

    /// Bind the configured radio sockets and start.
    ///
    /// Requests go back to `network.vehicle_addr` over the first interface socket;
    /// without one they are dropped. Returns the handle and the delivered video.
    pub async fn bind(
        config: &StationConfig,
    ) -> Result<(StationHandle, mpsc::Receiver<DeliveredPacket>)> {
        let source = UdpSource::bind(&config.network.listen).await?;
        let link: Arc<dyn LinkSender> = match (config.network.vehicle_addr, source.socket(0)) {
            (Some(target), Some(socket)) => Arc::new(UdpLink::ready(socket, target).await?),
            (Some(_), None) => {
                return Err(LinkError::config("network.vehicle_addr needs at least one listen address"));
            }
            (None, _) => Arc::new(NullLink),
        };
        let (sink, video) = ChannelSink::channel(config.network.video_queue);
        let handle = Self::start(config, source, link, Box::new(sink))?;
        Ok((handle, video))
    }
}

/// Handle to a running pipeline. Dropping it stops the pipeline.
pub struct StationHandle {
    telemetry: watch::Receiver<Option<Arc<RuntimeInfoStore>>>,
    commands: mpsc::Sender<StationCommand>,
    slice_interval: Duration,
    cancel: CancellationToken,
    task: Option<JoinHandle<PacketRouter>>,
}

impl StationHandle {
    /// Telemetry snapshots, one per closed slice or fewer when `rate` asks for it.
    pub fn telemetry(&self, rate: UpdateRate) -> impl Stream<Item = Arc<RuntimeInfoStore>> + 'static {
        let snapshots = WatchStream::new(self.telemetry.clone()).filter_map(|opt| async move { opt });
        match rate.throttle_interval(self.slice_interval) {
            None => snapshots.boxed(),
            Some(period) => snapshots.throttle(period).boxed(),
        }
    }

    /// Most recent snapshot, if a slice has closed yet.
    pub fn latest_telemetry(&self) -> Option<Arc<RuntimeInfoStore>> {
        self.telemetry.borrow().clone()
    }

    /// Ask a vehicle to switch profile on the operator's behalf.
    pub fn request_profile(&self, vehicle_id: u32, profile: VideoProfile) -> Result<()> {
        self.commands
            .try_send(StationCommand::RequestProfile { vehicle_id, profile })
            .map_err(|_| LinkError::send_failed("station command queue unavailable"))
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the pipeline and wait for it. Returns the router for inspection.
    pub async fn shutdown(mut self) -> Option<PacketRouter> {
        self.cancel.cancel();
        let task = self.task.take()?;
        task.await.ok()
    }
}

impl Drop for StationHandle {
    fn drop(&mut self) {
        debug!("Dropping station handle");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VehicleEntry;
    use crate::source::InboundDatagram;
    use crate::sources::ChannelSource;
    use crate::test_utils::{BlockBuilder, RecordingLink, TEST_VEHICLE_ID};

    fn config() -> StationConfig {
        StationConfig {
            station_id: 0xA0,
            vehicles: vec![VehicleEntry { vehicle_id: TEST_VEHICLE_ID, software_build: 300, name: String::new() }],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn telemetry_stream_and_shutdown() -> anyhow::Result<()> {
        let (tx, source) = ChannelSource::channel(8, 1);
        let (sink, mut video) = ChannelSink::channel(8);
        let handle = GroundStation::start(&config(), source, Arc::new(RecordingLink::default()), Box::new(sink))?;
        let mut snapshots = handle.telemetry(UpdateRate::EverySlice);

        for datagram in BlockBuilder::new(0, 2, 0).build().datagrams() {
            tx.send(InboundDatagram::new(0, datagram)).await?;
        }
        assert_eq!(video.recv().await.map(|p| p.packet_index), Some(0));
        assert_eq!(video.recv().await.map(|p| p.packet_index), Some(1));

        let snapshot = snapshots.next().await.expect("slice closes");
        assert_eq!(snapshot.slice(1).blocks.output_video_packets, 2);
        assert!(handle.latest_telemetry().is_some());

        handle.request_profile(TEST_VEHICLE_ID, VideoProfile::LowQuality)?;
        tokio::time::sleep(Duration::from_millis(1)).await;
        let router = handle.shutdown().await.expect("router returned");
        assert_eq!(router.controller().last_requested_profile(TEST_VEHICLE_ID), Some(VideoProfile::LowQuality));
        Ok(())
    }

    #[tokio::test]
    async fn invalid_config_fails_to_start() {
        let (_tx, source) = ChannelSource::channel(1, 1);
        let mut config = config();
        config.telemetry.slice_interval_ms = 0;
        let result = GroundStation::start(&config, source, Arc::new(NullLink), Box::new(Vec::new()));
        assert!(matches!(result, Err(LinkError::Config { .. })));
    }

    #[tokio::test]
    async fn bound_station_reaches_the_vehicle() -> anyhow::Result<()> {
        let vehicle = tokio::net::UdpSocket::bind("127.0.0.1:0").await?;
        let mut config = config();
        config.network.listen = vec!["127.0.0.1:0".parse()?];
        config.network.vehicle_addr = Some(vehicle.local_addr()?);

        let (handle, _video) = GroundStation::bind(&config).await?;
        handle.request_profile(TEST_VEHICLE_ID, VideoProfile::LowQuality)?;

        let mut buf = [0u8; 64];
        let (len, _) = tokio::time::timeout(Duration::from_secs(2), vehicle.recv_from(&mut buf)).await??;
        let (_, packet) = crate::packet::decode(&buf[..len])?;
        assert!(
            matches!(packet, crate::packet::Packet::SwitchRequest(ref r) if r.profile == VideoProfile::LowQuality.code())
        );
        handle.shutdown().await;
        Ok(())
    }

    #[tokio::test]
    async fn region_is_published_for_readers() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut config = config();
        config.telemetry.region_path = Some(dir.path().join("rtinfo"));

        let (tx, source) = ChannelSource::channel(1, 1);
        let handle = GroundStation::start(&config, source, Arc::new(NullLink), Box::new(Vec::new()))?;
        drop(tx);
        handle.shutdown().await;

        let reader = crate::telemetry::TelemetryReader::attach(dir.path().join("rtinfo"))?;
        let snapshot = reader.snapshot()?;
        assert_eq!(snapshot.slice_interval_ms(), 100);
        Ok(())
    }
}
