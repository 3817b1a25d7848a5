//! Client orchestration.
//!
//! [`Client::start`] brings the node up in this order: resolve the data
//! device, attach the VIP, open capture and transmit paths, then start the
//! relay pipeline and the control loops. Any startup failure rolls back what
//! was already set up and nothing keeps running.
//!
//! Every terminal condition funnels into one shutdown procedure that runs
//! exactly once and returns a [`ShutdownReport`]. [`Client::wait`] is the join
//! barrier: it returns once every loop has exited.

use crate::device::resolve_device;
use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::metrics::MetricsRegistry;
use crate::platform::{CaptureHandle, Platform};
use crate::pool::BufferPool;
use crate::protocol::{Command, Directive};
use crate::relay::{RelayContext, RelayPipeline, open_senders};
use crate::session::{DirectiveOutcome, SessionReader, SessionWriter, apply_directive};
use crate::types::{ClientConfig, CleanupStep, DeviceInfo, HEALTH_OK, ShutdownReport, StopReason};
use crate::vip::VipManager;
use common::{Error, Result};
use futures::FutureExt;
use futures::future::{self, BoxFuture, join_all};
use std::io;
use std::sync::{Arc, OnceLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type ShutdownProcedure = future::Shared<BoxFuture<'static, ShutdownReport>>;

/// State shared by the control loops, the capture thread and operator handles
struct Shared {
    config: ClientConfig,
    lifecycle: Arc<Lifecycle>,
    writer: SessionWriter,
    capture: Arc<dyn CaptureHandle>,
    vip: VipManager,
    cancel: CancellationToken,
    procedure: OnceLock<ShutdownProcedure>,
    metrics: Option<Arc<MetricsRegistry>>,
}

impl Shared {
    fn publish_state(&self) {
        if let Some(metrics) = &self.metrics {
            metrics.update_lifecycle_state(self.lifecycle.state());
        }
    }

    /// Run the shutdown procedure, or wait for the run already in progress.
    ///
    /// The procedure runs on its own task, so dropping a caller part way
    /// through doesn't stop it or start it over.
    async fn shutdown(self: &Arc<Self>, reason: StopReason) -> ShutdownReport {
        let procedure = self.procedure.get_or_init(|| {
            let task = tokio::spawn(run_shutdown(self.clone(), reason.clone()));
            async move {
                match task.await {
                    Ok(report) => report,
                    Err(e) => {
                        error!(error = %e, "Shutdown procedure failed");
                        ShutdownReport::new(reason)
                    }
                }
            }
            .boxed()
            .shared()
        });
        procedure.clone().await
    }
}

async fn run_shutdown(shared: Arc<Shared>, reason: StopReason) -> ShutdownReport {
    info!(node = %shared.config.name, reason = %reason, "Shutting down");
    shared.cancel.cancel();

    let mut report = ShutdownReport::new(reason);

    if shared.lifecycle.begin_deregister() {
        shared.publish_state();
        if let Err(e) = shared
            .writer
            .send(Command::Deregister(&shared.config.name))
            .await
        {
            warn!(error = %e, "Failed to send DEREGISTER");
            report.record(CleanupStep::Deregister, e);
        }
    }

    if let Err(e) = shared.writer.close().await {
        warn!(error = %e, "Failed to close control session");
        report.record(CleanupStep::CloseSession, e);
    }

    shared.capture.close();

    if let Err(e) = shared.vip.detach().await {
        if let Some(metrics) = &shared.metrics {
            metrics.record_error("detach");
        }
        report.record(CleanupStep::DetachVip, e);
    }

    if report.is_clean() {
        info!(reason = %report.reason, "Shutdown complete");
    } else {
        warn!(
            reason = %report.reason,
            failures = report.failures.len(),
            "Shutdown completed with failures"
        );
    }
    report
}

/// Cloneable handle for operator commands and shutdown requests
#[derive(Clone)]
pub struct ClientHandle {
    shared: Arc<Shared>,
}

impl ClientHandle {
    pub fn state(&self) -> LifecycleState {
        self.shared.lifecycle.state()
    }

    /// Subscribe to lifecycle transitions
    pub fn watch_state(&self) -> watch::Receiver<LifecycleState> {
        self.shared.lifecycle.subscribe()
    }

    /// Wait until the client has left Active/Paused
    pub async fn stopped(&self) {
        self.shared.lifecycle.stopped().await
    }

    /// Ask the coordinator to stop sending new traffic.
    ///
    /// The state changes when the coordinator answers `PAUSED`.
    pub async fn pause(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Active => {
                self.shared
                    .writer
                    .send(Command::Pause(&self.shared.config.name))
                    .await
            }
            LifecycleState::Paused => Err(Error::AlreadyPaused),
            LifecycleState::Deregistering => Err(Error::NotRunning),
        }
    }

    /// Ask the coordinator to resume sending traffic.
    pub async fn resume(&self) -> Result<()> {
        match self.state() {
            LifecycleState::Paused => {
                self.shared
                    .writer
                    .send(Command::Resume(&self.shared.config.name))
                    .await
            }
            LifecycleState::Active => Err(Error::AlreadyActive),
            LifecycleState::Deregistering => Err(Error::NotRunning),
        }
    }

    /// Leave the coordinator: moves to Deregistering, sends `DEREGISTER` and
    /// runs the shutdown procedure.
    pub async fn deregister(&self) -> Result<ShutdownReport> {
        if !self.shared.lifecycle.is_running() {
            return Err(Error::NotRunning);
        }
        Ok(self.shared.shutdown(StopReason::OperatorDeregister).await)
    }

    /// Run the shutdown procedure. Later calls return the first report.
    pub async fn shutdown(&self, reason: StopReason) -> ShutdownReport {
        self.shared.shutdown(reason).await
    }
}

/// A running client
pub struct Client {
    handle: ClientHandle,
    device: DeviceInfo,
    pool: Arc<BufferPool>,
    pipeline: RelayPipeline,
    tasks: Vec<JoinHandle<()>>,
    supervisor: JoinHandle<ShutdownReport>,
}

impl Client {
    /// Bring the client up.
    ///
    /// `reader` and `writer` are the two halves of an established coordinator
    /// session. Must be called from within a tokio runtime.
    pub async fn start<R, W>(
        config: ClientConfig,
        platform: Platform,
        reader: R,
        writer: W,
        metrics: Option<Arc<MetricsRegistry>>,
    ) -> Result<Self>
    where
        R: AsyncRead + Send + Unpin + 'static,
        W: AsyncWrite + Send + Unpin + 'static,
    {
        let device = resolve_device(platform.network.as_ref(), config.data_ip).await?;

        let vip = VipManager::new(platform.network.clone(), config.vip);
        vip.attach().await?;

        let capture = match platform.capture.open(&device.name) {
            Ok(capture) => capture,
            Err(e) => {
                error!(device = %device.name, error = %e, "Failed to open capture");
                rollback(&vip).await;
                return Err(e.into());
            }
        };

        let senders = match open_senders(
            platform.transmit.as_ref(),
            config.vip,
            config.relay_workers,
        ) {
            Ok(senders) => senders,
            Err(e) => {
                error!(vip = %config.vip, error = %e, "Failed to open relay transmit path");
                capture.close();
                rollback(&vip).await;
                return Err(e.into());
            }
        };

        let pool = Arc::new(BufferPool::new(device.mtu as usize));
        let lifecycle = Arc::new(Lifecycle::new());

        let shared = Arc::new(Shared {
            config: config.clone(),
            lifecycle: lifecycle.clone(),
            writer: SessionWriter::new(writer, config.read_timeout),
            capture: capture.clone(),
            vip,
            cancel: CancellationToken::new(),
            procedure: OnceLock::new(),
            metrics: metrics.clone(),
        });
        shared.publish_state();

        let context = RelayContext {
            pool: pool.clone(),
            lifecycle,
            metrics,
            poll_interval: config.poll_interval,
        };

        let runtime = tokio::runtime::Handle::current();
        let on_fatal = {
            let shared = shared.clone();
            move |e: io::Error| {
                runtime.spawn(async move {
                    shared
                        .shutdown(StopReason::CaptureFailed(e.to_string()))
                        .await;
                });
            }
        };

        let pipeline = match RelayPipeline::start(
            context,
            capture.clone(),
            senders,
            config.queue_depth,
            on_fatal,
        ) {
            Ok(pipeline) => pipeline,
            Err(e) => {
                error!(error = %e, "Failed to start relay pipeline");
                capture.close();
                rollback(&shared.vip).await;
                return Err(e.into());
            }
        };

        let reader = SessionReader::new(reader, config.read_timeout);
        let tasks = vec![
            tokio::spawn(run_reader(shared.clone(), reader)),
            tokio::spawn(run_heartbeat(shared.clone())),
        ];
        let supervisor = tokio::spawn(supervise(shared.clone()));

        info!(
            node = %config.name,
            vip = %config.vip,
            device = %device.name,
            workers = config.relay_workers,
            "Client started"
        );

        Ok(Self {
            handle: ClientHandle { shared },
            device,
            pool,
            pipeline,
            tasks,
            supervisor,
        })
    }

    pub fn handle(&self) -> ClientHandle {
        self.handle.clone()
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn pool(&self) -> &Arc<BufferPool> {
        &self.pool
    }

    /// Wait until the client has shut down and every loop has exited.
    pub async fn wait(self) -> ShutdownReport {
        let report = match self.supervisor.await {
            Ok(report) => report,
            Err(e) => {
                error!(error = %e, "Shutdown supervisor failed");
                self.handle.shutdown(StopReason::Requested).await
            }
        };

        for result in join_all(self.tasks).await {
            if let Err(e) = result {
                error!(error = %e, "Control task failed");
            }
        }

        let pipeline = self.pipeline;
        if let Err(e) = tokio::task::spawn_blocking(move || pipeline.join()).await {
            error!(error = %e, "Failed to join relay pipeline");
        }

        debug!(
            allocated = self.pool.allocated(),
            idle = self.pool.idle_count(),
            "All loops exited"
        );
        report
    }

    /// Shut down and wait for every loop to exit.
    pub async fn stop(self, reason: StopReason) -> ShutdownReport {
        self.handle.shutdown(reason).await;
        self.wait().await
    }
}

async fn rollback(vip: &VipManager) {
    if let Err(e) = vip.detach().await {
        error!(vip = %vip.vip(), error = %e, "Failed to roll back VIP after startup failure");
    }
}

/// Resolves with the report once the shutdown procedure has finished.
///
/// Every shutdown cancels the token first, so by the time this wakes the
/// procedure is already in progress and the reason passed here is ignored.
async fn supervise(shared: Arc<Shared>) -> ShutdownReport {
    shared.cancel.cancelled().await;
    shared.shutdown(StopReason::Requested).await
}

async fn run_reader<R>(shared: Arc<Shared>, mut reader: SessionReader<R>)
where
    R: AsyncRead + Unpin,
{
    while shared.lifecycle.is_running() {
        let result = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            line = reader.read_line() => line.map(Directive::parse),
        };

        let directive = match result {
            Ok(directive) => directive,
            Err(e) => {
                if shared.lifecycle.is_running() {
                    error!(error = %e, "Control session failed");
                    if let Some(metrics) = &shared.metrics {
                        metrics.record_error("session");
                    }
                    shared.shutdown(StopReason::SessionLost(e.to_string())).await;
                }
                break;
            }
        };

        if let Some(metrics) = &shared.metrics {
            metrics.record_directive(directive.kind());
        }

        let outcome = apply_directive(&shared.lifecycle, &directive);
        shared.publish_state();

        if outcome == DirectiveOutcome::Shutdown {
            shared.shutdown(StopReason::Deregistered).await;
            break;
        }
    }
    debug!("Control reader exited");
}

async fn run_heartbeat(shared: Arc<Shared>) {
    let mut ticker = tokio::time::interval(shared.config.health_interval);
    // A slow send pushes the next report back instead of bunching them up
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    while shared.lifecycle.is_running() {
        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        if !shared.lifecycle.is_running() {
            break;
        }

        let sent = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            sent = shared.writer.send(Command::Health(HEALTH_OK)) => sent,
        };

        match sent {
            Ok(()) => {
                if let Some(metrics) = &shared.metrics {
                    metrics.record_heartbeat();
                }
            }
            Err(e) => {
                warn!(error = %e, "Failed to send health report");
                if let Some(metrics) = &shared.metrics {
                    metrics.record_error("heartbeat");
                }
            }
        }
    }
    debug!("Heartbeat loop exited");
}
