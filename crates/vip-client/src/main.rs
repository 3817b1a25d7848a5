//! Seesaw VIP client binary

use common::logging::{self, LogFormat};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_util::sync::CancellationToken;
use vip_client::netlink::NetlinkConfig;
use vip_client::socket::{RawSocketCapture, RawSocketTransmit};
use vip_client::{Client, Config, MetricsRegistry, MetricsServer, Platform, StopReason};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Tracing isn't initialized until the config says how
    let config = Config::load().map_err(common::Error::config)?;

    logging::init_with(
        config.logging.level.as_deref(),
        LogFormat::from_name(config.logging.format.as_deref()),
    );

    tracing::info!(node = %config.client.name, "Seesaw VIP client starting");

    let client_config = config.to_client_config();

    let stream = tokio::time::timeout(
        config.coordinator.connect_timeout,
        TcpStream::connect(&config.coordinator.address),
    )
    .await
    .map_err(|_| {
        format!(
            "timed out connecting to coordinator {} after {:?}",
            config.coordinator.address, config.coordinator.connect_timeout
        )
    })??;
    stream.set_nodelay(true)?;
    tracing::info!(coordinator = %config.coordinator.address, "Connected to coordinator");
    let (reader, writer) = stream.into_split();

    let platform = Platform::new(
        Arc::new(NetlinkConfig::new()?),
        Arc::new(RawSocketCapture::new(
            client_config.data_ip,
            config.relay.capture_protocol,
            client_config.poll_interval,
        )),
        Arc::new(RawSocketTransmit),
    );

    let metrics = config.metrics.enabled.then(|| Arc::new(MetricsRegistry::new()));
    let metrics_shutdown = CancellationToken::new();
    let metrics_task = metrics.clone().map(|registry| {
        let server = MetricsServer::new(registry, config.metrics.listen_addr.clone());
        tokio::spawn(server.run(metrics_shutdown.clone()))
    });

    let client = Client::start(client_config, platform, reader, writer, metrics).await?;

    let handle = client.handle();
    tokio::spawn(async move {
        shutdown_signal().await;
        tracing::info!("Received termination signal");
        handle.shutdown(StopReason::Signal).await;
    });

    let report = client.wait().await;

    metrics_shutdown.cancel();
    if let Some(task) = metrics_task {
        match task.await {
            Ok(Err(e)) => tracing::warn!(error = %e, "Metrics server failed"),
            Err(e) => tracing::warn!(error = %e, "Metrics server task failed"),
            Ok(Ok(())) => {}
        }
    }

    for failure in &report.failures {
        tracing::warn!(step = %failure.step, error = %failure.error, "Cleanup step failed");
    }

    if report.reason.is_fatal() || !report.is_clean() {
        tracing::error!(reason = %report.reason, "VIP client stopped abnormally");
        std::process::exit(1);
    }

    tracing::info!(reason = %report.reason, "VIP client stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl-C");
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
