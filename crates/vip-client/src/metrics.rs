//! Prometheus metrics for the VIP client.

use crate::lifecycle::LifecycleState;
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

/// Labels for directive metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct DirectiveLabels {
    /// Directive kind (paused, resumed, healthack, ...)
    pub directive: String,
}

/// Labels for error metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ErrorLabels {
    /// Error type (relay_send, capture_read, session, detach, ...)
    pub error_type: String,
}

/// Metrics registry with all client metrics
pub struct MetricsRegistry {
    /// Prometheus registry
    pub registry: Registry,

    // Data plane
    /// Frames read from the capture handle
    frames_captured_total: Counter,
    /// Frames transmitted toward the VIP
    frames_relayed_total: Counter,
    /// Bytes transmitted toward the VIP
    bytes_relayed_total: Counter,
    /// Buffers allocated by the pool
    pool_buffers_allocated: Gauge,

    // Control plane
    /// Heartbeats sent
    heartbeats_sent_total: Counter,
    /// Directives received by kind
    directives_total: Family<DirectiveLabels, Counter>,
    /// Lifecycle state (0=active, 1=paused, 2=deregistering)
    lifecycle_state: Gauge,

    /// Errors by type
    errors_total: Family<ErrorLabels, Counter>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let frames_captured_total = Counter::default();
        registry.register(
            "vip_client_frames_captured",
            "Frames read from the data interface",
            frames_captured_total.clone(),
        );

        let frames_relayed_total = Counter::default();
        registry.register(
            "vip_client_frames_relayed",
            "Frames transmitted toward the VIP",
            frames_relayed_total.clone(),
        );

        let bytes_relayed_total = Counter::default();
        registry.register(
            "vip_client_bytes_relayed",
            "Bytes transmitted toward the VIP",
            bytes_relayed_total.clone(),
        );

        let pool_buffers_allocated = Gauge::default();
        registry.register(
            "vip_client_pool_buffers_allocated",
            "Packet buffers allocated by the pool",
            pool_buffers_allocated.clone(),
        );

        let heartbeats_sent_total = Counter::default();
        registry.register(
            "vip_client_heartbeats_sent",
            "Health reports sent to the coordinator",
            heartbeats_sent_total.clone(),
        );

        let directives_total = Family::<DirectiveLabels, Counter>::default();
        registry.register(
            "vip_client_directives",
            "Directives received from the coordinator",
            directives_total.clone(),
        );

        let lifecycle_state = Gauge::default();
        registry.register(
            "vip_client_lifecycle_state",
            "Lifecycle state (0=active, 1=paused, 2=deregistering)",
            lifecycle_state.clone(),
        );

        let errors_total = Family::<ErrorLabels, Counter>::default();
        registry.register(
            "vip_client_errors",
            "Errors by type",
            errors_total.clone(),
        );

        Self {
            registry,
            frames_captured_total,
            frames_relayed_total,
            bytes_relayed_total,
            pool_buffers_allocated,
            heartbeats_sent_total,
            directives_total,
            lifecycle_state,
            errors_total,
        }
    }

    /// Record a captured frame
    pub fn record_capture(&self) {
        self.frames_captured_total.inc();
    }

    /// Record a frame transmitted toward the VIP
    pub fn record_relay(&self, bytes: usize) {
        self.frames_relayed_total.inc();
        self.bytes_relayed_total.inc_by(bytes as u64);
    }

    pub fn update_pool_allocated(&self, allocated: usize) {
        self.pool_buffers_allocated.set(allocated as i64);
    }

    pub fn record_heartbeat(&self) {
        self.heartbeats_sent_total.inc();
    }

    pub fn record_directive(&self, directive: &str) {
        self.directives_total
            .get_or_create(&DirectiveLabels {
                directive: directive.to_string(),
            })
            .inc();
    }

    pub fn update_lifecycle_state(&self, state: LifecycleState) {
        self.lifecycle_state.set(state as i64);
    }

    pub fn record_error(&self, error_type: &str) {
        self.errors_total
            .get_or_create(&ErrorLabels {
                error_type: error_type.to_string(),
            })
            .inc();
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}
