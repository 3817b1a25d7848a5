//! Runtime types shared by the client components.

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;

/// Default number of relay workers draining the capture queue.
pub const DEFAULT_RELAY_WORKERS: usize = 20;

/// Default depth of the capture -> relay queue.
pub const DEFAULT_QUEUE_DEPTH: usize = 1024;

/// Health code reported by the heartbeat loop.
pub const HEALTH_OK: u16 = 200;

/// Runtime client configuration
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Node name announced to the coordinator
    pub name: String,

    /// Virtual service address owned while healthy
    pub vip: IpAddr,

    /// Address on the real data interface that traffic arrives for
    pub data_ip: IpAddr,

    /// Interval between HEALTH reports
    pub health_interval: Duration,

    /// Maximum wait for a coordinator line before the session is declared dead
    pub read_timeout: Duration,

    /// Number of relay workers
    pub relay_workers: usize,

    /// Capacity of the capture -> relay queue
    pub queue_depth: usize,

    /// How often blocked data plane loops re-check the lifecycle state
    pub poll_interval: Duration,
}

impl ClientConfig {
    /// Create a configuration with default timings and relay sizing.
    pub fn new(name: impl Into<String>, vip: IpAddr, data_ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            vip,
            data_ip,
            health_interval: Duration::from_secs(5),
            read_timeout: Duration::from_secs(15),
            relay_workers: DEFAULT_RELAY_WORKERS,
            queue_depth: DEFAULT_QUEUE_DEPTH,
            poll_interval: Duration::from_millis(250),
        }
    }
}

/// Data interface resolved at startup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    pub name: String,
    pub mtu: u32,
}

/// Why the client shut down
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StopReason {
    /// Coordinator sent DEREGISTERED
    Deregistered,
    /// Operator called deregister()
    OperatorDeregister,
    /// Control session timed out or failed
    SessionLost(String),
    /// Capture read failed
    CaptureFailed(String),
    /// Process received a termination signal
    Signal,
    /// Caller asked for shutdown directly
    Requested,
}

impl StopReason {
    /// Whether the shutdown was caused by a runtime failure rather than a request.
    pub fn is_fatal(&self) -> bool {
        matches!(self, StopReason::SessionLost(_) | StopReason::CaptureFailed(_))
    }
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopReason::Deregistered => write!(f, "deregistered by coordinator"),
            StopReason::OperatorDeregister => write!(f, "deregistered by operator"),
            StopReason::SessionLost(e) => write!(f, "control session lost: {}", e),
            StopReason::CaptureFailed(e) => write!(f, "capture failed: {}", e),
            StopReason::Signal => write!(f, "termination signal"),
            StopReason::Requested => write!(f, "shutdown requested"),
        }
    }
}

/// Cleanup step of the shutdown procedure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CleanupStep {
    Deregister,
    CloseSession,
    DetachVip,
}

impl fmt::Display for CleanupStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CleanupStep::Deregister => write!(f, "deregister"),
            CleanupStep::CloseSession => write!(f, "close_session"),
            CleanupStep::DetachVip => write!(f, "detach_vip"),
        }
    }
}

/// A cleanup step that failed during shutdown
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CleanupFailure {
    pub step: CleanupStep,
    pub error: String,
}

/// Outcome of the shutdown procedure
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShutdownReport {
    pub reason: StopReason,
    pub failures: Vec<CleanupFailure>,
}

impl ShutdownReport {
    pub fn new(reason: StopReason) -> Self {
        Self {
            reason,
            failures: Vec::new(),
        }
    }

    pub fn record(&mut self, step: CleanupStep, error: impl fmt::Display) {
        self.failures.push(CleanupFailure {
            step,
            error: error.to_string(),
        });
    }

    /// True when every cleanup step succeeded.
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    pub fn failed(&self, step: CleanupStep) -> bool {
        self.failures.iter().any(|f| f.step == step)
    }
}
