//! In-memory stand-ins for the OS collaborators and the coordinator.

#![allow(dead_code)]

use async_trait::async_trait;
use common::{Error, Result};
use ipnet::IpNet;
use std::collections::VecDeque;
use std::io;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, ReadHalf, WriteHalf};
use vip_client::platform::{
    CaptureHandle, InterfaceAddress, NetworkConfig, PacketCapture, RawSender, RawTransmit,
};
use vip_client::{Client, ClientConfig, Platform};

pub const NODE: &str = "node-1";
pub const VIP: &str = "10.0.0.100";
pub const DATA_IP: &str = "192.168.1.10";
pub const MTU: u32 = 1500;

/// Runtime config with short polling and a heartbeat that only fires once
pub fn test_config() -> ClientConfig {
    let mut config = ClientConfig::new(NODE, VIP.parse().unwrap(), DATA_IP.parse().unwrap());
    config.relay_workers = 4;
    config.queue_depth = 16;
    config.poll_interval = Duration::from_millis(5);
    config.health_interval = Duration::from_secs(3600);
    config.read_timeout = Duration::from_secs(10);
    config
}

pub fn vip_network() -> IpNet {
    format!("{}/32", VIP).parse().unwrap()
}

/// Poll `condition` until it holds or two seconds pass
pub async fn eventually(mut condition: impl FnMut() -> bool) {
    for _ in 0..400 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached in time");
}

// Network configuration

pub struct FakeNetwork {
    addresses: Vec<InterfaceAddress>,
    pub added: Mutex<Vec<(String, IpNet)>>,
    pub removed: Mutex<Vec<(String, IpNet)>>,
    pub fail_remove: AtomicBool,
    pub fail_add: AtomicBool,
}

impl FakeNetwork {
    pub fn new() -> Self {
        Self::with_addresses(vec![
            InterfaceAddress::new("lo", "127.0.0.1/8".parse().unwrap()),
            InterfaceAddress::new("eth0", "192.168.1.10/24".parse().unwrap()),
        ])
    }

    pub fn with_addresses(addresses: Vec<InterfaceAddress>) -> Self {
        Self {
            addresses,
            added: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
            fail_remove: AtomicBool::new(false),
            fail_add: AtomicBool::new(false),
        }
    }

    pub fn added(&self) -> Vec<(String, IpNet)> {
        self.added.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<(String, IpNet)> {
        self.removed.lock().unwrap().clone()
    }
}

#[async_trait]
impl NetworkConfig for FakeNetwork {
    async fn interface_addresses(&self) -> Result<Vec<InterfaceAddress>> {
        Ok(self.addresses.clone())
    }

    async fn mtu(&self, interface: &str) -> Result<u32> {
        if self.addresses.iter().any(|a| a.interface == interface) {
            Ok(MTU)
        } else {
            Err(Error::netlink(format!("no such interface: {}", interface)))
        }
    }

    async fn add_address(&self, interface: &str, address: IpNet) -> Result<()> {
        if self.fail_add.load(Ordering::SeqCst) {
            return Err(Error::netlink("add refused"));
        }
        self.added
            .lock()
            .unwrap()
            .push((interface.to_string(), address));
        Ok(())
    }

    async fn remove_address(&self, interface: &str, address: IpNet) -> Result<()> {
        self.removed
            .lock()
            .unwrap()
            .push((interface.to_string(), address));
        if self.fail_remove.load(Ordering::SeqCst) {
            return Err(Error::netlink("address not found"));
        }
        Ok(())
    }
}

// Packet capture

#[derive(Default)]
pub struct FakeCaptureHandle {
    frames: Mutex<VecDeque<Vec<u8>>>,
    closed: AtomicBool,
    broken: AtomicBool,
}

impl FakeCaptureHandle {
    pub fn push(&self, frame: Vec<u8>) {
        self.frames.lock().unwrap().push_back(frame);
    }

    /// Make every later read fail with a hard error
    pub fn break_device(&self) {
        self.broken.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl CaptureHandle for FakeCaptureHandle {
    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "closed"));
        }
        if self.broken.load(Ordering::SeqCst) {
            return Err(io::Error::other("device went away"));
        }
        match self.frames.lock().unwrap().pop_front() {
            Some(frame) => {
                buf[..frame.len()].copy_from_slice(&frame);
                Ok(frame.len())
            }
            None => {
                std::thread::sleep(Duration::from_millis(1));
                Err(io::ErrorKind::WouldBlock.into())
            }
        }
    }

    fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}

#[derive(Default)]
pub struct FakeCapture {
    pub handle: Arc<FakeCaptureHandle>,
    pub opened_on: Mutex<Option<String>>,
    pub fail_open: AtomicBool,
}

impl PacketCapture for FakeCapture {
    fn open(&self, interface: &str) -> io::Result<Arc<dyn CaptureHandle>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        *self.opened_on.lock().unwrap() = Some(interface.to_string());
        Ok(self.handle.clone())
    }
}

// Raw transmit

#[derive(Default)]
pub struct FakeTransmit {
    pub frames: Arc<Mutex<Vec<Vec<u8>>>>,
    pub attempts: Arc<AtomicUsize>,
    /// Senders currently alive
    pub live: Arc<AtomicUsize>,
    pub opened: AtomicUsize,
    pub fail_send: Arc<AtomicBool>,
    pub fail_open: AtomicBool,
}

impl FakeTransmit {
    pub fn frames(&self) -> Vec<Vec<u8>> {
        self.frames.lock().unwrap().clone()
    }

    pub fn attempts(&self) -> usize {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }
}

impl RawTransmit for FakeTransmit {
    fn open(&self, destination: IpAddr) -> io::Result<Box<dyn RawSender>> {
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::PermissionDenied.into());
        }
        assert_eq!(destination, VIP.parse::<IpAddr>().unwrap());
        self.opened.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSender {
            frames: self.frames.clone(),
            attempts: self.attempts.clone(),
            live: self.live.clone(),
            fail_send: self.fail_send.clone(),
        }))
    }
}

struct FakeSender {
    frames: Arc<Mutex<Vec<Vec<u8>>>>,
    attempts: Arc<AtomicUsize>,
    live: Arc<AtomicUsize>,
    fail_send: Arc<AtomicBool>,
}

impl RawSender for FakeSender {
    fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.fail_send.load(Ordering::SeqCst) {
            return Err(io::ErrorKind::HostUnreachable.into());
        }
        self.frames.lock().unwrap().push(frame.to_vec());
        Ok(frame.len())
    }
}

impl Drop for FakeSender {
    fn drop(&mut self) {
        self.live.fetch_sub(1, Ordering::SeqCst);
    }
}

// Coordinator

/// The coordinator's end of the control session
pub struct Coordinator {
    reader: BufReader<ReadHalf<DuplexStream>>,
    writer: WriteHalf<DuplexStream>,
}

impl Coordinator {
    pub async fn send(&mut self, line: &str) {
        self.send_bytes(line.as_bytes()).await;
    }

    /// Write raw bytes, valid UTF-8 or not
    pub async fn send_bytes(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).await.unwrap();
        self.writer.flush().await.unwrap();
    }

    /// Next line from the client, without its terminator. None at end of stream.
    pub async fn next_line(&mut self) -> Option<String> {
        let mut line = String::new();
        let read = tokio::time::timeout(Duration::from_secs(2), self.reader.read_line(&mut line))
            .await
            .expect("timed out waiting for the client")
            .unwrap();
        (read > 0).then(|| line.trim_end().to_string())
    }

    /// Next line that isn't a health report
    pub async fn next_command(&mut self) -> Option<String> {
        loop {
            let line = self.next_line().await?;
            if !line.starts_with("HEALTH ") {
                return Some(line);
            }
        }
    }

    /// Every remaining line until the client closes the session
    pub async fn drain(&mut self) -> Vec<String> {
        let mut lines = Vec::new();
        while let Some(line) = self.next_line().await {
            lines.push(line);
        }
        lines
    }
}

pub struct Harness {
    pub network: Arc<FakeNetwork>,
    pub capture: Arc<FakeCapture>,
    pub transmit: Arc<FakeTransmit>,
}

impl Harness {
    pub fn new() -> Self {
        Self {
            network: Arc::new(FakeNetwork::new()),
            capture: Arc::new(FakeCapture::default()),
            transmit: Arc::new(FakeTransmit::default()),
        }
    }

    pub fn platform(&self) -> Platform {
        Platform::new(
            self.network.clone(),
            self.capture.clone(),
            self.transmit.clone(),
        )
    }

    pub fn frames_handle(&self) -> Arc<FakeCaptureHandle> {
        self.capture.handle.clone()
    }

    pub async fn start(&self, config: ClientConfig) -> Result<(Client, Coordinator)> {
        self.start_with_buffer(config, 4096).await
    }

    /// Start with `buffer` bytes of room in each direction of the session
    pub async fn start_with_buffer(
        &self,
        config: ClientConfig,
        buffer: usize,
    ) -> Result<(Client, Coordinator)> {
        let (client_end, coordinator_end) = tokio::io::duplex(buffer);
        let (reader, writer) = tokio::io::split(client_end);
        let client = Client::start(config, self.platform(), reader, writer, None).await?;

        let (reader, writer) = tokio::io::split(coordinator_end);
        Ok((
            client,
            Coordinator {
                reader: BufReader::new(reader),
                writer,
            },
        ))
    }
}
