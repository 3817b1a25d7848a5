//! Raw socket capture and transmit.
//!
//! Capture uses a raw IP socket bound to the data address and pinned to the
//! resolved device. Transmit uses an IPPROTO_RAW socket, so frames go out with
//! the IP header they were captured with.

use crate::platform::{CaptureHandle, PacketCapture, RawSender, RawTransmit};
use socket2::{Domain, Protocol, SockAddr, Socket, Type};
use std::io::{self, ErrorKind, Read};
use std::net::{IpAddr, Shutdown, SocketAddr};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, trace};

/// Opens raw capture sockets for the data address
pub struct RawSocketCapture {
    data_ip: IpAddr,
    protocol: i32,
    poll_interval: Duration,
}

impl RawSocketCapture {
    /// # Arguments
    /// * `data_ip` - Address the captured traffic is destined for
    /// * `protocol` - IP protocol number to capture (e.g., 6 for TCP)
    /// * `poll_interval` - Receive timeout, bounds how long a read blocks
    pub fn new(data_ip: IpAddr, protocol: u8, poll_interval: Duration) -> Self {
        Self {
            data_ip,
            protocol: protocol as i32,
            poll_interval,
        }
    }
}

impl PacketCapture for RawSocketCapture {
    fn open(&self, interface: &str) -> io::Result<Arc<dyn CaptureHandle>> {
        let bind_addr = SocketAddr::new(self.data_ip, 0);
        let socket = Socket::new(
            Domain::for_address(bind_addr),
            Type::RAW,
            Some(Protocol::from(self.protocol)),
        )?;

        socket.bind_device(Some(interface.as_bytes()))?;
        socket.bind(&bind_addr.into())?;
        socket.set_read_timeout(Some(self.poll_interval))?;

        debug!(
            interface,
            data_ip = %self.data_ip,
            protocol = self.protocol,
            "Opened raw capture socket"
        );

        Ok(Arc::new(RawCaptureHandle {
            socket,
            closed: AtomicBool::new(false),
        }))
    }
}

/// Raw capture socket
pub struct RawCaptureHandle {
    socket: Socket,
    closed: AtomicBool,
}

impl CaptureHandle for RawCaptureHandle {
    fn read_frame(&self, buf: &mut [u8]) -> io::Result<usize> {
        if self.closed.load(Ordering::Acquire) {
            return Err(io::Error::new(ErrorKind::NotConnected, "capture handle closed"));
        }
        (&self.socket).read(buf)
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        // Raw sockets are not connected; ENOTCONN here still wakes a blocked reader
        if let Err(e) = self.socket.shutdown(Shutdown::Both) {
            trace!(error = %e, "Shutdown on raw capture socket");
        }
        debug!("Closed raw capture socket");
    }
}

/// Opens IPPROTO_RAW sockets toward the VIP
#[derive(Debug, Default, Clone, Copy)]
pub struct RawSocketTransmit;

impl RawTransmit for RawSocketTransmit {
    fn open(&self, destination: IpAddr) -> io::Result<Box<dyn RawSender>> {
        if !destination.is_ipv4() {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("raw relay requires an IPv4 destination, got {}", destination),
            ));
        }

        let socket = Socket::new(
            Domain::IPV4,
            Type::RAW,
            Some(Protocol::from(libc::IPPROTO_RAW)),
        )?;

        Ok(Box::new(RawSocketSender {
            socket,
            destination: SocketAddr::new(destination, 0).into(),
        }))
    }
}

/// IPPROTO_RAW socket owned by a single relay worker
pub struct RawSocketSender {
    socket: Socket,
    destination: SockAddr,
}

impl RawSender for RawSocketSender {
    fn send(&mut self, frame: &[u8]) -> io::Result<usize> {
        self.socket.send_to(frame, &self.destination)
    }
}
