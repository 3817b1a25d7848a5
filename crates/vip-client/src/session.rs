//! Control session with the coordinator.

use crate::lifecycle::{Lifecycle, LifecycleState};
use crate::protocol::{Command, Directive};
use common::{Error, Result};
use std::io;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, trace, warn};

type BoxedWriter = Box<dyn AsyncWrite + Send + Unpin>;

/// Longest line kept from the coordinator. The rest of a longer line is
/// discarded.
const MAX_LINE_LEN: u64 = 4096;

/// Reads coordinator lines with a bounded wait
pub struct SessionReader<R> {
    reader: BufReader<R>,
    timeout: Duration,
    buf: Vec<u8>,
    line: String,
}

impl<R: AsyncRead + Unpin> SessionReader<R> {
    pub fn new(reader: R, timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(reader),
            timeout,
            buf: Vec::new(),
            line: String::new(),
        }
    }

    /// Read the next line.
    ///
    /// A timeout, a read error or end of stream all mean the coordinator link
    /// is gone. Bytes that aren't UTF-8 are replaced, so a garbled line comes
    /// back as text and is left to the parser.
    pub async fn read_line(&mut self) -> Result<&str> {
        self.buf.clear();

        let read = tokio::time::timeout(self.timeout, read_bounded(&mut self.reader, &mut self.buf));
        match read.await {
            Err(_) => Err(Error::session(format!(
                "no message from coordinator within {:?}",
                self.timeout
            ))),
            Ok(Err(e)) => Err(Error::session(format!("read failed: {}", e))),
            Ok(Ok(0)) => Err(Error::session("coordinator closed the session")),
            Ok(Ok(_)) => {
                self.line.clear();
                self.line.push_str(&String::from_utf8_lossy(&self.buf));
                trace!(line = %self.line.trim_end(), "Received line from coordinator");
                Ok(self.line.as_str())
            }
        }
    }
}

/// Read up to [`MAX_LINE_LEN`] bytes of the next line into `buf`, then skip
/// whatever is left of it.
async fn read_bounded<R>(reader: &mut BufReader<R>, buf: &mut Vec<u8>) -> io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let read = (&mut *reader).take(MAX_LINE_LEN).read_until(b'\n', buf).await?;
    if read as u64 == MAX_LINE_LEN && buf.last() != Some(&b'\n') {
        debug!(limit = MAX_LINE_LEN, "Discarding the rest of an over-long line");
        let mut rest = Vec::new();
        loop {
            rest.clear();
            let skipped = (&mut *reader).take(MAX_LINE_LEN).read_until(b'\n', &mut rest).await?;
            if skipped == 0 || rest.last() == Some(&b'\n') {
                break;
            }
        }
    }
    Ok(read)
}

/// Write half of the control session, shared by the heartbeat loop, operator
/// commands and the shutdown procedure.
///
/// Taking the lock, writing and closing are each bounded by `timeout`. A write
/// that times out may have left part of a line on the wire, so the session is
/// dropped and every later send fails.
pub struct SessionWriter {
    writer: Mutex<Option<BoxedWriter>>,
    timeout: Duration,
}

impl SessionWriter {
    pub fn new<W>(writer: W, timeout: Duration) -> Self
    where
        W: AsyncWrite + Send + Unpin + 'static,
    {
        Self {
            writer: Mutex::new(Some(Box::new(writer))),
            timeout,
        }
    }

    async fn lock(&self) -> Result<MutexGuard<'_, Option<BoxedWriter>>> {
        tokio::time::timeout(self.timeout, self.writer.lock())
            .await
            .map_err(|_| {
                Error::session(format!("control session busy for {:?}", self.timeout))
            })
    }

    /// Send one command line
    pub async fn send(&self, command: Command<'_>) -> Result<()> {
        let line = format!("{}\n", command);

        let mut guard = self.lock().await?;
        let writer = guard
            .as_mut()
            .ok_or_else(|| Error::session("control session closed"))?;

        let write = async {
            writer.write_all(line.as_bytes()).await?;
            writer.flush().await
        };
        let result = tokio::time::timeout(self.timeout, write).await;

        match result {
            Ok(result) => result?,
            Err(_) => {
                guard.take();
                warn!(command = %command, "Coordinator stopped reading, dropped control session");
                return Err(Error::session(format!(
                    "write to coordinator timed out after {:?}",
                    self.timeout
                )));
            }
        }

        debug!(command = %command, "Sent to coordinator");
        Ok(())
    }

    /// Shut down the write half. Later sends fail.
    pub async fn close(&self) -> Result<()> {
        let Some(mut writer) = self.lock().await?.take() else {
            return Ok(());
        };

        match tokio::time::timeout(self.timeout, writer.shutdown()).await {
            Err(_) => Err(Error::session(format!(
                "closing control session timed out after {:?}",
                self.timeout
            ))),
            Ok(result) => {
                result?;
                info!("Closed control session");
                Ok(())
            }
        }
    }

    pub async fn is_closed(&self) -> bool {
        self.writer.lock().await.is_none()
    }
}

/// What the reader loop does after a directive
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DirectiveOutcome {
    Continue,
    Shutdown,
}

/// Apply a coordinator directive to the lifecycle.
pub fn apply_directive(lifecycle: &Lifecycle, directive: &Directive) -> DirectiveOutcome {
    match directive {
        Directive::Invalid(line) => {
            debug!(message = %line, "Coordinator rejected a message");
        }
        Directive::Deregistered => {
            lifecycle.begin_deregister();
            return DirectiveOutcome::Shutdown;
        }
        Directive::Paused => {
            lifecycle.transition(LifecycleState::Paused);
        }
        Directive::Resumed => {
            lifecycle.transition(LifecycleState::Active);
        }
        Directive::HealthAck(Some(code)) => {
            trace!(code = %code, "Health acknowledged");
        }
        Directive::HealthAck(None) => {
            debug!("HEALTHACK received from coordinator with no status code");
        }
        Directive::Empty => {
            debug!("Empty message received from coordinator");
        }
        Directive::Unrecognized(line) => {
            debug!(message = %line, "Message from coordinator not matching protocol");
        }
    }
    DirectiveOutcome::Continue
}
