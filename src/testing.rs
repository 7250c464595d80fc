//! Scripted sockets and connectors for unit tests.

use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use bytes::{Buf, BufMut, Bytes, BytesMut};

use crate::connection::{Connector, HostEntry, Socket};
use crate::{KafkaError, Result};

pub(crate) fn refused(host: &HostEntry) -> KafkaError {
    KafkaError::ConnectRefused {
        host: host.address(),
        source: io::ErrorKind::ConnectionRefused.into(),
    }
}

/// What the next `try_write` call does.
#[derive(Debug, Clone, Copy)]
pub(crate) enum WriteStep {
    Accept(usize),
    WouldBlock,
    Fail(io::ErrorKind),
}

#[derive(Debug, Default)]
struct SocketState {
    written: Vec<u8>,
    write_calls: usize,
    writable_waits: usize,
    shutdown_called: bool,
}

/// Shared view of what a `ScriptedSocket` saw, usable after the socket has
/// been moved into a connection.
#[derive(Debug, Clone, Default)]
pub(crate) struct SocketLog(Arc<Mutex<SocketState>>);

impl SocketLog {
    pub(crate) fn written(&self) -> Vec<u8> {
        self.0.lock().unwrap().written.clone()
    }

    pub(crate) fn write_calls(&self) -> usize {
        self.0.lock().unwrap().write_calls
    }

    pub(crate) fn writable_waits(&self) -> usize {
        self.0.lock().unwrap().writable_waits
    }

    pub(crate) fn shutdown_called(&self) -> bool {
        self.0.lock().unwrap().shutdown_called
    }

    /// Splits everything written into size-prefixed frames and returns
    /// `(opcode, offset)` for each fetch/offsets request.
    pub(crate) fn requests(&self) -> Vec<(u16, i64)> {
        let mut data = Bytes::from(self.written());
        let mut requests = Vec::new();
        while data.remaining() >= 4 {
            let len = data.get_u32() as usize;
            let mut frame = data.split_to(len);
            let opcode = frame.get_u16();
            let topic_len = frame.get_u16() as usize;
            frame.advance(topic_len + 4);
            requests.push((opcode, frame.get_i64()));
        }
        requests
    }
}

/// A socket whose writes follow a script and whose reads drain a fixed
/// buffer. Once the script runs out every write is accepted in full.
#[derive(Debug, Default)]
pub(crate) struct ScriptedSocket {
    steps: VecDeque<WriteStep>,
    incoming: Bytes,
    fail_shutdown: bool,
    log: SocketLog,
}

impl ScriptedSocket {
    pub(crate) fn with_steps(steps: impl IntoIterator<Item = WriteStep>) -> Self {
        Self {
            steps: steps.into_iter().collect(),
            ..Self::default()
        }
    }

    pub(crate) fn with_incoming(mut self, incoming: impl Into<Bytes>) -> Self {
        self.incoming = incoming.into();
        self
    }

    pub(crate) fn failing_shutdown(mut self) -> Self {
        self.fail_shutdown = true;
        self
    }

    pub(crate) fn log(&self) -> SocketLog {
        self.log.clone()
    }
}

#[async_trait]
impl Socket for ScriptedSocket {
    fn try_write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.log.0.lock().unwrap();
        state.write_calls += 1;
        let accepted = match self.steps.pop_front() {
            None => buf.len(),
            Some(WriteStep::Accept(n)) => n.min(buf.len()),
            Some(WriteStep::WouldBlock) => return Err(io::ErrorKind::WouldBlock.into()),
            Some(WriteStep::Fail(kind)) => return Err(kind.into()),
        };
        state.written.extend_from_slice(&buf[..accepted]);
        Ok(accepted)
    }

    async fn writable(&mut self) -> io::Result<()> {
        self.log.0.lock().unwrap().writable_waits += 1;
        Ok(())
    }

    async fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        if self.incoming.remaining() < buf.len() {
            self.incoming.clear();
            return Err(io::ErrorKind::UnexpectedEof.into());
        }
        self.incoming.copy_to_slice(buf);
        Ok(())
    }

    async fn shutdown(&mut self) -> io::Result<()> {
        self.log.0.lock().unwrap().shutdown_called = true;
        if self.fail_shutdown {
            return Err(io::ErrorKind::NotConnected.into());
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct ConnectorState {
    sockets: VecDeque<ScriptedSocket>,
    refuse_next: usize,
    refuse_all: bool,
    opened: Vec<HostEntry>,
}

/// Hands out queued sockets (or fresh default ones) and records every host
/// it was asked to open.
#[derive(Debug, Clone, Default)]
pub(crate) struct ScriptedConnector {
    state: Arc<Mutex<ConnectorState>>,
    delay: Option<Duration>,
}

impl ScriptedConnector {
    pub(crate) fn accepting_all() -> Self {
        Self::default()
    }

    pub(crate) fn refusing_all() -> Self {
        let connector = Self::default();
        connector.state.lock().unwrap().refuse_all = true;
        connector
    }

    pub(crate) fn with_sockets(sockets: impl IntoIterator<Item = ScriptedSocket>) -> Self {
        let connector = Self::default();
        connector.state.lock().unwrap().sockets = sockets.into_iter().collect();
        connector
    }

    pub(crate) fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub(crate) fn refuse_next(&self, count: usize) {
        self.state.lock().unwrap().refuse_next = count;
    }

    pub(crate) fn opened(&self) -> Vec<HostEntry> {
        self.state.lock().unwrap().opened.clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn open(&self, host: &HostEntry, _timeout: Duration) -> Result<Box<dyn Socket>> {
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let mut state = self.state.lock().unwrap();
        state.opened.push(host.clone());
        if state.refuse_all {
            return Err(refused(host));
        }
        if state.refuse_next > 0 {
            state.refuse_next -= 1;
            return Err(refused(host));
        }
        let socket = state.sockets.pop_front().unwrap_or_default();
        Ok(Box::new(socket))
    }
}

/// A response frame: `size | error_code | payload`.
pub(crate) fn response_frame(error_code: u16, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::new();
    buf.put_u32((2 + payload.len()) as u32);
    buf.put_u16(error_code);
    buf.put_slice(payload);
    buf.freeze()
}

/// An offsets response frame carrying `offsets`.
pub(crate) fn offsets_frame(offsets: &[i64]) -> Bytes {
    let mut payload = BytesMut::new();
    payload.put_u32(offsets.len() as u32);
    for offset in offsets {
        payload.put_i64(*offset);
    }
    response_frame(0, &payload)
}
