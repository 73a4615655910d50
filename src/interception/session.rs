// src/interception/session.rs
//! Connection hijack capability
//!
//! A modifier that wants to answer a request itself takes over the client
//! connection through the request's `SessionHandle`, writes a response and
//! flushes it. The host then skips normal processing for that exchange.

use crate::interception::exchange::{clone_response, ProxyResponse};
use parking_lot::Mutex;
use std::fmt;
use std::io;
use std::sync::Arc;

/// Write side of a hijacked client connection
pub trait HijackedConn: Send {
    /// Write a complete response to the client
    fn write_response(&mut self, resp: &ProxyResponse) -> io::Result<()>;

    /// Flush everything written so far
    fn flush(&mut self) -> io::Result<()>;
}

/// Per-exchange access to the underlying client connection
pub trait Session: Send + Sync {
    /// Take over the connection. Fails if it was already taken.
    fn hijack(&self) -> io::Result<Box<dyn HijackedConn>>;

    /// Whether the connection has been taken over
    fn hijacked(&self) -> bool;
}

/// Request extension carrying the exchange's session
#[derive(Clone)]
pub struct SessionHandle(pub Arc<dyn Session>);

impl fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionHandle")
            .field("hijacked", &self.0.hijacked())
            .finish()
    }
}

#[derive(Default)]
struct CaptureState {
    hijacked: bool,
    pending: Option<ProxyResponse>,
    flushed: Option<ProxyResponse>,
}

/// Session that captures the hijacked response so the host can serve it
/// over its own connection
#[derive(Clone, Default)]
pub struct CapturedSession {
    state: Arc<Mutex<CaptureState>>,
}

impl CapturedSession {
    /// Create a session for one exchange
    pub fn new() -> Self {
        Self::default()
    }

    /// The flushed response, if the connection was hijacked
    pub fn take_response(&self) -> Option<ProxyResponse> {
        self.state.lock().flushed.take()
    }
}

impl Session for CapturedSession {
    fn hijack(&self) -> io::Result<Box<dyn HijackedConn>> {
        let mut state = self.state.lock();
        if state.hijacked {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                "connection already hijacked",
            ));
        }
        state.hijacked = true;

        Ok(Box::new(CapturedConn {
            state: Arc::clone(&self.state),
        }))
    }

    fn hijacked(&self) -> bool {
        self.state.lock().hijacked
    }
}

struct CapturedConn {
    state: Arc<Mutex<CaptureState>>,
}

impl HijackedConn for CapturedConn {
    fn write_response(&mut self, resp: &ProxyResponse) -> io::Result<()> {
        let mut state = self.state.lock();
        if state.pending.is_some() || state.flushed.is_some() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "response already written",
            ));
        }
        state.pending = Some(clone_response(resp));
        Ok(())
    }

    fn flush(&mut self) -> io::Result<()> {
        let mut state = self.state.lock();
        if let Some(resp) = state.pending.take() {
            state.flushed = Some(resp);
        }
        Ok(())
    }
}
