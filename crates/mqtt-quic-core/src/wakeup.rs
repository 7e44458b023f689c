//! Cross-thread wakeup for the worker's poll loop.
//!
//! Semantics: at least one post causes the next poll to return promptly.
//! The reader side needs no explicit drain; the waker resets itself when
//! the poll observes it.

use std::sync::Arc;

use mio::{Registry, Token, Waker};

use crate::error::Result;

/// Poll token for the UDP socket.
pub(crate) const SOCKET_TOKEN: Token = Token(0);

/// Poll token for the wakeup channel.
pub(crate) const WAKE_TOKEN: Token = Token(1);

/// Unblocks the worker's poll from any thread.
#[derive(Clone)]
pub(crate) struct Wakeup {
    waker: Arc<Waker>,
}

impl Wakeup {
    pub(crate) fn new(registry: &Registry) -> Result<Self> {
        let waker = Waker::new(registry, WAKE_TOKEN)?;
        Ok(Self {
            waker: Arc::new(waker),
        })
    }

    /// Best-effort post; a single buffered wake is sufficient.
    pub(crate) fn signal(&self) {
        let _ = self.waker.wake();
    }
}
