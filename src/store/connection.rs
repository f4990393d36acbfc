//! Scoped backend sessions.

use std::ops::{Deref, DerefMut};

use super::backend::RemoteBackend;
use crate::error::Result;

/// An open session that is disconnected when dropped.
///
/// Every operation group (tree build, row population, transfer) opens one of
/// these, so an early return or `?` still releases the session.
pub struct Connection<'b, B: RemoteBackend> {
    backend: &'b B,
    session: Option<B::Session>,
}

impl<'b, B: RemoteBackend> Connection<'b, B> {
    pub fn open(backend: &'b B) -> Result<Self> {
        let session = backend.connect()?;
        tracing::trace!(backend = backend.name(), "connected");
        Ok(Self {
            backend,
            session: Some(session),
        })
    }

    /// Disconnects explicitly, surfacing the disconnect error.
    pub fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => self.backend.disconnect(session),
            None => Ok(()),
        }
    }
}

impl<B: RemoteBackend> Deref for Connection<'_, B> {
    type Target = B::Session;

    fn deref(&self) -> &Self::Target {
        // Only `close` and `drop` take the session, and both consume `self`.
        self.session.as_ref().expect("session is present until close")
    }
}

impl<B: RemoteBackend> DerefMut for Connection<'_, B> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.session.as_mut().expect("session is present until close")
    }
}

impl<B: RemoteBackend> Drop for Connection<'_, B> {
    fn drop(&mut self) {
        if let Some(session) = self.session.take() {
            if let Err(e) = self.backend.disconnect(session) {
                tracing::warn!(backend = self.backend.name(), error = %e, "disconnect failed");
            } else {
                tracing::trace!(backend = self.backend.name(), "disconnected");
            }
        }
    }
}
