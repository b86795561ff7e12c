//! Forward-only lifecycle shared by channels and channel factories.
//!
//! ```text
//! Created ─► Opening ─► Opened ─► Closing ─► Closed
//!    └──────────┴──────────┴─────────┴─────► Faulted ─(abort)─► Closed
//! ```
//!
//! Every transition happens under one lock and is published on a
//! `tokio::sync::watch` channel so owners can await state changes.

use std::fmt;

use parking_lot::Mutex;
use tokio::sync::watch;

use crate::error::{ChannelError, Result};

/// Lifecycle states of a communication object.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommunicationState {
    Created,
    Opening,
    Opened,
    Closing,
    Closed,
    Faulted,
}

impl CommunicationState {
    /// `Closed` and `Faulted` admit no further forward transitions.
    pub fn is_terminal(self) -> bool {
        matches!(self, CommunicationState::Closed | CommunicationState::Faulted)
    }
}

impl fmt::Display for CommunicationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            CommunicationState::Created => "Created",
            CommunicationState::Opening => "Opening",
            CommunicationState::Opened => "Opened",
            CommunicationState::Closing => "Closing",
            CommunicationState::Closed => "Closed",
            CommunicationState::Faulted => "Faulted",
        })
    }
}

struct Inner {
    state: CommunicationState,
    fault_reason: Option<String>,
}

/// The lifecycle state machine of one channel or factory.
pub struct CommunicationObject {
    name: &'static str,
    inner: Mutex<Inner>,
    published: watch::Sender<CommunicationState>,
}

impl CommunicationObject {
    pub fn new(name: &'static str) -> Self {
        let (published, _) = watch::channel(CommunicationState::Created);
        Self {
            name,
            inner: Mutex::new(Inner {
                state: CommunicationState::Created,
                fault_reason: None,
            }),
            published,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn state(&self) -> CommunicationState {
        self.inner.lock().state
    }

    /// Watch every subsequent state change.
    pub fn subscribe(&self) -> watch::Receiver<CommunicationState> {
        self.published.subscribe()
    }

    pub fn fault_reason(&self) -> Option<String> {
        self.inner.lock().fault_reason.clone()
    }

    /// `Created → Opening`.
    pub fn begin_open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommunicationState::Created => {
                self.transition(&mut inner, CommunicationState::Opening);
                Ok(())
            }
            _ => Err(self.unusable(&inner, CommunicationState::Created)),
        }
    }

    /// `Opening → Opened`; fails if the object was aborted or faulted meanwhile.
    pub fn complete_open(&self) -> Result<()> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommunicationState::Opening => {
                self.transition(&mut inner, CommunicationState::Opened);
                Ok(())
            }
            CommunicationState::Closed => Err(ChannelError::Aborted(self.name)),
            _ => Err(self.unusable(&inner, CommunicationState::Opening)),
        }
    }

    /// Open in one step, for objects with no asynchronous open work.
    pub fn open(&self) -> Result<()> {
        self.begin_open()?;
        self.complete_open()
    }

    /// Fail unless the object is `Opened`.
    pub fn ensure_opened(&self) -> Result<()> {
        let inner = self.inner.lock();
        if inner.state == CommunicationState::Opened {
            return Ok(());
        }
        Err(self.unusable(&inner, CommunicationState::Opened))
    }

    /// Move to `Closing`.
    ///
    /// Returns `Ok(false)` when a close is already under way or done, so the
    /// caller has nothing left to do. A faulted object cannot be closed
    /// gracefully; the caller aborts it instead.
    pub fn begin_close(&self) -> Result<bool> {
        let mut inner = self.inner.lock();
        match inner.state {
            CommunicationState::Created
            | CommunicationState::Opening
            | CommunicationState::Opened => {
                self.transition(&mut inner, CommunicationState::Closing);
                Ok(true)
            }
            CommunicationState::Closing | CommunicationState::Closed => Ok(false),
            CommunicationState::Faulted => Err(self.faulted_error(&inner)),
        }
    }

    /// `Closing → Closed`. A concurrent abort already reached `Closed`.
    pub fn complete_close(&self) {
        let mut inner = self.inner.lock();
        if inner.state == CommunicationState::Closing {
            self.transition(&mut inner, CommunicationState::Closed);
        }
    }

    /// Move to `Closed` from any state. Returns false if already closed.
    pub fn abort(&self) -> bool {
        let mut inner = self.inner.lock();
        if inner.state == CommunicationState::Closed {
            return false;
        }
        self.transition(&mut inner, CommunicationState::Closed);
        true
    }

    /// Move to `Faulted`, remembering `reason` for later callers.
    ///
    /// Returns false if the object was already closed or faulted.
    pub fn fault(&self, reason: impl Into<String>) -> bool {
        let mut inner = self.inner.lock();
        if inner.state.is_terminal() {
            return false;
        }
        inner.fault_reason = Some(reason.into());
        self.transition(&mut inner, CommunicationState::Faulted);
        true
    }

    fn transition(&self, inner: &mut Inner, next: CommunicationState) {
        tracing::debug!(object = self.name, from = %inner.state, to = %next, "state transition");
        inner.state = next;
        self.published.send_replace(next);
    }

    fn unusable(&self, inner: &Inner, required: CommunicationState) -> ChannelError {
        match inner.state {
            CommunicationState::Faulted => self.faulted_error(inner),
            CommunicationState::Closing | CommunicationState::Closed => {
                ChannelError::ObjectDisposed(self.name)
            }
            state => ChannelError::InvalidState {
                object: self.name,
                state,
                required,
            },
        }
    }

    fn faulted_error(&self, inner: &Inner) -> ChannelError {
        ChannelError::faulted(
            self.name,
            inner.fault_reason.as_deref().unwrap_or("unknown reason"),
        )
    }
}

impl fmt::Debug for CommunicationObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommunicationObject")
            .field("name", &self.name)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_then_close() {
        let object = CommunicationObject::new("test object");
        assert_eq!(object.state(), CommunicationState::Created);
        object.open().unwrap();
        assert_eq!(object.state(), CommunicationState::Opened);
        assert!(object.begin_close().unwrap());
        assert_eq!(object.state(), CommunicationState::Closing);
        object.complete_close();
        assert_eq!(object.state(), CommunicationState::Closed);
        assert!(!object.begin_close().unwrap());
    }

    #[test]
    fn opened_required_for_use() {
        let object = CommunicationObject::new("test object");
        assert!(matches!(
            object.ensure_opened(),
            Err(ChannelError::InvalidState {
                state: CommunicationState::Created,
                ..
            })
        ));
        object.open().unwrap();
        object.ensure_opened().unwrap();
        object.abort();
        assert!(matches!(
            object.ensure_opened(),
            Err(ChannelError::ObjectDisposed(_))
        ));
    }

    #[test]
    fn open_twice_fails() {
        let object = CommunicationObject::new("test object");
        object.open().unwrap();
        assert!(object.open().is_err());
    }

    #[test]
    fn abort_is_idempotent() {
        let object = CommunicationObject::new("test object");
        object.open().unwrap();
        assert!(object.abort());
        assert!(!object.abort());
        assert_eq!(object.state(), CommunicationState::Closed);
    }

    #[test]
    fn fault_is_reported_then_abortable() {
        let object = CommunicationObject::new("test object");
        object.open().unwrap();
        assert!(object.fault("peer reset"));
        assert!(!object.fault("again"));

        let err = object.ensure_opened().unwrap_err();
        assert!(err.to_string().contains("peer reset"), "{err}");
        assert!(matches!(object.begin_close(), Err(ChannelError::Faulted { .. })));

        assert!(object.abort());
        assert_eq!(object.state(), CommunicationState::Closed);
        assert!(!object.fault("after close"));
    }

    #[test]
    fn abort_during_open_fails_completion() {
        let object = CommunicationObject::new("test object");
        object.begin_open().unwrap();
        object.abort();
        assert!(matches!(
            object.complete_open(),
            Err(ChannelError::Aborted(_))
        ));
    }

    #[tokio::test]
    async fn transitions_are_published() {
        let object = CommunicationObject::new("test object");
        let mut changes = object.subscribe();
        object.open().unwrap();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow_and_update(), CommunicationState::Opened);

        object.abort();
        changes.changed().await.unwrap();
        assert_eq!(*changes.borrow(), CommunicationState::Closed);
    }
}
