//! Matching replies to the requests that caused them.
//!
//! Entries are keyed by the request's message id together with the type of
//! state stored, so independent layers can correlate the same request
//! without colliding.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::fmt;

use chanprims_message::{AddressingVersion, Message, UniqueId};
use parking_lot::Mutex;

use crate::error::{ChannelError, Result};

type Key = (UniqueId, TypeId);

/// Pending request state indexed by `(message id, state type)`.
#[derive(Default)]
pub struct RequestReplyCorrelator {
    entries: Mutex<HashMap<Key, Box<dyn Any + Send>>>,
}

impl RequestReplyCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `state` under the id of `request`.
    pub fn add<T: Any + Send>(&self, request: &Message, state: T) -> Result<()> {
        let id = request.headers().message_id.clone().ok_or_else(|| {
            ChannelError::InvalidOperation("a correlated request needs a message id".into())
        })?;
        let mut entries = self.entries.lock();
        let key = (id, TypeId::of::<T>());
        if entries.contains_key(&key) {
            return Err(ChannelError::InvalidOperation(format!(
                "a request with message id '{}' is already pending",
                key.0
            )));
        }
        entries.insert(key, Box::new(state));
        Ok(())
    }

    /// Look up the state registered for the request `reply` relates to.
    pub fn find<T: Any + Send + Clone>(&self, reply: &Message, remove: bool) -> Option<T> {
        let id = reply.headers().relates_to.clone()?;
        let key = (id, TypeId::of::<T>());
        let mut entries = self.entries.lock();
        if remove {
            let state = entries.remove(&key)?;
            state.downcast::<T>().ok().map(|state| *state)
        } else {
            entries.get(&key)?.downcast_ref::<T>().cloned()
        }
    }

    /// Drop the entry for `id`. Returns false if it was already gone.
    pub fn remove<T: Any + Send>(&self, id: &UniqueId) -> bool {
        self.entries
            .lock()
            .remove(&(id.clone(), TypeId::of::<T>()))
            .is_some()
    }

    pub fn clear(&self) {
        let drained = std::mem::take(&mut *self.entries.lock());
        if !drained.is_empty() {
            tracing::debug!(entries = drained.len(), "correlator cleared");
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Give `request` a message id if it lacks one and return the id.
    ///
    /// August 2004 addressing requires an explicit reply address, so an
    /// anonymous `ReplyTo` is added there when none is set.
    pub fn prepare_request(request: &mut Message) -> UniqueId {
        let addressing = request.version().addressing();
        let headers = request.headers_mut();
        let id = headers.message_id.get_or_insert_with(UniqueId::new).clone();
        if addressing == AddressingVersion::August2004 && headers.reply_to.is_none() {
            headers.reply_to = addressing.anonymous().map(str::to_owned);
        }
        id
    }

    /// Point `reply` at `request`: `RelatesTo` gets the request id, and a
    /// non-anonymous `ReplyTo` becomes the reply's `To`.
    pub fn prepare_reply(reply: &mut Message, request: &Message) {
        let request_headers = request.headers();
        let anonymous = request.version().addressing().anonymous();
        let headers = reply.headers_mut();
        if headers.relates_to.is_none() {
            headers.relates_to = request_headers.message_id.clone();
        }
        if let Some(reply_to) = &request_headers.reply_to {
            if Some(reply_to.as_str()) != anonymous && headers.to.is_none() {
                headers.to = Some(reply_to.clone());
            }
        }
    }
}

impl fmt::Debug for RequestReplyCorrelator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestReplyCorrelator")
            .field("entries", &self.len())
            .finish()
    }
}
