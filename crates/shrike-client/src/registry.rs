//! Pending-invocation registry.
//!
//! Maps a live 16-bit invocation id to the record awaiting its response.
//! Ids are allocated by sampling the thread-local RNG and retrying on
//! collision: the 16-bit space is large against realistic in-flight counts.
//! Once the channel closes, no insert succeeds and every drained record is
//! notified exactly once.

use std::collections::HashMap;
use std::sync::Arc;

use bytes::Bytes;
use parking_lot::Mutex;
use rand::Rng;

use shrike_core::Error;

/// A request awaiting its response frames.
pub(crate) trait PendingInvocation: Send + Sync {
    /// Deliver one inbound frame addressed to this invocation. `opcode` is
    /// the raw wire byte; interpreting it is the record's job.
    fn handle_response(&self, opcode: u8, payload: Bytes);

    /// The channel closed before a terminal response arrived.
    fn handle_closed(&self);
}

pub(crate) struct InvocationRegistry {
    state: Mutex<RegistryState>,
}

struct RegistryState {
    invocations: HashMap<u16, Arc<dyn PendingInvocation>>,
    closed: bool,
}

impl InvocationRegistry {
    pub fn new() -> Self {
        InvocationRegistry {
            state: Mutex::new(RegistryState {
                invocations: HashMap::new(),
                closed: false,
            }),
        }
    }

    /// Allocate a free id and register the record built for it.
    ///
    /// Fails with [`Error::ChannelClosed`] once the registry is closed; the
    /// closed check and the insert are one critical section, so a record
    /// can never slip in behind the closure broadcast.
    pub fn allocate<F>(&self, make: F) -> Result<(u16, Arc<dyn PendingInvocation>), Error>
    where
        F: FnOnce(u16) -> Arc<dyn PendingInvocation>,
    {
        let mut state = self.state.lock();
        if state.closed {
            return Err(Error::ChannelClosed);
        }

        let mut rng = rand::thread_rng();
        loop {
            let id: u16 = rng.r#gen();
            if state.invocations.contains_key(&id) {
                continue;
            }
            let record = make(id);
            state.invocations.insert(id, record.clone());
            return Ok((id, record));
        }
    }

    pub fn get(&self, id: u16) -> Option<Arc<dyn PendingInvocation>> {
        self.state.lock().invocations.get(&id).cloned()
    }

    pub fn remove(&self, id: u16) -> Option<Arc<dyn PendingInvocation>> {
        self.state.lock().invocations.remove(&id)
    }

    /// Remove `id` only while it still maps to this exact record, freeing
    /// the id for reuse. Returns whether a removal happened.
    pub fn remove_record(&self, id: u16, record: &Arc<dyn PendingInvocation>) -> bool {
        let mut state = self.state.lock();
        match state.invocations.get(&id) {
            Some(current) if Arc::ptr_eq(current, record) => {
                state.invocations.remove(&id);
                true
            }
            _ => false,
        }
    }

    /// Close the registry and notify every pending record exactly once.
    ///
    /// Notification happens outside the lock so records may call back into
    /// the registry.
    pub fn close_all(&self) {
        let drained: Vec<Arc<dyn PendingInvocation>> = {
            let mut state = self.state.lock();
            if state.closed {
                return;
            }
            state.closed = true;
            state.invocations.drain().map(|(_, record)| record).collect()
        };

        for record in drained {
            record.handle_closed();
        }
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.state.lock().invocations.len()
    }
}
