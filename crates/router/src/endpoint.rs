//! Endpoint registry: arena-indexed handles rather than shared pointers with
//! a back-reference to the router, so router and endpoint never form an
//! ownership cycle. `Reservation` is the "intent token": taking one bumps
//! the waiters counter under the registry lock, the guard is then held
//! across I/O performed with the lock released, and `destroy` refuses an
//! endpoint with outstanding waiters.

use std::ops::Deref;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ahash::AHashMap;
use parking_lot::{Mutex, RwLock};

use crate::{Error, message::Message};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct EndpointId {
    index: u32,
    generation: u32,
}

impl EndpointId {
    /// Not a handle to any real endpoint; only useful as a search key (e.g.
    /// the lower bound of a session-cast range scan).
    pub const MIN: EndpointId = EndpointId {
        index: 0,
        generation: 0,
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EndpointKind {
    Local,
    RemoteClient,
    BusToBus,
    Virtual,
    Null,
}

/// Feature flags carried on every endpoint; consulted by the router's
/// remote-message policy.
#[derive(Debug, Clone, Copy, Default)]
pub struct EndpointFeatures {
    pub is_bus_to_bus: bool,
    pub handle_passing: bool,
    pub allow_remote: bool,
}

/// The transport-side half of an endpoint: how a dispatched message actually
/// reaches the reader/writer task that owns the connection. The router
/// never depends on a concrete transport.
pub trait EndpointSink: Send + Sync {
    fn push(&self, message: &Message) -> Result<(), Error>;
}

pub struct Endpoint {
    pub kind: EndpointKind,
    pub allow_remote_messages: bool,
    pub features: EndpointFeatures,
    unique_name: Mutex<Option<String>>,
    waiters: AtomicUsize,
    sink: Box<dyn EndpointSink>,
    /// Virtual endpoints only: `sessionId -> bus-to-bus endpoint` carrying it.
    sessions: RwLock<AHashMap<u32, EndpointId>>,
}

impl Endpoint {
    pub fn new(
        kind: EndpointKind,
        allow_remote_messages: bool,
        features: EndpointFeatures,
        sink: Box<dyn EndpointSink>,
    ) -> Self {
        Self {
            kind,
            allow_remote_messages,
            features,
            unique_name: Mutex::new(None),
            waiters: AtomicUsize::new(0),
            sink,
            sessions: RwLock::new(AHashMap::new()),
        }
    }

    pub fn unique_name(&self) -> Option<String> {
        self.unique_name.lock().clone()
    }

    pub fn set_unique_name(&self, name: String) {
        *self.unique_name.lock() = Some(name);
    }

    pub fn waiters(&self) -> usize {
        self.waiters.load(Ordering::Acquire)
    }

    pub fn push(&self, message: &Message) -> Result<(), Error> {
        self.sink.push(message)
    }

    pub fn bind_session(&self, session_id: u32, b2b: EndpointId) {
        self.sessions.write().insert(session_id, b2b);
    }

    pub fn session_route(&self, session_id: u32) -> Option<EndpointId> {
        self.sessions.read().get(&session_id).copied()
    }

    pub fn unbind_session(&self, session_id: u32) {
        self.sessions.write().remove(&session_id);
    }
}

struct Slot {
    generation: u32,
    endpoint: Option<Arc<Endpoint>>,
}

/// A held reservation on an endpoint. While alive, `remove` on the same
/// endpoint panics rather than tearing it down underneath the holder.
pub struct Reservation {
    endpoint: Arc<Endpoint>,
}

impl Deref for Reservation {
    type Target = Endpoint;

    fn deref(&self) -> &Endpoint {
        &self.endpoint
    }
}

impl Drop for Reservation {
    fn drop(&mut self) {
        self.endpoint.waiters.fetch_sub(1, Ordering::AcqRel);
    }
}

#[derive(Default)]
pub struct EndpointRegistry {
    slots: RwLock<Vec<Slot>>,
    free: Mutex<Vec<u32>>,
}

impl EndpointRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, endpoint: Endpoint) -> EndpointId {
        let endpoint = Arc::new(endpoint);

        if let Some(index) = self.free.lock().pop() {
            let mut slots = self.slots.write();
            let slot = &mut slots[index as usize];
            slot.endpoint = Some(endpoint);
            return EndpointId {
                index,
                generation: slot.generation,
            };
        }

        let mut slots = self.slots.write();
        let index = slots.len() as u32;
        slots.push(Slot {
            generation: 0,
            endpoint: Some(endpoint),
        });

        EndpointId {
            index,
            generation: 0,
        }
    }

    pub fn get(&self, id: EndpointId) -> Option<Arc<Endpoint>> {
        let slots = self.slots.read();
        let slot = slots.get(id.index as usize)?;

        if slot.generation != id.generation {
            return None;
        }

        slot.endpoint.clone()
    }

    /// Every endpoint of a given kind, snapshotted under the registry lock.
    pub fn kind_ids(&self, kind: EndpointKind) -> Vec<EndpointId> {
        let slots = self.slots.read();

        slots
            .iter()
            .enumerate()
            .filter_map(|(index, slot)| {
                let endpoint = slot.endpoint.as_ref()?;
                (endpoint.kind == kind).then_some(EndpointId {
                    index: index as u32,
                    generation: slot.generation,
                })
            })
            .collect()
    }

    /// Take a read reservation: bumps waiters under the lock, then releases
    /// it. The caller performs I/O with the reservation held and drops it
    /// afterward.
    pub fn reserve(&self, id: EndpointId) -> Option<Reservation> {
        let endpoint = self.get(id)?;
        endpoint.waiters.fetch_add(1, Ordering::AcqRel);
        Some(Reservation { endpoint })
    }

    /// Retire an endpoint's slot. Panics if it still has outstanding
    /// waiters; callers must drain those via `reserve`/`Reservation` first.
    pub fn remove(&self, id: EndpointId) -> Option<Arc<Endpoint>> {
        let mut slots = self.slots.write();
        let slot = slots.get_mut(id.index as usize)?;

        if slot.generation != id.generation {
            return None;
        }

        let endpoint = slot.endpoint.take()?;
        assert_eq!(
            endpoint.waiters(),
            0,
            "destroyed endpoint with outstanding waiters"
        );

        slot.generation = slot.generation.wrapping_add(1);
        drop(slots);

        self.free.lock().push(id.index);
        Some(endpoint)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct NullSink;

    impl EndpointSink for NullSink {
        fn push(&self, _message: &Message) -> Result<(), Error> {
            Ok(())
        }
    }

    #[test]
    fn insert_reuses_freed_slots_with_bumped_generation() {
        let registry = EndpointRegistry::new();
        let id = registry.insert(Endpoint::new(
            EndpointKind::Local,
            true,
            EndpointFeatures::default(),
            Box::new(NullSink),
        ));

        registry.remove(id).unwrap();
        assert!(registry.get(id).is_none());

        let new_id = registry.insert(Endpoint::new(
            EndpointKind::Local,
            true,
            EndpointFeatures::default(),
            Box::new(NullSink),
        ));

        assert_eq!(new_id.index, id.index);
        assert_ne!(new_id.generation, id.generation);
        assert!(registry.get(id).is_none());
        assert!(registry.get(new_id).is_some());
    }

    #[test]
    #[should_panic(expected = "outstanding waiters")]
    fn remove_panics_while_reserved() {
        let registry = EndpointRegistry::new();
        let id = registry.insert(Endpoint::new(
            EndpointKind::RemoteClient,
            true,
            EndpointFeatures::default(),
            Box::new(NullSink),
        ));

        let _reservation = registry.reserve(id).unwrap();
        registry.remove(id);
    }
}
