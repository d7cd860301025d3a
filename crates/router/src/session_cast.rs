//! Session-cast table: the routes a session multicast fans out over, kept
//! sorted lexicographically by `(session_id, src)` so lookups are a
//! `partition_point` lower bound plus an in-order scan, deduplicating
//! consecutive entries that share a bus-to-bus hop.

use parking_lot::RwLock;

use crate::endpoint::EndpointId;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct SessionCastEntry {
    pub session_id: u32,
    pub src: EndpointId,
    pub b2b_endpoint: Option<EndpointId>,
    pub dest_endpoint: EndpointId,
}

#[derive(Default)]
pub struct SessionCastTable {
    entries: RwLock<Vec<SessionCastEntry>>,
}

impl SessionCastTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entry: SessionCastEntry) {
        let mut entries = self.entries.write();
        let at = entries.partition_point(|e| *e <= entry);
        entries.insert(at, entry);
    }

    /// Installs the paired routes a session multicast needs both ways:
    /// `a` routes to `b` (via `b2b_for_a` if the hop crosses a bus-to-bus
    /// link) and vice versa.
    pub fn establish_session(
        &self,
        session_id: u32,
        a: EndpointId,
        b: EndpointId,
        b2b_for_a: Option<EndpointId>,
        b2b_for_b: Option<EndpointId>,
    ) {
        self.insert(SessionCastEntry {
            session_id,
            src: a,
            b2b_endpoint: b2b_for_a,
            dest_endpoint: b,
        });
        self.insert(SessionCastEntry {
            session_id,
            src: b,
            b2b_endpoint: b2b_for_b,
            dest_endpoint: a,
        });
    }

    pub fn remove_session(&self, session_id: u32) {
        self.entries.write().retain(|e| e.session_id != session_id);
    }

    /// Destinations reachable from `sender` for `session_id`, deduplicating
    /// consecutive entries that share a bus-to-bus hop.
    pub fn destinations(&self, session_id: u32, sender: EndpointId) -> Vec<EndpointId> {
        let entries = self.entries.read();
        let lower = SessionCastEntry {
            session_id,
            src: sender,
            b2b_endpoint: None,
            dest_endpoint: EndpointId::MIN,
        };
        let start = entries.partition_point(|e| *e < lower);

        let mut out = Vec::new();
        let mut last_b2b: Option<Option<EndpointId>> = None;

        for entry in &entries[start..] {
            if entry.session_id != session_id || entry.src != sender {
                break;
            }

            if last_b2b == Some(entry.b2b_endpoint) {
                continue;
            }

            last_b2b = Some(entry.b2b_endpoint);
            out.push(entry.dest_endpoint);
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::{Endpoint, EndpointFeatures, EndpointKind, EndpointRegistry, EndpointSink};

    struct NullSink;
    impl EndpointSink for NullSink {
        fn push(&self, _message: &crate::message::Message) -> Result<(), crate::Error> {
            Ok(())
        }
    }

    fn endpoint(registry: &EndpointRegistry) -> EndpointId {
        registry.insert(Endpoint::new(
            EndpointKind::Virtual,
            true,
            EndpointFeatures::default(),
            Box::new(NullSink),
        ))
    }

    #[test]
    fn destinations_deduplicates_by_b2b_hop() {
        let registry = EndpointRegistry::new();
        let src = endpoint(&registry);
        let dest = endpoint(&registry);
        let b2b = endpoint(&registry);

        let table = SessionCastTable::new();
        table.insert(SessionCastEntry {
            session_id: 99,
            src,
            b2b_endpoint: Some(b2b),
            dest_endpoint: dest,
        });
        table.insert(SessionCastEntry {
            session_id: 99,
            src,
            b2b_endpoint: Some(b2b),
            dest_endpoint: dest,
        });

        assert_eq!(table.destinations(99, src), vec![dest]);
    }

    #[test]
    fn establish_session_routes_both_directions() {
        let registry = EndpointRegistry::new();
        let a = endpoint(&registry);
        let b = endpoint(&registry);

        let table = SessionCastTable::new();
        table.establish_session(99, a, b, None, None);

        assert_eq!(table.destinations(99, a), vec![b]);
        assert_eq!(table.destinations(99, b), vec![a]);
    }
}
