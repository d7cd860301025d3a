//! Name table: unique connection names (`:N.M`) and well-known alias names
//! with FIFO ownership queues, grounded on `crates/service/src/session/
//! mod.rs`'s `Table<K, V>` pattern (an `RwLock`-guarded map, snapshot reads
//! releasing the lock before any listener notification or I/O).

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ahash::AHashMap;
use parking_lot::RwLock;

use crate::endpoint::EndpointId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliasDisposition {
    Primary,
    Queued,
    InQueue,
    AlreadyOwner,
    Rejected,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct AddAliasFlags {
    pub allow_replacement: bool,
    pub do_not_queue: bool,
    pub replace_existing: bool,
}

#[derive(Debug, Clone)]
struct QueueEntry {
    owner: EndpointId,
    flags: AddAliasFlags,
}

#[derive(Debug, Clone, Default)]
struct AliasEntry {
    /// `queue[0]` is the primary owner.
    queue: Vec<QueueEntry>,
}

pub trait NameListener: Send + Sync {
    fn on_alias_changed(&self, alias: &str, old: Option<EndpointId>, new: Option<EndpointId>);
}

pub struct NameTable {
    process_id: u64,
    counter: AtomicU64,
    listeners: RwLock<Vec<Arc<dyn NameListener>>>,
    uniques: RwLock<AHashMap<String, EndpointId>>,
    aliases: RwLock<AHashMap<String, AliasEntry>>,
}

impl NameTable {
    pub fn new(process_id: u64) -> Self {
        Self {
            process_id,
            counter: AtomicU64::new(0),
            listeners: RwLock::new(Vec::new()),
            uniques: RwLock::new(AHashMap::new()),
            aliases: RwLock::new(AHashMap::new()),
        }
    }

    pub fn add_listener(&self, listener: Arc<dyn NameListener>) {
        self.listeners.write().push(listener);
    }

    pub fn generate_unique_name(&self) -> String {
        let n = self.counter.fetch_add(1, Ordering::AcqRel);
        format!(":{}.{}", self.process_id, n)
    }

    pub fn add_unique(&self, name: String, endpoint: EndpointId) {
        self.uniques.write().insert(name, endpoint);
    }

    /// Tears down a disconnected endpoint's unique name and every alias
    /// ownership entry it held, queued or primary.
    pub fn remove_unique(&self, name: &str, endpoint: EndpointId) {
        self.uniques.write().remove(name);

        let affected: Vec<String> = {
            let aliases = self.aliases.read();
            aliases
                .iter()
                .filter(|(_, entry)| entry.queue.iter().any(|q| q.owner == endpoint))
                .map(|(alias, _)| alias.clone())
                .collect()
        };

        for alias in affected {
            self.remove_alias(&alias, endpoint);
        }

        self.notify(name, Some(endpoint), None);
    }

    pub fn add_alias(
        &self,
        alias: &str,
        owner: EndpointId,
        flags: AddAliasFlags,
    ) -> AliasDisposition {
        let mut aliases = self.aliases.write();
        let entry = aliases.entry(alias.to_string()).or_default();

        if entry.queue.is_empty() {
            entry.queue.push(QueueEntry { owner, flags });
            drop(aliases);
            self.notify(alias, None, Some(owner));
            return AliasDisposition::Primary;
        }

        if entry.queue[0].owner == owner {
            return AliasDisposition::AlreadyOwner;
        }

        if entry.queue.iter().any(|q| q.owner == owner) {
            return AliasDisposition::InQueue;
        }

        let primary_replaceable = entry.queue[0].flags.allow_replacement;

        if primary_replaceable || flags.replace_existing {
            let old_primary = std::mem::replace(&mut entry.queue[0], QueueEntry { owner, flags });
            entry.queue.push(old_primary);
            drop(aliases);
            self.notify(alias, None, Some(owner));
            return AliasDisposition::Primary;
        }

        if flags.do_not_queue {
            return AliasDisposition::Rejected;
        }

        entry.queue.push(QueueEntry { owner, flags });
        AliasDisposition::Queued
    }

    pub fn remove_alias(&self, alias: &str, owner: EndpointId) -> AliasDisposition {
        let mut aliases = self.aliases.write();
        let Some(entry) = aliases.get_mut(alias) else {
            return AliasDisposition::Rejected;
        };

        let Some(pos) = entry.queue.iter().position(|q| q.owner == owner) else {
            return AliasDisposition::Rejected;
        };

        let was_primary = pos == 0;
        entry.queue.remove(pos);

        let new_primary = entry.queue.first().map(|q| q.owner);
        let empty = entry.queue.is_empty();

        if empty {
            aliases.remove(alias);
        }

        drop(aliases);

        if was_primary {
            self.notify(alias, Some(owner), new_primary);
            AliasDisposition::Primary
        } else {
            AliasDisposition::InQueue
        }
    }

    /// Sets a virtual alias's single owner directly (no queueing); used for
    /// names synthesized for bus-to-bus virtual endpoints. Returns whether
    /// the owner actually changed.
    pub fn set_virtual_alias(&self, alias: &str, new_owner: Option<EndpointId>) -> bool {
        let mut aliases = self.aliases.write();
        let old = aliases
            .get(alias)
            .and_then(|entry| entry.queue.first())
            .map(|q| q.owner);

        if old == new_owner {
            return false;
        }

        match new_owner {
            Some(owner) => {
                aliases.insert(
                    alias.to_string(),
                    AliasEntry {
                        queue: vec![QueueEntry {
                            owner,
                            flags: AddAliasFlags::default(),
                        }],
                    },
                );
            }
            None => {
                aliases.remove(alias);
            }
        }

        drop(aliases);
        self.notify(alias, old, new_owner);
        true
    }

    pub fn remove_virtual_aliases(&self, endpoint: EndpointId) {
        let affected: Vec<(String, Option<EndpointId>)> = {
            let aliases = self.aliases.read();
            aliases
                .iter()
                .filter(|(_, entry)| entry.queue.first().is_some_and(|q| q.owner == endpoint))
                .map(|(alias, _)| (alias.clone(), None))
                .collect()
        };

        for (alias, new_owner) in affected {
            self.set_virtual_alias(&alias, new_owner);
        }
    }

    pub fn find_endpoint(&self, name: &str) -> Option<EndpointId> {
        if let Some(id) = self.uniques.read().get(name) {
            return Some(*id);
        }

        self.aliases
            .read()
            .get(name)
            .and_then(|entry| entry.queue.first())
            .map(|q| q.owner)
    }

    fn notify(&self, name: &str, old: Option<EndpointId>, new: Option<EndpointId>) {
        for listener in self.listeners.read().iter() {
            listener.on_alias_changed(name, old, new);
        }
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
            EndpointKind::Local,
            true,
            EndpointFeatures::default(),
            Box::new(NullSink),
        ))
    }

    #[test]
    fn generate_unique_name_is_monotonic_and_process_scoped() {
        let table = NameTable::new(1);
        assert_eq!(table.generate_unique_name(), ":1.0");
        assert_eq!(table.generate_unique_name(), ":1.1");
    }

    #[test]
    fn add_alias_queues_behind_non_replaceable_primary() {
        let registry = EndpointRegistry::new();
        let a = endpoint(&registry);
        let b = endpoint(&registry);
        let table = NameTable::new(1);

        assert_eq!(
            table.add_alias("com.example.Foo", a, AddAliasFlags::default()),
            AliasDisposition::Primary
        );
        assert_eq!(
            table.add_alias("com.example.Foo", b, AddAliasFlags::default()),
            AliasDisposition::Queued
        );
        assert_eq!(table.find_endpoint("com.example.Foo"), Some(a));
    }

    #[test]
    fn add_alias_replaces_when_primary_allows_it() {
        let registry = EndpointRegistry::new();
        let a = endpoint(&registry);
        let b = endpoint(&registry);
        let table = NameTable::new(1);

        table.add_alias(
            "com.example.Foo",
            a,
            AddAliasFlags {
                allow_replacement: true,
                ..Default::default()
            },
        );

        assert_eq!(
            table.add_alias("com.example.Foo", b, AddAliasFlags::default()),
            AliasDisposition::Primary
        );
        assert_eq!(table.find_endpoint("com.example.Foo"), Some(b));
    }

    #[test]
    fn add_alias_rejects_do_not_queue_behind_locked_primary() {
        let registry = EndpointRegistry::new();
        let a = endpoint(&registry);
        let b = endpoint(&registry);
        let table = NameTable::new(1);

        table.add_alias("com.example.Foo", a, AddAliasFlags::default());

        assert_eq!(
            table.add_alias(
                "com.example.Foo",
                b,
                AddAliasFlags {
                    do_not_queue: true,
                    ..Default::default()
                }
            ),
            AliasDisposition::Rejected
        );
    }

    #[test]
    fn remove_alias_promotes_next_in_queue() {
        let registry = EndpointRegistry::new();
        let a = endpoint(&registry);
        let b = endpoint(&registry);
        let table = NameTable::new(1);

        table.add_alias("com.example.Foo", a, AddAliasFlags::default());
        table.add_alias("com.example.Foo", b, AddAliasFlags::default());

        assert_eq!(
            table.remove_alias("com.example.Foo", a),
            AliasDisposition::Primary
        );
        assert_eq!(table.find_endpoint("com.example.Foo"), Some(b));
    }
}
