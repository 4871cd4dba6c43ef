//! Bidirectional session tables, one concurrent map per protocol.
//!
//! An established binding is stored twice: `private -> public` and
//! `public -> private`. Lookups are lock-free with respect to each other;
//! pair insertion and removal must happen under the binding lock of
//! [`ConnectionManager`](super::ConnectionManager) so no reader ever sees
//! half a pair created by a racing allocation.

use dashmap::DashMap;

use super::Protocol;
use super::tuple::Tuple;

pub struct SessionTables {
    tables: [DashMap<Tuple, Tuple>; Protocol::COUNT],
}

impl SessionTables {
    pub fn new() -> Self {
        Self {
            tables: std::array::from_fn(|_| DashMap::new()),
        }
    }

    fn table(&self, protocol: Protocol) -> &DashMap<Tuple, Tuple> {
        &self.tables[protocol.index()]
    }

    pub fn lookup(&self, protocol: Protocol, key: &Tuple) -> Option<Tuple> {
        self.table(protocol)
            .get(key)
            .map(|v| *v)
    }

    pub fn insert_pair(&self, protocol: Protocol, private: Tuple, public: Tuple) {
        let table = self.table(protocol);
        table.insert(private, public);
        table.insert(public, private);
    }

    pub fn remove_pair(&self, protocol: Protocol, private: Tuple, public: Tuple) {
        let table = self.table(protocol);
        table.remove_if(&private, |_, v| *v == public);
        table.remove_if(&public, |_, v| *v == private);
    }

    /// Removes the binding whose public side is `public`, returning the
    /// private tuple it pointed to.
    pub fn remove_by_public(&self, protocol: Protocol, public: Tuple) -> Option<Tuple> {
        let private = self.lookup(protocol, &public)?;
        self.remove_pair(protocol, private, public);
        Some(private)
    }

    /// Number of map entries, two per binding.
    pub fn len(&self, protocol: Protocol) -> usize {
        self.table(protocol).len()
    }

    pub fn is_empty(&self, protocol: Protocol) -> bool {
        self.table(protocol).is_empty()
    }
}

impl Default for SessionTables {
    fn default() -> Self {
        Self::new()
    }
}
