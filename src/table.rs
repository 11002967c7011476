//! Per-backend resource tables.
//!
//! Each table maps ids to owned records. Ids start at 1, increase
//! monotonically and are never reused for the lifetime of the table, so a
//! stale handle can only ever miss, never alias a newer resource.

use std::collections::HashMap;

use crate::handle::{Handle, ResourceKind};
use crate::util::{Error, Result};

/// Id-to-record map for one resource kind.
pub struct ResourceTable<K, T> {
    entries: HashMap<u32, T>,
    next_id: u32,
    _kind: std::marker::PhantomData<fn() -> K>,
}

impl<K: ResourceKind, T> ResourceTable<K, T> {
    pub fn new() -> Self {
        Self {
            entries: HashMap::new(),
            next_id: 1,
            _kind: std::marker::PhantomData,
        }
    }

    /// Store a record and issue its handle.
    pub fn insert(&mut self, record: T) -> Result<Handle<K>> {
        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(Error::IdsExhausted(K::NAME))?;
        self.entries.insert(id, record);
        Ok(Handle::from_id(id))
    }

    /// Resolve a handle, failing with [`Error::InvalidHandle`].
    pub fn get(&self, handle: Handle<K>) -> Result<&T> {
        self.entries
            .get(&handle.id())
            .ok_or(Error::InvalidHandle { kind: K::NAME, id: handle.id() })
    }

    pub fn get_mut(&mut self, handle: Handle<K>) -> Result<&mut T> {
        self.entries
            .get_mut(&handle.id())
            .ok_or(Error::InvalidHandle { kind: K::NAME, id: handle.id() })
    }

    #[inline]
    pub fn contains(&self, handle: Handle<K>) -> bool {
        self.entries.contains_key(&handle.id())
    }

    #[inline]
    pub fn contains_id(&self, id: u32) -> bool {
        self.entries.contains_key(&id)
    }

    /// Remove and return the record; `None` for unknown or invalid handles.
    pub fn remove(&mut self, handle: Handle<K>) -> Option<T> {
        self.entries.remove(&handle.id())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every record. Issued ids stay retired.
    pub fn clear(&mut self) -> usize {
        let n = self.entries.len();
        self.entries.clear();
        n
    }
}

impl<K: ResourceKind, T> Default for ResourceTable<K, T> {
    fn default() -> Self {
        Self::new()
    }
}
