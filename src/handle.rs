//! Typed resource handles.
//!
//! A handle is an opaque numeric id issued by one backend's resource table.
//! Id 0 is never issued, so [`Handle::INVALID`] is the sentinel every failed
//! creation call returns. Handles carry no pointer; only the issuing table can
//! resolve them.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::marker::PhantomData;

/// Resource kinds (type-level tags).
pub mod kind {
    /// Geometry tag
    #[derive(Debug)]
    pub enum Geometry {}
    /// Bottom-level acceleration structure tag
    #[derive(Debug)]
    pub enum Blas {}
    /// Top-level acceleration structure tag
    #[derive(Debug)]
    pub enum Tlas {}
}

/// Display name for a resource kind.
pub trait ResourceKind {
    const NAME: &'static str;
}

impl ResourceKind for kind::Geometry {
    const NAME: &'static str = "geometry";
}

impl ResourceKind for kind::Blas {
    const NAME: &'static str = "BLAS";
}

impl ResourceKind for kind::Tlas {
    const NAME: &'static str = "TLAS";
}

/// Opaque handle to a backend-owned resource of kind `K`.
pub struct Handle<K> {
    id: u32,
    _kind: PhantomData<fn() -> K>,
}

pub type GeometryHandle = Handle<kind::Geometry>;
pub type BlasHandle = Handle<kind::Blas>;
pub type TlasHandle = Handle<kind::Tlas>;

impl<K> Handle<K> {
    /// The invalid handle (id 0).
    pub const INVALID: Self = Self::from_id(0);

    pub(crate) const fn from_id(id: u32) -> Self {
        Self {
            id,
            _kind: PhantomData,
        }
    }

    #[inline]
    pub fn id(&self) -> u32 {
        self.id
    }

    #[inline]
    pub fn is_valid(&self) -> bool {
        self.id != 0
    }
}

impl<K> Clone for Handle<K> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<K> Copy for Handle<K> {}

impl<K> PartialEq for Handle<K> {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl<K> Eq for Handle<K> {}

impl<K> Hash for Handle<K> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl<K> Default for Handle<K> {
    fn default() -> Self {
        Self::INVALID
    }
}

impl<K: ResourceKind> fmt::Debug for Handle<K> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_valid() {
            write!(f, "{}#{}", K::NAME, self.id)
        } else {
            write!(f, "{}#invalid", K::NAME)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_handle() {
        assert!(!GeometryHandle::INVALID.is_valid());
        assert_eq!(BlasHandle::default(), BlasHandle::INVALID);
        assert_eq!(TlasHandle::INVALID.id(), 0);
    }

    #[test]
    fn test_debug_format() {
        assert_eq!(format!("{:?}", BlasHandle::from_id(3)), "BLAS#3");
        assert_eq!(format!("{:?}", TlasHandle::INVALID), "TLAS#invalid");
    }
}
