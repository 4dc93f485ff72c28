use foldhash::HashSet;
use parking_lot::RwLock;
use std::{
    fmt::{Debug, Error as FmtError, Formatter},
    hash::{Hash, Hasher},
    ops::Deref,
    sync::Arc,
};

/// A set of canonical values, where structurally equal values share one allocation.
///
/// Readers never block each other, except when a value is not interned yet. Entries are never
/// removed, so an [`Interned`] handle stays canonical for the lifetime of the table.
pub(crate) struct InternTable<T> {
    inner: RwLock<HashSet<Arc<T>>>,
}

impl<T> Default for InternTable<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> InternTable<T> {
    pub(crate) fn new() -> Self {
        Self {
            inner: RwLock::new(HashSet::default()),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.inner.read().len()
    }
}

impl<T> InternTable<T>
where
    T: Eq + Hash,
{
    /// Returns the canonical handle for `value`, inserting it if it is new.
    pub(crate) fn intern(&self, value: T) -> Interned<T> {
        if let Some(existing) = self.inner.read().get(&value) {
            return Interned(existing.clone());
        }

        let mut inner = self.inner.write();

        // Another thread may have inserted it between the two locks.
        if let Some(existing) = inner.get(&value) {
            return Interned(existing.clone());
        }

        let value = Arc::new(value);
        inner.insert(value.clone());

        Interned(value)
    }
}

/// A canonical value produced by an [`InternTable`].
///
/// Equality and hashing use the identity of the allocation, so comparing two `Interned` values is
/// a pointer comparison.
pub struct Interned<T>(Arc<T>);

impl<T> Interned<T> {
    #[inline]
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        Arc::ptr_eq(&this.0, &other.0)
    }
}

impl<T> Clone for Interned<T> {
    #[inline]
    fn clone(&self) -> Self {
        Interned(self.0.clone())
    }
}

impl<T> Deref for Interned<T> {
    type Target = T;

    #[inline]
    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> PartialEq for Interned<T> {
    #[inline]
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }
}

impl<T> Eq for Interned<T> {}

impl<T> Hash for Interned<T> {
    #[inline]
    fn hash<H: Hasher>(&self, state: &mut H) {
        Arc::as_ptr(&self.0).hash(state);
    }
}

impl<T: Debug> Debug for Interned<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> Result<(), FmtError> {
        Debug::fmt(&*self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use super::{InternTable, Interned};
    use std::{sync::Arc, thread};

    #[test]
    fn structural_values_share_identity() {
        let table = InternTable::new();
        let a = table.intern(vec![1u32, 2, 3]);
        let b = table.intern(vec![1u32, 2, 3]);
        let c = table.intern(vec![3u32, 2, 1]);

        assert!(Interned::ptr_eq(&a, &b));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn concurrent_interning() {
        let table = Arc::new(InternTable::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let table = table.clone();
                thread::spawn(move || table.intern(String::from("layout")))
            })
            .collect();
        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();

        assert!(results.windows(2).all(|w| w[0] == w[1]));
        assert_eq!(table.len(), 1);
    }
}
