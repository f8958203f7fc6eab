//! Dependency-tracked memoization.
//!
//! Mutable venue state lives in [`Tracked`] cells. Writing through a cell
//! marks its [`Field`] in a [`DirtySet`]. Derived values are [`Memo`]s that
//! declare the fields they read; a memo recomputes only when one of those
//! fields is dirty, and reports whether its value actually changed.

use std::ops::Deref;

/// A tracked source field, or a derived value other memos can depend on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Venue settings and owners.
    Info,
    MainAudioCamera,
    Cameras,
    /// Sessions, their identities and media bookkeeping.
    Members,
    /// Derived: the current main audio producer.
    MainAudioProducer,
}

impl Field {
    const fn bit(self) -> u8 {
        1 << (self as u8)
    }
}

/// Fields written since the last flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DirtySet(u8);

impl DirtySet {
    pub fn mark(&mut self, field: Field) {
        self.0 |= field.bit();
    }

    #[must_use]
    pub fn contains(self, field: Field) -> bool {
        self.0 & field.bit() != 0
    }

    #[must_use]
    pub fn any(self, fields: &[Field]) -> bool {
        fields.iter().any(|f| self.contains(*f))
    }

    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

/// A mutable source value. Reads are free; writes mark the field dirty.
#[derive(Debug)]
pub struct Tracked<T> {
    field: Field,
    value: T,
}

impl<T> Tracked<T> {
    pub fn new(field: Field, value: T) -> Self {
        Self { field, value }
    }

    /// Borrow mutably, marking the field dirty.
    pub fn write(&mut self, dirty: &mut DirtySet) -> &mut T {
        dirty.mark(self.field);
        &mut self.value
    }

    /// Replace the value, marking the field dirty.
    pub fn set(&mut self, dirty: &mut DirtySet, value: T) {
        *self.write(dirty) = value;
    }
}

impl<T> Deref for Tracked<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.value
    }
}

/// A cached derived value with a static dependency list.
#[derive(Debug)]
pub struct Memo<T> {
    deps: &'static [Field],
    value: Option<T>,
    stale: bool,
}

impl<T: PartialEq> Memo<T> {
    /// A memo starts stale and computes on the first refresh.
    #[must_use]
    pub fn new(deps: &'static [Field]) -> Self {
        Self {
            deps,
            value: None,
            stale: true,
        }
    }

    /// Mark stale if any dependency is dirty.
    pub fn observe(&mut self, dirty: DirtySet) {
        if dirty.any(self.deps) {
            self.stale = true;
        }
    }

    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    /// Recompute if stale. Returns true when the stored value changed.
    pub fn refresh(&mut self, compute: impl FnOnce() -> T) -> bool {
        if !self.stale {
            return false;
        }
        self.stale = false;
        let next = compute();
        if self.value.as_ref() == Some(&next) {
            return false;
        }
        self.value = Some(next);
        true
    }

    #[must_use]
    pub fn get(&self) -> Option<&T> {
        self.value.as_ref()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_write_marks_only_its_field() {
        let mut dirty = DirtySet::default();
        let mut cameras = Tracked::new(Field::Cameras, 0_u32);
        let members = Tracked::new(Field::Members, 0_u32);

        *cameras.write(&mut dirty) += 1;

        assert!(dirty.contains(Field::Cameras));
        assert!(!dirty.contains(Field::Members));
        assert_eq!(*cameras, 1);
        assert_eq!(*members, 0);
    }

    #[test]
    fn test_reads_do_not_mark() {
        let dirty = DirtySet::default();
        let info = Tracked::new(Field::Info, "hall".to_string());
        assert_eq!(info.len(), 4);
        assert!(dirty.is_empty());
    }

    #[test]
    fn test_memo_recomputes_only_for_its_dependencies() {
        let calls = Cell::new(0);
        let mut memo: Memo<u32> = Memo::new(&[Field::Members]);

        assert!(memo.refresh(|| {
            calls.set(calls.get() + 1);
            7
        }));
        assert_eq!(memo.get(), Some(&7));

        let mut dirty = DirtySet::default();
        dirty.mark(Field::Info);
        memo.observe(dirty);
        assert!(!memo.refresh(|| {
            calls.set(calls.get() + 1);
            8
        }));
        assert_eq!(calls.get(), 1);

        dirty.mark(Field::Members);
        memo.observe(dirty);
        assert!(memo.refresh(|| {
            calls.set(calls.get() + 1);
            8
        }));
        assert_eq!(calls.get(), 2);
        assert_eq!(memo.get(), Some(&8));
    }

    #[test]
    fn test_unchanged_recompute_reports_no_change() {
        let mut memo: Memo<&str> = Memo::new(&[Field::Cameras]);
        memo.refresh(|| "same");

        let mut dirty = DirtySet::default();
        dirty.mark(Field::Cameras);
        memo.observe(dirty);

        assert!(memo.is_stale());
        assert!(!memo.refresh(|| "same"));
        assert!(!memo.is_stale());
    }
}
