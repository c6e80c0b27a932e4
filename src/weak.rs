//! The non-owning observer handle.
//!
//! A `Weak` does not keep its pointee alive; it keeps the control block alive, so that it
//! may always be asked whether the pointee still exists. Promotion back to a strong
//! handle, `upgrade`, succeeds only while some strong handle survives: once the strong
//! count has reached 0 the pointee is gone, for good.

use core::{fmt, ptr::NonNull};

use crate::count::{Count, Local};
use crate::raw::RawWeak;
use crate::shared::Shared;

/// A non-owning observer handle, generic over its thread-safety policy.
///
/// Obtained from `Shared::downgrade`; the policy must match the originating `Shared`'s.
pub struct Weak<T, C = Local>
where
    T: ?Sized,
    C: Count,
{
    inner: Option<RawWeak<T, C>>,
}

//
//  Construction
//

impl<T, C> Weak<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Constructs an empty handle, observing nothing.
    ///
    /// Upgrading an empty handle always fails.
    #[inline(always)]
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    #[inline(always)]
    pub(crate) fn from_inner(inner: Option<RawWeak<T, C>>) -> Self {
        Self { inner }
    }

    /// Attempts to promote to a `Shared` handle.
    ///
    /// Returns `None` if the pointee has already been dropped, or if this handle is
    /// empty. On success, the returned handle's strong reference is already accounted
    /// for.
    pub fn upgrade(this: &Self) -> Option<Shared<T, C>> {
        let raw = this.inner.as_ref()?;

        RawWeak::upgrade(raw).map(|raw| Shared::from_inner(Some(raw)))
    }

    /// Releases the observed reference, if any, leaving the handle empty.
    ///
    /// If this was the last handle of either kind, the control block is freed.
    #[inline(always)]
    pub fn reset(this: &mut Self) {
        this.inner = None;
    }
}

//
//  High-level Access
//

impl<T, C> Weak<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Returns whether the handle observes a control block.
    ///
    /// Observing a block says nothing of the pointee: it may already have been dropped.
    #[inline(always)]
    pub fn is_observing(this: &Self) -> bool {
        this.inner.is_some()
    }

    /// Returns the number of strong handles sharing the control block, 0 if empty.
    ///
    /// Under `Atomic`, the value may be stale by the time it is observed; a nonzero read
    /// is no promise that `upgrade` will succeed.
    #[inline(always)]
    pub fn strong_count(this: &Self) -> usize {
        this.inner.as_ref().map_or(0, RawWeak::strong_count)
    }

    /// Returns the number of weak handles, + 1 if any strong handle is alive, 0 if empty.
    ///
    /// Under `Atomic`, the value may be stale by the time it is observed.
    #[inline(always)]
    pub fn weak_count(this: &Self) -> usize {
        this.inner.as_ref().map_or(0, RawWeak::weak_count)
    }

    /// Returns whether the two handles observe the same control block.
    ///
    /// Two empty handles compare equal.
    pub fn ptr_eq(this: &Self, other: &Self) -> bool {
        match (&this.inner, &other.inner) {
            (Some(a), Some(b)) => a.header() == b.header(),
            (None, None) => true,
            _ => false,
        }
    }
}

//
//  Low-level Access
//

impl<T, C> Weak<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Returns the pointee pointer, `None` if the handle is empty.
    ///
    /// The pointee may already have been dropped; the pointer must not be dereferenced.
    /// Upgrade instead.
    #[inline(always)]
    pub fn as_non_null(this: &Self) -> Option<NonNull<T>> {
        this.inner.as_ref().map(RawWeak::as_ptr)
    }
}

//
//  Clone
//

impl<T, C> Clone for Weak<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

//
//  Conversion
//

impl<T, C> From<&Shared<T, C>> for Weak<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn from(shared: &Shared<T, C>) -> Self {
        Shared::downgrade(shared)
    }
}

//
//  Formatting
//

impl<T, C> fmt::Debug for Weak<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        f.write_str("(Weak)")
    }
}

//
//  Markers
//

impl<T, C> Default for Weak<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn default() -> Self {
        Self::empty()
    }
}

//  Safety: as Weak of Arc; the count policy gates cross-thread use, `Local` being `!Sync`.
unsafe impl<T, C> Send for Weak<T, C>
where
    T: ?Sized + Send + Sync,
    C: Count + Sync,
{
}

//  Safety: as Weak of Arc; the count policy gates cross-thread use, `Local` being `!Sync`.
unsafe impl<T, C> Sync for Weak<T, C>
where
    T: ?Sized + Send + Sync,
    C: Count + Sync,
{
}

// mod tests
