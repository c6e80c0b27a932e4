//! Reference-count policies.
//!
//! A single control-block algorithm is written once, generic over a counter capability,
//! and instantiated with either of two policies:
//!
//! -   `Local`: plain cells, no synchronization, single-threaded use only.
//! -   `Atomic`: atomic cells, safe to manipulate from multiple threads.
//!
//! The policy is part of the handle types: `Shared<T, Local>` and `Shared<T, Atomic>` are
//! distinct, non-interconvertible types.

use core::{
    cell::Cell,
    mem::ManuallyDrop,
    sync::atomic::{self, AtomicUsize, Ordering},
};

/// A reference count with a strong and a weak count.
///
/// The strong count represents the number of strong handles to the pointee. The pointee is
/// dropped (in place) when the strong count reaches 0.
///
/// The weak count represents the number of weak handles to the memory block, + 1 if any
/// strong handle exists. The memory block is deallocated when the weak count reaches 0.
///
/// #   Safety
///
/// -   Accounting: the strong & weak counts are properly maintained, and the appropriate
///     operations (drop, deallocate) are invoked exactly once, at the appropriate time.
pub unsafe trait Count: Sized {
    /// Constructs a fresh count.
    ///
    /// A freshly constructed count has a strong & weak count of exactly 1.
    fn new() -> Self;

    /// Returns the strong count, ie the number of strong handles.
    ///
    /// Under `Atomic`, the value may be stale by the time it is observed; it is suitable
    /// for diagnostics, not for driving control decisions.
    fn strong(&self) -> usize;

    /// Returns the weak count, ie the number of weak handles + 1 if any strong handle
    /// exists.
    ///
    /// Under `Atomic`, the value may be stale by the time it is observed.
    fn weak(&self) -> usize;

    /// Returns whether exactly one strong handle and no weak handle exist.
    ///
    /// Unlike `strong` and `weak`, this read synchronizes with prior releases, and may
    /// therefore gate exclusive access when the caller holds the one strong handle
    /// exclusively.
    fn is_unique(&self) -> bool;

    /// Increments the strong count.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the incremented count faithfully
    ///     represents the number of strong handles.
    unsafe fn increment_strong(&self);

    /// Tries to increment the strong count, unless it is already zero.
    ///
    /// Returns whether the increment succeeded. Once the strong count has reached 0 the
    /// pointee has been dropped, and this operation fails forever after.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the incremented count faithfully
    ///     represents the number of strong handles on success.
    unsafe fn try_increment_strong(&self) -> bool;

    /// Decrements the strong count.
    ///
    /// The caller observing the 1 -> 0 transition invokes `drop`, then, if the weak count
    /// also reached 0, `deallocate`. No other caller invokes either.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the decremented count faithfully
    ///     represents the number of strong handles.
    unsafe fn decrement_strong<D, DA>(&self, drop: D, deallocate: DA)
    where
        D: FnOnce(),
        DA: FnOnce();

    /// Increments the weak count.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the incremented count faithfully
    ///     represents the number of weak handles.
    unsafe fn increment_weak(&self);

    /// Decrements the weak count.
    ///
    /// The caller observing the 1 -> 0 transition invokes `deallocate`; by then the strong
    /// count is 0 and the pointee has already been dropped.
    ///
    /// #   Safety
    ///
    /// -   Accounting: the caller guarantees that the decremented count faithfully
    ///     represents the number of weak handles.
    unsafe fn decrement_weak<DA>(&self, deallocate: DA)
    where
        DA: FnOnce();
}

//
//  Single-threaded policy.
//

/// Plain strong & weak counts, without synchronization.
///
/// Handles over this policy are neither `Send` nor `Sync`: the counts may only ever be
/// manipulated from the thread which created the first handle.
#[derive(Debug)]
pub struct Local {
    strong: Cell<usize>,
    weak: Cell<usize>,
}

impl Local {
    //  Safety:
    //  -   Accounting: should only be invoked when `self.strong` reaches 0.
    #[inline(never)]
    unsafe fn drop<D, DA>(&self, drop: D, deallocate: DA)
    where
        D: FnOnce(),
        DA: FnOnce(),
    {
        //  The strong handles, as a group, hold a single weak claim; the last strong
        //  handle releases it here.
        let weak = self.weak.get() - 1;

        if weak > 0 {
            self.weak.set(weak);
        }

        let _guard = (weak == 0).then(move || DropGuard(ManuallyDrop::new(deallocate)));

        drop();
    }
}

//  Safety:
//  -   Accounting: properly counted.
unsafe impl Count for Local {
    #[inline(always)]
    fn new() -> Self {
        let strong = Cell::new(1);
        let weak = Cell::new(1);

        Self { strong, weak }
    }

    #[inline(always)]
    fn strong(&self) -> usize {
        self.strong.get()
    }

    #[inline(always)]
    fn weak(&self) -> usize {
        self.weak.get()
    }

    #[inline(always)]
    fn is_unique(&self) -> bool {
        self.strong.get() == 1 && self.weak.get() == 1
    }

    #[inline(always)]
    unsafe fn increment_strong(&self) {
        self.strong.set(self.strong.get() + 1);
    }

    #[inline(always)]
    unsafe fn try_increment_strong(&self) -> bool {
        let strong = self.strong.get();

        if strong == 0 {
            return false;
        }

        self.strong.set(strong + 1);

        true
    }

    #[inline]
    unsafe fn decrement_strong<D, DA>(&self, drop: D, deallocate: DA)
    where
        D: FnOnce(),
        DA: FnOnce(),
    {
        let strong = self.strong.get() - 1;
        self.strong.set(strong);

        if strong > 0 {
            return;
        }

        //  Safety:
        //  -   Accounting: strong count reached 0.
        unsafe { self.drop(drop, deallocate) };
    }

    #[inline(always)]
    unsafe fn increment_weak(&self) {
        self.weak.set(self.weak.get() + 1);
    }

    #[inline]
    unsafe fn decrement_weak<DA>(&self, deallocate: DA)
    where
        DA: FnOnce(),
    {
        let weak = self.weak.get() - 1;

        if weak > 0 {
            self.weak.set(weak);
            return;
        }

        deallocate();
    }
}

//
//  Multi-threaded policy.
//

/// Atomic strong & weak counts.
///
/// Handles over this policy may be sent to and manipulated from multiple threads; exactly
/// one of any set of concurrent final releases observes the transition to 0 and performs
/// the corresponding drop or deallocation.
#[derive(Debug)]
pub struct Atomic {
    strong: AtomicUsize,
    weak: AtomicUsize,
}

impl Atomic {
    //  Safety:
    //  -   Accounting: should only be invoked when `self.strong` reaches 0.
    #[inline(never)]
    unsafe fn drop<D, DA>(&self, drop: D, deallocate: DA)
    where
        D: FnOnce(),
        DA: FnOnce(),
    {
        //  Release is necessary so that all reads/writes on the count are done before
        //  entering `fetch_sub`, in order to avoid a data-race with the deallocation being
        //  invoked on another thread.
        let weak = self.weak.fetch_sub(1, Ordering::Release) - 1;

        //  Atomic - Fence synchronization, so that all reads/writes on the pointee do not
        //  start prior to this point, in order to avoid a data-race with reads/writes
        //  pre-sub on another thread.

        //  The fence by itself is insufficient, a prior load on the atomic object which
        //  was written to with the Release memory ordering is required. Fortunately,
        //  `fetch_sub` counts as a load too.
        atomic::fence(Ordering::Acquire);

        let _guard = (weak == 0).then(move || DropGuard(ManuallyDrop::new(deallocate)));

        drop();
    }

    //  Safety:
    //  -   Accounting: should only be invoked when `self.weak` reaches 0.
    #[inline(never)]
    unsafe fn deallocate<DA>(&self, deallocate: DA)
    where
        DA: FnOnce(),
    {
        //  Atomic - Fence synchronization, so that the deallocation does not start prior
        //  to this point, in order to avoid a data-race with reads/writes pre-sub on
        //  another thread.

        //  The fence by itself is insufficient, a prior load on the atomic object which
        //  was written to with the Release memory ordering is required. Fortunately,
        //  `fetch_sub` counts as a load too.
        atomic::fence(Ordering::Acquire);

        deallocate();
    }
}

//  Safety:
//  -   Accounting: properly counted.
unsafe impl Count for Atomic {
    #[inline(always)]
    fn new() -> Self {
        let strong = AtomicUsize::new(1);
        let weak = AtomicUsize::new(1);

        Self { strong, weak }
    }

    #[inline(always)]
    fn strong(&self) -> usize {
        self.strong.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn weak(&self) -> usize {
        self.weak.load(Ordering::Relaxed)
    }

    #[inline(always)]
    fn is_unique(&self) -> bool {
        //  Acquire on both loads, to synchronize with the Release decrements of handles
        //  released on other threads: if both counts are observed at 1, the observer holds
        //  the one remaining handle, and every other handle's release happens-before.
        self.strong.load(Ordering::Acquire) == 1 && self.weak.load(Ordering::Acquire) == 1
    }

    #[inline(always)]
    unsafe fn increment_strong(&self) {
        self.strong.fetch_add(1, Ordering::Relaxed);
    }

    #[inline(always)]
    unsafe fn try_increment_strong(&self) -> bool {
        let mut current = self.strong.load(Ordering::Relaxed);

        //  Once `strong` has dropped to 0, the pointee has been dropped, there's no
        //  recovering it, ever.
        while current > 0 {
            //  Ordering:
            //  -   On success, Acquire synchronizes with the Release decrement of the
            //      strong handles released on other threads.
            //  -   On failure, nothing happens.
            let result = self
                .strong
                .compare_exchange_weak(current, current + 1, Ordering::Acquire, Ordering::Relaxed);

            match result {
                Ok(_) => return true,
                Err(new) => current = new,
            }
        }

        false
    }

    #[inline]
    unsafe fn decrement_strong<D, DA>(&self, drop: D, deallocate: DA)
    where
        D: FnOnce(),
        DA: FnOnce(),
    {
        //  Release is necessary so that all reads/writes on the pointee are done before
        //  entering `fetch_sub`, in order to avoid a data-race with the drop logic being
        //  invoked on another thread.
        let strong = self.strong.fetch_sub(1, Ordering::Release) - 1;

        if strong > 0 {
            return;
        }

        //  Safety:
        //  -   Accounting: strong count reached 0.
        unsafe { self.drop(drop, deallocate) };
    }

    #[inline(always)]
    unsafe fn increment_weak(&self) {
        self.weak.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    unsafe fn decrement_weak<DA>(&self, deallocate: DA)
    where
        DA: FnOnce(),
    {
        //  Release is necessary so that all reads/writes on the count are done before
        //  entering `fetch_sub`, in order to avoid a data-race with the deallocation being
        //  invoked on another thread.
        let weak = self.weak.fetch_sub(1, Ordering::Release) - 1;

        if weak > 0 {
            return;
        }

        //  Safety:
        //  -   Accounting: weak count reached 0.
        unsafe { self.deallocate(deallocate) };
    }
}

//
//  Implementation
//

struct DropGuard<DA>(ManuallyDrop<DA>)
where
    DA: FnOnce();

impl<DA> Drop for DropGuard<DA>
where
    DA: FnOnce(),
{
    fn drop(&mut self) {
        //  Safety:
        //  -   EndOfLife: last use.
        let deallocate = unsafe { ManuallyDrop::take(&mut self.0) };

        deallocate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_counts() {
        fn check<C: Count>() {
            let count = C::new();

            assert_eq!(1, count.strong());
            assert_eq!(1, count.weak());
            assert!(count.is_unique());
        }

        check::<Local>();
        check::<Atomic>();
    }

    #[test]
    fn strong_lifecycle() {
        fn check<C: Count>() {
            let count = C::new();

            //  Safety: counts tracked by hand below.
            unsafe {
                count.increment_strong();

                assert_eq!(2, count.strong());

                let mut dropped = false;
                let mut deallocated = false;

                count.decrement_strong(|| dropped = true, || deallocated = true);

                assert!(!dropped);
                assert!(!deallocated);

                count.decrement_strong(|| dropped = true, || deallocated = true);

                assert!(dropped);
                assert!(deallocated);
            }
        }

        check::<Local>();
        check::<Atomic>();
    }

    #[test]
    fn resurrection_denied() {
        fn check<C: Count>() {
            let count = C::new();

            //  Safety: counts tracked by hand below.
            unsafe {
                count.increment_weak();

                assert!(count.try_increment_strong());

                count.decrement_strong(|| (), || ());
                count.decrement_strong(|| (), || ());

                assert_eq!(0, count.strong());
                assert!(!count.try_increment_strong());
                assert!(!count.try_increment_strong());

                let mut deallocated = false;

                count.decrement_weak(|| deallocated = true);

                assert!(deallocated);
            }
        }

        check::<Local>();
        check::<Atomic>();
    }

    #[test]
    fn deallocate_runs_even_if_drop_panics() {
        use std::panic::{self, AssertUnwindSafe};

        let count = Local::new();
        let mut deallocated = false;

        //  Safety: counts tracked by hand.
        let result = panic::catch_unwind(AssertUnwindSafe(|| unsafe {
            count.decrement_strong(|| panic!("pointee"), || deallocated = true);
        }));

        assert!(result.is_err());
        assert!(deallocated);
    }
} // mod tests
