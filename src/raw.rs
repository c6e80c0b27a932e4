//! Handles the actual accounting of reference-counted pairs.
//!
//! A raw handle is a non-null `(pointee, header)` pair; emptiness is modelled one level
//! up, by the public types. Strong handles drive the pointee's lifetime, weak handles the
//! block's.

use core::{marker::PhantomData, mem::ManuallyDrop, ptr::NonNull};

use crate::block::Header;
use crate::count::Count;

/// Generic reference-counted raw handle, equivalent to a strong reference.
pub(crate) struct RawShared<T, C>
where
    T: ?Sized,
    C: Count,
{
    ptr: NonNull<T>,
    header: NonNull<Header<C>>,
    _owns: PhantomData<T>,
}

/// Generic reference-counted raw handle, equivalent to a weak reference.
pub(crate) struct RawWeak<T, C>
where
    T: ?Sized,
    C: Count,
{
    ptr: NonNull<T>,
    header: NonNull<Header<C>>,
    _marker: PhantomData<T>,
}

//
//  Construction
//

impl<T, C> RawShared<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Constructs an instance from a pointee pointer and its control-block header.
    ///
    /// #   Safety
    ///
    /// -   Accounted: the pair's strong count includes the reference this instance
    ///     embodies.
    /// -   Matching: `ptr` is the pointee managed by `header`'s block.
    #[inline(always)]
    pub(crate) unsafe fn from_parts(ptr: NonNull<T>, header: NonNull<Header<C>>) -> Self {
        let _owns = PhantomData;

        Self { ptr, header, _owns }
    }

    /// Deconstructs the instance without releasing its reference.
    #[inline(always)]
    pub(crate) fn into_parts(self) -> (NonNull<T>, NonNull<Header<C>>) {
        let this = ManuallyDrop::new(self);

        (this.ptr, this.header)
    }

    /// Constructs a new weak raw handle to this allocation.
    #[inline(always)]
    pub(crate) fn downgrade(this: &Self) -> RawWeak<T, C> {
        //  Safety:
        //  -   Accounting: the number of weak handles is increased by one.
        unsafe { this.count().increment_weak() };

        RawWeak {
            ptr: this.ptr,
            header: this.header,
            _marker: PhantomData,
        }
    }
}

impl<T, C> RawWeak<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Attempts to upgrade to a strong raw handle.
    ///
    /// Returns `None` if the pointee has already been dropped. On success, the strong
    /// count already accounts for the returned handle.
    #[inline(always)]
    pub(crate) fn upgrade(this: &Self) -> Option<RawShared<T, C>> {
        //  Safety:
        //  -   Accounting: the number of strong handles is increased by one on success.
        let upgraded = unsafe { this.count().try_increment_strong() };

        upgraded.then(|| RawShared {
            ptr: this.ptr,
            header: this.header,
            _owns: PhantomData,
        })
    }
}

//
//  Destruction
//

impl<T, C> Drop for RawShared<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn drop(&mut self) {
        debug_assert!(self.count().strong() > 0);

        let header = self.header;

        //  Safety:
        //  -   Alive: the pointee has been alive until now, since the strong count was > 0.
        //  -   EndOfLife: the pointee will no longer be accessed, since this was the last
        //      strong handle.
        let destroy = move || unsafe { Header::destroy(header) };

        //  Safety:
        //  -   Destroyed: the count invokes `discard` only after `destroy`.
        //  -   EndOfLife: the block will no longer be accessed, since this was the last
        //      handle.
        let discard = move || unsafe { Header::discard(header) };

        //  Safety:
        //  -   Accounting: one less strong handle exists after this call.
        unsafe { self.count().decrement_strong(destroy, discard) };
    }
}

impl<T, C> Drop for RawWeak<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn drop(&mut self) {
        debug_assert!(self.count().weak() > 0);

        let header = self.header;

        //  Safety:
        //  -   Destroyed: the count invokes `discard` only once strong & weak are both 0.
        //  -   EndOfLife: the block will no longer be accessed, since this was the last
        //      handle.
        let discard = move || unsafe { Header::discard(header) };

        //  Safety:
        //  -   Accounting: one less weak handle exists after this call.
        unsafe { self.count().decrement_weak(discard) };
    }
}

//
//  Clone
//

impl<T, C> Clone for RawShared<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn clone(&self) -> Self {
        //  Safety:
        //  -   Accounting: the number of strong handles is increased by one.
        unsafe { self.count().increment_strong() };

        Self {
            ptr: self.ptr,
            header: self.header,
            _owns: PhantomData,
        }
    }
}

impl<T, C> Clone for RawWeak<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn clone(&self) -> Self {
        //  Safety:
        //  -   Accounting: the number of weak handles is increased by one.
        unsafe { self.count().increment_weak() };

        Self {
            ptr: self.ptr,
            header: self.header,
            _marker: PhantomData,
        }
    }
}

//
//  Access
//

impl<T, C> RawShared<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Returns the pointee pointer.
    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Returns the control-block header pointer.
    #[inline(always)]
    pub(crate) fn header(&self) -> NonNull<Header<C>> {
        self.header
    }

    /// Returns the number of strong handles.
    #[inline(always)]
    pub(crate) fn strong_count(&self) -> usize {
        self.count().strong()
    }

    /// Returns the number of weak handles, + 1 for the strong group.
    #[inline(always)]
    pub(crate) fn weak_count(&self) -> usize {
        self.count().weak()
    }

    /// Returns whether this is the one strong handle, with no weak handle extant.
    #[inline(always)]
    pub(crate) fn is_unique(&self) -> bool {
        self.count().is_unique()
    }

    //  Safety of the reference: this handle keeps the block alive for as long as it is
    //  borrowed.
    fn count(&self) -> &C {
        //  Safety:
        //  -   Alive: per this handle's existence.
        unsafe { self.header.as_ref() }.count()
    }
}

impl<T, C> RawWeak<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Returns the pointee pointer.
    ///
    /// The pointee may already have been dropped; the pointer must not be dereferenced
    /// without upgrading first.
    #[inline(always)]
    pub(crate) fn as_ptr(&self) -> NonNull<T> {
        self.ptr
    }

    /// Returns the control-block header pointer.
    #[inline(always)]
    pub(crate) fn header(&self) -> NonNull<Header<C>> {
        self.header
    }

    /// Returns the number of strong handles.
    #[inline(always)]
    pub(crate) fn strong_count(&self) -> usize {
        self.count().strong()
    }

    /// Returns the number of weak handles, + 1 if any strong handle is alive.
    #[inline(always)]
    pub(crate) fn weak_count(&self) -> usize {
        self.count().weak()
    }

    //  Safety of the reference: this handle keeps the block alive for as long as it is
    //  borrowed.
    fn count(&self) -> &C {
        //  Safety:
        //  -   Alive: per this handle's existence.
        unsafe { self.header.as_ref() }.count()
    }
}
