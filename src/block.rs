//! Control blocks: the sole authority over pointee and block lifetime.
//!
//! A control block couples the reference counts with two type-erased operations, captured
//! once at creation:
//!
//! -   `destroy`: drops the pointee; runs exactly once, when the strong count reaches 0.
//! -   `discard`: releases the control block's memory; runs exactly once, when the weak
//!     count reaches 0, necessarily after `destroy`.
//!
//! Three block flavors exist behind the same header:
//!
//! -   `InlineBlock`: header, value, and allocator in a single allocation.
//! -   `SliceBlock`: header, length, allocator, and trailing element storage in a single
//!     allocation.
//! -   `OwnedBlock`: header plus an adopted pointer to a separately allocated pointee.
//!
//! Erasure makes handle conversions free: a handle may change its pointee type (array to
//! slice, concrete to trait object) without the control block noticing.

use core::{
    alloc::{Layout, LayoutError},
    marker::PhantomData,
    mem::ManuallyDrop,
    ptr::{self, addr_of_mut, NonNull},
};

use alloc::boxed::Box;

use allocator_api2::alloc::{AllocError, Allocator, Global};

use crate::count::Count;

/// The header shared by all control-block flavors.
///
/// Blocks are `#[repr(C)]` with the header first, so the erased operations can recover
/// their concrete block type from the header pointer alone.
pub(crate) struct Header<C> {
    count: C,
    destroy: unsafe fn(NonNull<Header<C>>),
    discard: unsafe fn(NonNull<Header<C>>),
}

impl<C: Count> Header<C> {
    /// Returns the counts.
    #[inline(always)]
    pub(crate) fn count(&self) -> &C {
        &self.count
    }

    /// Destroys the pointee.
    ///
    /// #   Safety
    ///
    /// -   Alive: the pointee has not been destroyed yet.
    /// -   EndOfLife: the strong count reached 0; the pointee will never be accessed again.
    #[inline(always)]
    pub(crate) unsafe fn destroy(this: NonNull<Header<C>>) {
        //  Safety:
        //  -   Suitable: `destroy` was instantiated for this block's concrete type.
        unsafe { (this.as_ref().destroy)(this) }
    }

    /// Releases the control block's memory.
    ///
    /// #   Safety
    ///
    /// -   Destroyed: `destroy` has already run.
    /// -   EndOfLife: the weak count reached 0; the block will never be accessed again.
    #[inline(always)]
    pub(crate) unsafe fn discard(this: NonNull<Header<C>>) {
        //  Safety:
        //  -   Suitable: `discard` was instantiated for this block's concrete type.
        unsafe { (this.as_ref().discard)(this) }
    }

    /// Replaces the destroy operation.
    ///
    /// #   Safety
    ///
    /// -   Exclusive: the caller holds the only strong handle, and no other thread
    ///     manipulates this block's operations concurrently.
    /// -   Suitable: `destroy` is valid for this block's concrete flavor and layout.
    pub(crate) unsafe fn set_destroy(this: NonNull<Header<C>>, destroy: unsafe fn(NonNull<Header<C>>)) {
        //  Safety:
        //  -   Exclusive: as per pre-condition.
        unsafe { addr_of_mut!((*this.as_ptr()).destroy).write(destroy) };
    }
}

//
//  Inline blocks
//

//  The value offset must not depend on the allocator type, as `destroy_inline` is erased
//  down to `(T, C)`; the prefix carries everything it touches.
#[repr(C)]
pub(crate) struct InlinePrefix<T, C> {
    header: Header<C>,
    value: ManuallyDrop<T>,
}

/// Header, value, and allocator, in one allocation.
#[repr(C)]
pub(crate) struct InlineBlock<T, C, A> {
    prefix: InlinePrefix<T, C>,
    allocator: ManuallyDrop<A>,
}

impl<T, C: Count, A: Allocator> InlineBlock<T, C, A> {
    /// Attempts to allocate a block, and moves `value` and `allocator` in.
    ///
    /// Returns the header and a pointer to the value.
    pub(crate) fn try_new(value: T, allocator: A) -> Result<(NonNull<Header<C>>, NonNull<T>), AllocError> {
        let layout = Layout::new::<Self>();

        let raw = allocator.allocate(layout)?.cast::<Self>();

        //  Safety:
        //  -   Suitable: freshly allocated for `Self`.
        unsafe {
            addr_of_mut!((*raw.as_ptr()).prefix.header).write(Header {
                count: C::new(),
                destroy: destroy_inline::<T, C>,
                discard: discard_inline::<T, C, A>,
            });
            addr_of_mut!((*raw.as_ptr()).prefix.value).write(ManuallyDrop::new(value));
            addr_of_mut!((*raw.as_ptr()).allocator).write(ManuallyDrop::new(allocator));
        }

        //  Safety:
        //  -   NonNull: derived from `raw`.
        let value = unsafe { NonNull::new_unchecked(addr_of_mut!((*raw.as_ptr()).prefix.value)).cast::<T>() };

        Ok((raw.cast::<Header<C>>(), value))
    }
}

//  Safety:
//  -   Suitable: `header` heads an `InlineBlock<T, C, _>`; the value offset is independent
//      of the allocator parameter.
unsafe fn destroy_inline<T, C>(header: NonNull<Header<C>>) {
    let prefix = header.cast::<InlinePrefix<T, C>>();

    //  Safety:
    //  -   Alive & EndOfLife: as per `Header::destroy` pre-conditions.
    unsafe { ManuallyDrop::drop(&mut (*prefix.as_ptr()).value) };
}

//  Safety:
//  -   Suitable: `header` heads an `InlineBlock<T, C, A>`.
unsafe fn discard_inline<T, C, A: Allocator>(header: NonNull<Header<C>>) {
    let block = header.cast::<InlineBlock<T, C, A>>();

    //  Move the allocator out before releasing the memory holding it.
    //
    //  Safety:
    //  -   EndOfLife: as per `Header::discard` pre-conditions.
    let allocator = unsafe { ManuallyDrop::take(&mut (*block.as_ptr()).allocator) };

    //  Safety:
    //  -   SameAllocator: `block` was allocated by `allocator`.
    //  -   FitLayout: `block` was allocated with this very layout.
    unsafe { allocator.deallocate(block.cast::<u8>(), Layout::new::<InlineBlock<T, C, A>>()) };
}

//
//  Slice blocks
//

//  Everything `destroy_slice` touches lives in the allocator-independent prefix; the data
//  offset is stored because it does depend on the allocator's layout.
#[repr(C)]
pub(crate) struct SlicePrefix<C> {
    header: Header<C>,
    len: usize,
    data_offset: usize,
}

/// Header, length, allocator, and trailing element storage, in one allocation.
#[repr(C)]
pub(crate) struct SliceBlock<T, C, A> {
    prefix: SlicePrefix<C>,
    allocator: ManuallyDrop<A>,
    _elements: PhantomData<T>,
}

impl<T, C: Count, A: Allocator> SliceBlock<T, C, A> {
    /// Attempts to allocate a block with storage for `len` elements, left uninitialized,
    /// and moves `allocator` in.
    ///
    /// Returns the header and a pointer to the first element slot.
    pub(crate) fn try_new(len: usize, allocator: A) -> Result<(NonNull<Header<C>>, NonNull<T>), AllocError> {
        let (layout, data_offset) = Self::layout(len).map_err(|_| AllocError)?;

        let raw = allocator.allocate(layout)?.cast::<Self>();

        //  Safety:
        //  -   Suitable: freshly allocated for `Self` + `len` trailing elements.
        unsafe {
            addr_of_mut!((*raw.as_ptr()).prefix.header).write(Header {
                count: C::new(),
                destroy: destroy_slice::<T, C>,
                discard: discard_slice::<T, C, A>,
            });
            addr_of_mut!((*raw.as_ptr()).prefix.len).write(len);
            addr_of_mut!((*raw.as_ptr()).prefix.data_offset).write(data_offset);
            addr_of_mut!((*raw.as_ptr()).allocator).write(ManuallyDrop::new(allocator));
        }

        //  Safety:
        //  -   InBounds: `data_offset` lies within the allocation, per `Self::layout`.
        let data = unsafe { NonNull::new_unchecked(raw.as_ptr().cast::<u8>().add(data_offset).cast::<T>()) };

        Ok((raw.cast::<Header<C>>(), data))
    }

    fn layout(len: usize) -> Result<(Layout, usize), LayoutError> {
        let (block, data_offset) = Layout::new::<Self>().extend(Layout::array::<T>(len)?)?;

        Ok((block.pad_to_align(), data_offset))
    }
}

/// Returns the destroy operation of a slice block over initialized `T`s.
///
/// Used to re-target a block allocated over `MaybeUninit<T>` once its elements have been
/// initialized; the two instantiations share their layout.
pub(crate) fn slice_destroy<T, C: Count>() -> unsafe fn(NonNull<Header<C>>) {
    destroy_slice::<T, C>
}

//  Safety:
//  -   Suitable: `header` heads a `SliceBlock<T, C, _>` whose elements are initialized.
unsafe fn destroy_slice<T, C>(header: NonNull<Header<C>>) {
    let prefix = header.cast::<SlicePrefix<C>>();

    //  Safety:
    //  -   Suitable: as per pre-condition.
    let (len, data_offset) = unsafe { ((*prefix.as_ptr()).len, (*prefix.as_ptr()).data_offset) };

    let data = unsafe { header.as_ptr().cast::<u8>().add(data_offset).cast::<T>() };

    //  Safety:
    //  -   Alive & EndOfLife: as per `Header::destroy` pre-conditions.
    unsafe { ptr::drop_in_place(ptr::slice_from_raw_parts_mut(data, len)) };
}

//  Safety:
//  -   Suitable: `header` heads a `SliceBlock<T, C, A>`.
unsafe fn discard_slice<T, C: Count, A: Allocator>(header: NonNull<Header<C>>) {
    let block = header.cast::<SliceBlock<T, C, A>>();

    //  Safety:
    //  -   Suitable: as per pre-condition.
    let len = unsafe { (*block.as_ptr()).prefix.len };

    //  Move the allocator out before releasing the memory holding it.
    //
    //  Safety:
    //  -   EndOfLife: as per `Header::discard` pre-conditions.
    let allocator = unsafe { ManuallyDrop::take(&mut (*block.as_ptr()).allocator) };

    let Ok((layout, _)) = SliceBlock::<T, C, A>::layout(len) else {
        //  Succeeded with the same inputs when the block was allocated.
        unreachable!()
    };

    //  Safety:
    //  -   SameAllocator: `block` was allocated by `allocator`.
    //  -   FitLayout: `block` was allocated with this very layout.
    unsafe { allocator.deallocate(block.cast::<u8>(), layout) };
}

//
//  Owned blocks
//

/// Header plus an adopted pointer to a separately allocated pointee.
///
/// The pointee must originate from the global allocator (a `Box`); destroying it
/// reconstitutes the `Box`, which both drops the value and releases its allocation.
#[repr(C)]
pub(crate) struct OwnedBlock<T: ?Sized, C> {
    header: Header<C>,
    pointee: NonNull<T>,
}

impl<T: ?Sized, C: Count> OwnedBlock<T, C> {
    /// Attempts to allocate a block adopting `pointee`.
    ///
    /// #   Safety
    ///
    /// -   Owned: `pointee` was obtained from `Box::into_raw`, and ownership transfers to
    ///     the block.
    pub(crate) unsafe fn try_new(pointee: NonNull<T>) -> Result<NonNull<Header<C>>, AllocError> {
        let layout = Layout::new::<Self>();

        let raw = Global.allocate(layout)?.cast::<Self>();

        //  Safety:
        //  -   Suitable: freshly allocated for `Self`.
        unsafe {
            addr_of_mut!((*raw.as_ptr()).header).write(Header {
                count: C::new(),
                destroy: destroy_owned::<T, C>,
                discard: discard_owned::<T, C>,
            });
            addr_of_mut!((*raw.as_ptr()).pointee).write(pointee);
        }

        Ok(raw.cast::<Header<C>>())
    }
}

//  Safety:
//  -   Suitable: `header` heads an `OwnedBlock<T, C>` adopting a `Box`-allocated pointee.
unsafe fn destroy_owned<T: ?Sized, C>(header: NonNull<Header<C>>) {
    let block = header.cast::<OwnedBlock<T, C>>();

    //  Safety:
    //  -   Suitable: as per pre-condition.
    let pointee = unsafe { (*block.as_ptr()).pointee };

    //  Safety:
    //  -   Owned: adopted from `Box::into_raw` at block creation.
    //  -   Alive & EndOfLife: as per `Header::destroy` pre-conditions.
    drop(unsafe { Box::from_raw(pointee.as_ptr()) });
}

//  Safety:
//  -   Suitable: `header` heads an `OwnedBlock<T, C>`.
unsafe fn discard_owned<T: ?Sized, C>(header: NonNull<Header<C>>) {
    let block = header.cast::<OwnedBlock<T, C>>();

    //  Safety:
    //  -   SameAllocator: `block` was allocated by `Global`.
    //  -   FitLayout: `block` was allocated with this very layout.
    unsafe { Global.deallocate(block.cast::<u8>(), Layout::new::<OwnedBlock<T, C>>()) };
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::count::Local;

    #[test]
    fn slice_layout_offsets() {
        let (layout, data_offset) =
            SliceBlock::<u64, Local, Global>::layout(3).expect("small layout");

        assert_eq!(0, data_offset % core::mem::align_of::<u64>());
        assert!(layout.size() >= data_offset + 3 * core::mem::size_of::<u64>());
        assert!(layout.align() >= core::mem::align_of::<u64>());
    }

    #[test]
    fn slice_layout_uninit_invariance() {
        use core::mem::MaybeUninit;

        let init = SliceBlock::<u64, Local, Global>::layout(5).expect("small layout");
        let uninit = SliceBlock::<MaybeUninit<u64>, Local, Global>::layout(5).expect("small layout");

        assert_eq!(init, uninit);
    }

    #[test]
    fn slice_layout_overflow() {
        assert!(SliceBlock::<u64, Local, Global>::layout(usize::MAX / 4).is_err());
    }
} // mod tests
