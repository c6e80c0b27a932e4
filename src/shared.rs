//! The strong owning handle.
//!
//! A `Shared` keeps its pointee alive: the pointee is dropped when the last `Shared`
//! referencing its control block is released, regardless of surviving `Weak` handles.
//!
//! Unlike `Rc` and `Arc`, a `Shared` may be empty: default construction yields a handle
//! owning nothing, and `reset` returns a handle to that state.

use core::{
    cmp, convert, fmt, hash,
    mem::{ManuallyDrop, MaybeUninit},
    ops,
    ptr::{self, NonNull},
};

use alloc::boxed::Box;

use allocator_api2::alloc::{AllocError, Allocator, Global};

use crate::block::{self, Header, InlineBlock, OwnedBlock, SliceBlock};
use crate::count::{Count, Local};
use crate::raw::RawShared;
use crate::weak::Weak;

/// A reference-counted owning handle, generic over its thread-safety policy.
///
/// `Shared<T>` defaults to the `Local` policy; `Shared<T, Atomic>` may cross threads. The
/// two instantiations are distinct, non-interconvertible types.
pub struct Shared<T, C = Local>
where
    T: ?Sized,
    C: Count,
{
    inner: Option<RawShared<T, C>>,
}

//
//  Construction
//

impl<T, C> Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Constructs an empty handle, owning nothing.
    #[inline(always)]
    pub const fn empty() -> Self {
        Self { inner: None }
    }

    /// Adopts a boxed pointee, allocating a control block referencing it.
    ///
    /// The resulting handle owns the sole strong reference. `T` may be unsized: adopting
    /// a `Box<dyn Trait>` or a `Box<[T]>` is how a `Shared` over an unsized pointee is
    /// obtained.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory. Use `try_from_box` to handle failures gracefully.
    #[inline(always)]
    pub fn from_box(boxed: Box<T>) -> Self {
        Self::try_from_box(boxed).unwrap()
    }

    /// Attempts to adopt a boxed pointee, allocating a control block referencing it.
    ///
    /// Returns an error if the allocation fails, in which case the pointee is dropped.
    /// Use `from_box` for a panicking version instead.
    pub fn try_from_box(boxed: Box<T>) -> Result<Self, AllocError> {
        //  Safety:
        //  -   NonNull: `Box` pointers are never null.
        let pointee = unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) };

        //  Safety:
        //  -   Owned: obtained from `Box::into_raw` just above.
        match unsafe { OwnedBlock::<T, C>::try_new(pointee) } {
            //  Safety:
            //  -   Accounted: a fresh block has a strong count of 1.
            //  -   Matching: the block adopted `pointee`.
            Ok(header) => Ok(Self::from_inner(Some(unsafe { RawShared::from_parts(pointee, header) }))),
            Err(error) => {
                //  Safety:
                //  -   Owned: ownership never left this function.
                drop(unsafe { Box::from_raw(pointee.as_ptr()) });

                Err(error)
            }
        }
    }

    /// Adopts a raw pointee, allocating a control block referencing it.
    ///
    /// A null `ptr` yields an empty handle, without allocation.
    ///
    /// #   Safety
    ///
    /// -   Owned: `ptr` is null, or was obtained from `Box::into_raw` and ownership
    ///     transfers to the handle.
    /// -   Exclusive: no other handle adopts `ptr`; adopting the same pointer twice leads
    ///     to a double-free.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory.
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        match NonNull::new(ptr) {
            //  Safety:
            //  -   Owned & Exclusive: as per pre-conditions.
            Some(pointee) => Self::from_box(unsafe { Box::from_raw(pointee.as_ptr()) }),
            None => Self::empty(),
        }
    }

    #[inline(always)]
    pub(crate) fn from_inner(inner: Option<RawShared<T, C>>) -> Self {
        Self { inner }
    }
}

impl<T, C> Shared<T, C>
where
    C: Count,
{
    /// Allocates memory on the heap and then places `value` into it.
    ///
    /// The control block and the value share a single allocation.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory. Use `try_new` to handle failures gracefully.
    #[inline(always)]
    pub fn new(value: T) -> Self {
        Self::try_new(value).unwrap()
    }

    /// Attempts to allocate memory on the heap and then places `value` into it.
    ///
    /// Returns an error if the allocation fails. Use `new` for a panicking version
    /// instead.
    #[inline(always)]
    pub fn try_new(value: T) -> Result<Self, AllocError> {
        Self::try_new_in(value, Global)
    }

    /// Allocates memory with `allocator`, and then places `value` into it.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory. Use `try_new_in` to handle failures gracefully.
    #[inline(always)]
    pub fn new_in<A>(value: T, allocator: A) -> Self
    where
        A: Allocator,
    {
        Self::try_new_in(value, allocator).unwrap()
    }

    /// Attempts to allocate memory with `allocator` and then places `value` into it.
    ///
    /// Returns an error if the allocation fails. Use `new_in` for a panicking version
    /// instead.
    pub fn try_new_in<A>(value: T, allocator: A) -> Result<Self, AllocError>
    where
        A: Allocator,
    {
        let (header, ptr) = InlineBlock::<T, C, A>::try_new(value, allocator)?;

        //  Safety:
        //  -   Accounted: a fresh block has a strong count of 1.
        //  -   Matching: `ptr` is the block's inline value.
        Ok(Self::from_inner(Some(unsafe { RawShared::from_parts(ptr, header) })))
    }
}

impl<T, C> Shared<[MaybeUninit<T>], C>
where
    C: Count,
{
    /// Allocates storage for `len` elements, left uninitialized.
    ///
    /// The control block and the elements share a single allocation. The elements must be
    /// initialized by the caller, then the handle converted with `assume_init`; they are
    /// not default-constructed.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory. Use `try_new_uninit_slice` to handle failures
    /// gracefully.
    #[inline(always)]
    pub fn new_uninit_slice(len: usize) -> Self {
        Self::try_new_uninit_slice(len).unwrap()
    }

    /// Attempts to allocate storage for `len` elements, left uninitialized.
    ///
    /// Returns an error if the allocation fails. Use `new_uninit_slice` for a panicking
    /// version instead.
    #[inline(always)]
    pub fn try_new_uninit_slice(len: usize) -> Result<Self, AllocError> {
        Self::try_new_uninit_slice_in(len, Global)
    }

    /// Allocates storage for `len` elements with `allocator`, left uninitialized.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory. Use `try_new_uninit_slice_in` to handle failures
    /// gracefully.
    #[inline(always)]
    pub fn new_uninit_slice_in<A>(len: usize, allocator: A) -> Self
    where
        A: Allocator,
    {
        Self::try_new_uninit_slice_in(len, allocator).unwrap()
    }

    /// Attempts to allocate storage for `len` elements with `allocator`, left
    /// uninitialized.
    ///
    /// Returns an error if the allocation fails. Use `new_uninit_slice_in` for a
    /// panicking version instead.
    pub fn try_new_uninit_slice_in<A>(len: usize, allocator: A) -> Result<Self, AllocError>
    where
        A: Allocator,
    {
        let (header, data) = SliceBlock::<MaybeUninit<T>, C, A>::try_new(len, allocator)?;

        let ptr = NonNull::slice_from_raw_parts(data, len);

        //  Safety:
        //  -   Accounted: a fresh block has a strong count of 1.
        //  -   Matching: `ptr` is the block's trailing element storage.
        Ok(Self::from_inner(Some(unsafe { RawShared::from_parts(ptr, header) })))
    }

    /// Converts to `Shared<[T], C>`, assuming every element is initialized.
    ///
    /// #   Safety
    ///
    /// -   Initialized: as per `MaybeUninit::assume_init`, for every element.
    /// -   Exclusive: `this` is the only strong handle, as freshly returned by
    ///     `new_uninit_slice` and before any clone.
    pub unsafe fn assume_init(this: Self) -> Shared<[T], C> {
        let mut this = ManuallyDrop::new(this);

        match this.inner.take() {
            None => Shared::empty(),
            Some(raw) => {
                let (ptr, header) = raw.into_parts();

                //  The elements are now initialized `T`s: dropping the pointee must drop
                //  them. The layout of the block is unchanged.
                //
                //  Safety:
                //  -   Exclusive: as per pre-condition.
                //  -   Suitable: `MaybeUninit<T>` and `T` share their layout.
                unsafe { Header::set_destroy(header, block::slice_destroy::<T, C>()) };

                let ptr = ptr.as_ptr() as *mut [T];

                //  Safety:
                //  -   NonNull: merely re-typed.
                let ptr = unsafe { NonNull::new_unchecked(ptr) };

                //  Safety:
                //  -   Accounted: the reference transfers from `this`.
                //  -   Matching: same pointee, same block.
                Shared::from_inner(Some(unsafe { RawShared::from_parts(ptr, header) }))
            }
        }
    }
}

impl<T, C> Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Constructs a new `Weak` handle to this allocation.
    ///
    /// An empty handle yields an empty `Weak`.
    pub fn downgrade(this: &Self) -> Weak<T, C> {
        match &this.inner {
            Some(raw) => Weak::from_inner(Some(RawShared::downgrade(raw))),
            None => Weak::empty(),
        }
    }

    /// Releases the owned reference, if any, leaving the handle empty.
    ///
    /// If this was the last strong handle, the pointee is dropped.
    #[inline(always)]
    pub fn reset(this: &mut Self) {
        this.inner = None;
    }
}

//
//  High-level Access
//

impl<T, C> Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Returns whether the handle owns a pointee.
    #[inline(always)]
    pub fn is_owning(this: &Self) -> bool {
        this.inner.is_some()
    }

    /// Returns a reference to the pointee, or `None` if the handle is empty.
    #[inline(always)]
    pub fn get(this: &Self) -> Option<&T> {
        //  Safety:
        //  -   Alive: this handle owns a strong reference, and will for as long as it is
        //      borrowed.
        this.inner.as_ref().map(|raw| unsafe { raw.as_ptr().as_ref() })
    }

    /// Returns a mutable reference to the pointee, if this handle is the only one.
    ///
    /// Returns `None` if the handle is empty, if other strong handles exist, or if any
    /// weak handle exists.
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        match &mut this.inner {
            //  Safety:
            //  -   Exclusive: the one strong handle, borrowed mutably, with no weak handle
            //      extant; no other access can occur for the duration of the borrow.
            Some(raw) if raw.is_unique() => Some(unsafe { raw.as_ptr().as_mut() }),
            _ => None,
        }
    }

    /// Returns the number of strong handles sharing the control block, 0 if empty.
    ///
    /// Under `Atomic`, the value may be stale by the time it is observed; it is suitable
    /// for diagnostics, not for driving control decisions.
    #[inline(always)]
    pub fn strong_count(this: &Self) -> usize {
        this.inner.as_ref().map_or(0, RawShared::strong_count)
    }

    /// Returns the number of weak handles, + 1 for the strong group, 0 if empty.
    ///
    /// Under `Atomic`, the value may be stale by the time it is observed.
    #[inline(always)]
    pub fn weak_count(this: &Self) -> usize {
        this.inner.as_ref().map_or(0, RawShared::weak_count)
    }

    /// Returns whether the two handles share their control block.
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

impl<T, C> Shared<T, C>
where
    C: Count,
{
    /// Returns the pointee pointer, null if the handle is empty.
    ///
    /// No ownership transfers; the pointer is valid for as long as a strong handle to the
    /// block exists.
    #[inline(always)]
    pub fn as_ptr(this: &Self) -> *const T {
        match &this.inner {
            Some(raw) => raw.as_ptr().as_ptr(),
            None => ptr::null(),
        }
    }
}

impl<T, C> Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// Returns the pointee pointer, `None` if the handle is empty.
    #[inline(always)]
    pub fn as_non_null(this: &Self) -> Option<NonNull<T>> {
        this.inner.as_ref().map(RawShared::as_ptr)
    }
}

//
//  Clone
//

impl<T, C> Clone for Shared<T, C>
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

impl<T, C> From<Box<T>> for Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn from(boxed: Box<T>) -> Self {
        Self::from_box(boxed)
    }
}

impl<T, C, const N: usize> From<Shared<[T; N], C>> for Shared<[T], C>
where
    C: Count,
{
    fn from(this: Shared<[T; N], C>) -> Self {
        let mut this = ManuallyDrop::new(this);

        match this.inner.take() {
            None => Shared::empty(),
            Some(raw) => {
                let (ptr, header) = raw.into_parts();

                let ptr = NonNull::slice_from_raw_parts(ptr.cast::<T>(), N);

                //  Safety:
                //  -   Accounted: the reference transfers from `this`.
                //  -   Matching: same pointee, same block; destruction is erased and
                //      unaffected by the handle's re-typing.
                Shared::from_inner(Some(unsafe { RawShared::from_parts(ptr, header) }))
            }
        }
    }
}

//
//  Value Access
//

impl<T, C> convert::AsRef<T> for Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    /// #   Panics
    ///
    /// If the handle is empty.
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T, C> ops::Deref for Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    type Target = T;

    /// #   Panics
    ///
    /// If the handle is empty.
    fn deref(&self) -> &T {
        match Self::get(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty handle"),
        }
    }
}

//
//  Formatting
//

impl<T, C> fmt::Debug for Shared<T, C>
where
    T: ?Sized + fmt::Debug,
    C: Count,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => f.debug_tuple("Shared").field(&value).finish(),
            None => f.write_str("Shared(<empty>)"),
        }
    }
}

impl<T, C> fmt::Display for Shared<T, C>
where
    T: ?Sized + fmt::Display,
    C: Count,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => fmt::Display::fmt(value, f),
            None => f.write_str("<empty>"),
        }
    }
}

//
//  Identity
//

impl<T, C> Eq for Shared<T, C>
where
    T: ?Sized + Eq,
    C: Count,
{
}

impl<T, C> PartialEq for Shared<T, C>
where
    T: ?Sized + PartialEq,
    C: Count,
{
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        Self::get(self).eq(&Self::get(other))
    }
}

impl<T, C> hash::Hash for Shared<T, C>
where
    T: ?Sized + hash::Hash,
    C: Count,
{
    #[inline(always)]
    fn hash<HS>(&self, hasher: &mut HS)
    where
        HS: hash::Hasher,
    {
        Self::get(self).hash(hasher);
    }
}

//
//  Ordering
//

impl<T, C> Ord for Shared<T, C>
where
    T: ?Sized + Ord,
    C: Count,
{
    #[inline(always)]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Self::get(self).cmp(&Self::get(other))
    }
}

impl<T, C> PartialOrd for Shared<T, C>
where
    T: ?Sized + PartialOrd,
    C: Count,
{
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Self::get(self).partial_cmp(&Self::get(other))
    }
}

//
//  Markers
//

impl<T, C> Default for Shared<T, C>
where
    T: ?Sized,
    C: Count,
{
    fn default() -> Self {
        Self::empty()
    }
}

//  Safety: as Arc; the count policy gates cross-thread use, `Local` being `!Sync`.
unsafe impl<T, C> Send for Shared<T, C>
where
    T: ?Sized + Send + Sync,
    C: Count + Sync,
{
}

//  Safety: as Arc; the count policy gates cross-thread use, `Local` being `!Sync`.
unsafe impl<T, C> Sync for Shared<T, C>
where
    T: ?Sized + Send + Sync,
    C: Count + Sync,
{
}

// mod tests
