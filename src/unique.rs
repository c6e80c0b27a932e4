//! The single-owner handle.
//!
//! A `Unique` owns its pointee alone: no control block, no counts. The deleter, captured
//! at construction, is invoked exactly once per owned pointer, on release or destruction,
//! and not at all for an empty handle.
//!
//! The deleter is held by value; holding it by reference is a matter of instantiating the
//! deleter parameter with `&mut D`, the caller's deleter then outliving the handle.

use core::{cmp, convert, fmt, hash, marker::PhantomData, mem::ManuallyDrop, ops, ptr, ptr::NonNull};

use alloc::boxed::Box;

/// A destruction strategy for an owned pointee.
pub trait Deleter<T>
where
    T: ?Sized,
{
    /// Deletes the pointee: drops the value and releases its storage.
    ///
    /// #   Safety
    ///
    /// -   Owned: `ptr` is owned by the caller, and valid for deletion by this deleter.
    /// -   Once: `ptr` is never deleted, nor accessed, again.
    unsafe fn delete(&mut self, ptr: NonNull<T>);
}

/// The default deleter: reconstitutes the `Box` the pointee was allocated by.
///
/// A single implementation covers both the scalar and the slice case, the `Box` itself
/// performing element-wise destruction for slices.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct BoxDeleter;

impl<T> Deleter<T> for BoxDeleter
where
    T: ?Sized,
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        //  Safety:
        //  -   Owned & Once: as per pre-conditions; the pointee originates from
        //      `Box::into_raw`, per the constructors of `Unique`.
        drop(unsafe { Box::from_raw(ptr.as_ptr()) });
    }
}

impl<T, D> Deleter<T> for &mut D
where
    T: ?Sized,
    D: Deleter<T>,
{
    unsafe fn delete(&mut self, ptr: NonNull<T>) {
        //  Safety:
        //  -   Owned & Once: as per pre-conditions.
        unsafe { (**self).delete(ptr) };
    }
}

/// A single-owner handle, generic over its deleter.
///
/// There is no sharing: the handle cannot be cloned, only moved, and moving transfers
/// both the pointer and the deleter.
pub struct Unique<T, D = BoxDeleter>
where
    T: ?Sized,
    D: Deleter<T>,
{
    ptr: Option<NonNull<T>>,
    deleter: D,
    _owns: PhantomData<T>,
}

//
//  Construction
//

impl<T> Unique<T, BoxDeleter> {
    /// Allocates memory on the heap and then places `value` into it.
    ///
    /// #   Panics
    ///
    /// If there is not enough memory.
    #[inline(always)]
    pub fn new(value: T) -> Self {
        Self::from_box(Box::new(value))
    }
}

impl<T> Unique<T, BoxDeleter>
where
    T: ?Sized,
{
    /// Adopts a boxed pointee.
    #[inline(always)]
    pub fn from_box(boxed: Box<T>) -> Self {
        //  Safety:
        //  -   NonNull: `Box` pointers are never null.
        let ptr = unsafe { NonNull::new_unchecked(Box::into_raw(boxed)) };

        Self {
            ptr: Some(ptr),
            deleter: BoxDeleter,
            _owns: PhantomData,
        }
    }

    /// Adopts a raw pointee.
    ///
    /// A null `ptr` yields an empty handle.
    ///
    /// #   Safety
    ///
    /// -   Owned: `ptr` is null, or was obtained from `Box::into_raw` and ownership
    ///     transfers to the handle.
    /// -   Exclusive: no other handle adopts `ptr`.
    #[inline(always)]
    pub unsafe fn from_raw(ptr: *mut T) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            deleter: BoxDeleter,
            _owns: PhantomData,
        }
    }

    /// Deconstructs the handle back into the `Box` it adopted, `None` if empty.
    pub fn into_box(this: Self) -> Option<Box<T>> {
        let mut this = ManuallyDrop::new(this);

        //  Safety:
        //  -   Owned: adopted from `Box::into_raw` at construction, and released here
        //      without deletion.
        this.ptr.take().map(|ptr| unsafe { Box::from_raw(ptr.as_ptr()) })
    }
}

impl<T, D> Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    /// Constructs an empty handle, owning nothing.
    #[inline(always)]
    pub fn empty() -> Self
    where
        D: Default,
    {
        Self::empty_with(D::default())
    }

    /// Constructs an empty handle, owning nothing, with the given deleter.
    #[inline(always)]
    pub const fn empty_with(deleter: D) -> Self {
        Self {
            ptr: None,
            deleter,
            _owns: PhantomData,
        }
    }

    /// Adopts a raw pointee, to be deleted with the given deleter.
    ///
    /// A null `ptr` yields an empty handle; the deleter is kept nonetheless.
    ///
    /// #   Safety
    ///
    /// -   Owned: `ptr` is null, or ownership transfers to the handle, and `deleter` is
    ///     valid for deleting it.
    /// -   Exclusive: no other handle adopts `ptr`.
    #[inline(always)]
    pub unsafe fn from_raw_with(ptr: *mut T, deleter: D) -> Self {
        Self {
            ptr: NonNull::new(ptr),
            deleter,
            _owns: PhantomData,
        }
    }
}

//
//  Destruction
//

impl<T, D> Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    /// Deletes the owned pointee, if any, leaving the handle empty.
    pub fn reset(this: &mut Self) {
        if let Some(ptr) = this.ptr.take() {
            //  Safety:
            //  -   Owned: the handle owned `ptr`.
            //  -   Once: `ptr` was moved out of the handle, never to be seen again.
            unsafe { this.deleter.delete(ptr) };
        }
    }

    /// Deletes the owned pointee, if any, then adopts `ptr`.
    ///
    /// A null `ptr` leaves the handle empty.
    ///
    /// #   Safety
    ///
    /// -   Owned: `ptr` is null, or ownership transfers to the handle, and the handle's
    ///     deleter is valid for deleting it.
    /// -   Exclusive: no other handle adopts `ptr`.
    pub unsafe fn reset_raw(this: &mut Self, ptr: *mut T) {
        Self::reset(this);

        this.ptr = NonNull::new(ptr);
    }

    /// Releases the owned pointer without deleting it, leaving the handle empty.
    ///
    /// The caller becomes responsible for the pointee.
    #[inline(always)]
    pub fn release(this: &mut Self) -> Option<NonNull<T>> {
        this.ptr.take()
    }
}

impl<T, D> Drop for Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    fn drop(&mut self) {
        Self::reset(self);
    }
}

//
//  High-level Access
//

impl<T, D> Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    /// Returns whether the handle owns a pointee.
    #[inline(always)]
    pub fn is_owning(this: &Self) -> bool {
        this.ptr.is_some()
    }

    /// Returns a reference to the pointee, or `None` if the handle is empty.
    #[inline(always)]
    pub fn get(this: &Self) -> Option<&T> {
        //  Safety:
        //  -   Alive: this handle owns the pointee, and will for as long as it is
        //      borrowed.
        this.ptr.as_ref().map(|ptr| unsafe { ptr.as_ref() })
    }

    /// Returns a mutable reference to the pointee, or `None` if the handle is empty.
    ///
    /// Single ownership makes mutable access unconditional on an owning handle.
    #[inline(always)]
    pub fn get_mut(this: &mut Self) -> Option<&mut T> {
        //  Safety:
        //  -   Alive & Exclusive: this handle owns the pointee alone, borrowed mutably.
        this.ptr.as_mut().map(|ptr| unsafe { ptr.as_mut() })
    }

    /// Returns the deleter.
    #[inline(always)]
    pub fn deleter(this: &Self) -> &D {
        &this.deleter
    }
}

//
//  Low-level Access
//

impl<T, D> Unique<T, D>
where
    D: Deleter<T>,
{
    /// Returns the pointee pointer, null if the handle is empty.
    ///
    /// No ownership transfers.
    #[inline(always)]
    pub fn as_ptr(this: &Self) -> *const T {
        match &this.ptr {
            Some(ptr) => ptr.as_ptr(),
            None => ptr::null(),
        }
    }
}

impl<T, D> Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    /// Returns the pointee pointer, `None` if the handle is empty.
    #[inline(always)]
    pub fn as_non_null(this: &Self) -> Option<NonNull<T>> {
        this.ptr
    }
}

//
//  Conversion
//

impl<T> From<Box<T>> for Unique<T, BoxDeleter>
where
    T: ?Sized,
{
    fn from(boxed: Box<T>) -> Self {
        Self::from_box(boxed)
    }
}

impl<T, D, const N: usize> From<Unique<[T; N], D>> for Unique<[T], D>
where
    D: Deleter<[T; N]> + Deleter<[T]>,
{
    fn from(this: Unique<[T; N], D>) -> Self {
        let mut this = ManuallyDrop::new(this);

        let ptr = this
            .ptr
            .take()
            .map(|ptr| NonNull::slice_from_raw_parts(ptr.cast::<T>(), N));

        //  Safety:
        //  -   Owned: moved out of `this`, which is never dropped.
        let deleter = unsafe { ptr::read(&this.deleter) };

        Self {
            ptr,
            deleter,
            _owns: PhantomData,
        }
    }
}

//
//  Value Access
//

impl<T, D> convert::AsRef<T> for Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    /// #   Panics
    ///
    /// If the handle is empty.
    fn as_ref(&self) -> &T {
        self
    }
}

impl<T, D> ops::Deref for Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
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

impl<T, D> ops::DerefMut for Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T>,
{
    /// #   Panics
    ///
    /// If the handle is empty.
    fn deref_mut(&mut self) -> &mut T {
        match Self::get_mut(self) {
            Some(value) => value,
            None => panic!("dereferenced an empty handle"),
        }
    }
}

//
//  Formatting
//

impl<T, D> fmt::Debug for Unique<T, D>
where
    T: ?Sized + fmt::Debug,
    D: Deleter<T>,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> Result<(), fmt::Error> {
        match Self::get(self) {
            Some(value) => f.debug_tuple("Unique").field(&value).finish(),
            None => f.write_str("Unique(<empty>)"),
        }
    }
}

impl<T, D> fmt::Display for Unique<T, D>
where
    T: ?Sized + fmt::Display,
    D: Deleter<T>,
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

impl<T, D> Eq for Unique<T, D>
where
    T: ?Sized + Eq,
    D: Deleter<T>,
{
}

impl<T, D> PartialEq for Unique<T, D>
where
    T: ?Sized + PartialEq,
    D: Deleter<T>,
{
    #[inline(always)]
    fn eq(&self, other: &Self) -> bool {
        Self::get(self).eq(&Self::get(other))
    }
}

impl<T, D> hash::Hash for Unique<T, D>
where
    T: ?Sized + hash::Hash,
    D: Deleter<T>,
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

impl<T, D> Ord for Unique<T, D>
where
    T: ?Sized + Ord,
    D: Deleter<T>,
{
    #[inline(always)]
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        Self::get(self).cmp(&Self::get(other))
    }
}

impl<T, D> PartialOrd for Unique<T, D>
where
    T: ?Sized + PartialOrd,
    D: Deleter<T>,
{
    #[inline(always)]
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Self::get(self).partial_cmp(&Self::get(other))
    }
}

//
//  Markers
//

impl<T, D> Default for Unique<T, D>
where
    T: ?Sized,
    D: Deleter<T> + Default,
{
    fn default() -> Self {
        Self::empty()
    }
}

//  Safety: as Box.
unsafe impl<T, D> Send for Unique<T, D>
where
    T: ?Sized + Send,
    D: Deleter<T> + Send,
{
}

//  Safety: as Box.
unsafe impl<T, D> Sync for Unique<T, D>
where
    T: ?Sized + Sync,
    D: Deleter<T> + Sync,
{
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;
    use core::fmt::Debug;

    use std::rc::Rc;

    use super::*;

    #[test]
    fn empty_owns_nothing() {
        let unique = Unique::<u32>::empty();

        assert!(!Unique::is_owning(&unique));
        assert!(Unique::as_ptr(&unique).is_null());
        assert_eq!(None, Unique::get(&unique));
    }

    #[test]
    fn new_deref_and_mutate() {
        let mut unique = Unique::new(42u32);

        assert_eq!(42, *unique);

        *unique = 33;

        assert_eq!(33, *unique);
        assert_eq!(Some(&33), Unique::get(&unique));
    }

    #[test]
    fn drop_deletes_exactly_once() {
        let drops = tally();

        let unique = Unique::new(Droplet::new(&drops));

        assert_eq!(0, drops.get());

        drop(unique);

        assert_eq!(1, drops.get());
    }

    #[test]
    fn reset_deletes_and_empties() {
        let drops = tally();

        let mut unique = Unique::new(Droplet::new(&drops));

        Unique::reset(&mut unique);

        assert_eq!(1, drops.get());
        assert!(!Unique::is_owning(&unique));

        //  Resetting an empty handle does nothing.
        Unique::reset(&mut unique);

        assert_eq!(1, drops.get());
    }

    #[test]
    fn reset_raw_deletes_old_adopts_new() {
        let drops = tally();
        let replacement_drops = tally();

        let mut unique = Unique::new(Droplet::new(&drops));

        let replacement = Box::into_raw(Box::new(Droplet::new(&replacement_drops)));

        //  Safety:
        //  -   Owned & Exclusive: freshly obtained from `Box::into_raw`.
        unsafe { Unique::reset_raw(&mut unique, replacement) };

        assert_eq!(1, drops.get());
        assert_eq!(0, replacement_drops.get());

        drop(unique);

        assert_eq!(1, replacement_drops.get());
    }

    #[test]
    fn release_skips_deletion() {
        let drops = tally();

        let mut unique = Unique::new(Droplet::new(&drops));

        let ptr = Unique::release(&mut unique).expect("was owning");

        drop(unique);

        assert_eq!(0, drops.get());

        //  Safety:
        //  -   Owned & Exclusive: released just above.
        let adopted = unsafe { Unique::<Droplet>::from_raw(ptr.as_ptr()) };

        drop(adopted);

        assert_eq!(1, drops.get());
    }

    #[test]
    fn box_round_trip() {
        let unique = Unique::from_box(Box::new(42u32));

        let boxed = Unique::into_box(unique).expect("was owning");

        assert_eq!(42, *boxed);
    }

    #[test]
    fn unsized_pointee() {
        let unique: Unique<dyn Debug> = Unique::from_box(Box::new(42u32));

        assert_eq!("Unique(42)", std::format!("{unique:?}"));
    }

    #[test]
    fn slice_deletion_is_element_wise() {
        let drops = tally();

        let boxed: Box<[Droplet]> = std::vec![Droplet::new(&drops), Droplet::new(&drops)].into_boxed_slice();

        let unique = Unique::from_box(boxed);

        assert_eq!(2, unique.len());

        drop(unique);

        assert_eq!(2, drops.get());
    }

    #[test]
    fn array_to_slice_conversion() {
        let drops = tally();

        let array: Unique<[Droplet; 3]> =
            Unique::new([Droplet::new(&drops), Droplet::new(&drops), Droplet::new(&drops)]);

        let slice: Unique<[Droplet]> = array.into();

        assert_eq!(3, slice.len());
        assert_eq!(0, drops.get());

        drop(slice);

        assert_eq!(3, drops.get());
    }

    #[test]
    fn deleter_by_value() {
        let deletions = tally();

        let deleter = Counting {
            deletions: deletions.clone(),
        };

        let unique =
            //  Safety:
            //  -   Owned & Exclusive: freshly obtained from `Box::into_raw`.
            unsafe { Unique::from_raw_with(Box::into_raw(Box::new(42u32)), deleter) };

        assert_eq!(0, Unique::deleter(&unique).deletions.get());

        drop(unique);

        assert_eq!(1, deletions.get());
    }

    #[test]
    fn deleter_by_reference() {
        let mut deleter = Counting {
            deletions: tally(),
        };

        {
            let unique =
                //  Safety:
                //  -   Owned & Exclusive: freshly obtained from `Box::into_raw`.
                unsafe { Unique::from_raw_with(Box::into_raw(Box::new(42u32)), &mut deleter) };

            assert_eq!(42, *unique);
        }

        //  The caller's deleter survives the handle, deletions visible.
        assert_eq!(1, deleter.deletions.get());
    }

    struct Droplet {
        drops: Rc<Cell<usize>>,
    }

    impl Droplet {
        fn new(drops: &Rc<Cell<usize>>) -> Self {
            let drops = drops.clone();

            Self { drops }
        }
    }

    impl Drop for Droplet {
        fn drop(&mut self) {
            self.drops.set(self.drops.get() + 1);
        }
    }

    fn tally() -> Rc<Cell<usize>> {
        Rc::new(Cell::new(0))
    }

    //  Counts deletions, delegating to the default deleter.
    struct Counting {
        deletions: Rc<Cell<usize>>,
    }

    impl<T> Deleter<T> for Counting
    where
        T: ?Sized,
    {
        unsafe fn delete(&mut self, ptr: NonNull<T>) {
            self.deletions.set(self.deletions.get() + 1);

            //  Safety:
            //  -   Owned & Once: as per pre-conditions.
            unsafe { BoxDeleter.delete(ptr) };
        }
    }
} // mod tests
