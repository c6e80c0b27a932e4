//! Shared, weak, and unique ownership handles with selectable thread-safety.
//!
//! #   Available handles
//!
//! -   `Shared<T, C>`: a reference-counted owning handle; the pointee lives for as long
//!     as any `Shared` over its control block does.
//! -   `Weak<T, C>`: a non-owning observer handle; upgradable to a `Shared` while the
//!     pointee survives, and deterministically not after.
//! -   `Unique<T, D>`: a single-owner handle with a pluggable deleter; no control block,
//!     no counts.
//!
//! #   Thread-safety policy
//!
//! `Shared` and `Weak` are generic over a count policy:
//!
//! -   `Local`: plain counts, no synchronization; handles are confined to one thread by
//!     the type system.
//! -   `Atomic`: atomic counts; handles may cross threads, and concurrent final releases
//!     resolve to exactly one destruction.
//!
//! The policy is part of the type: `Shared<T, Local>` and `Shared<T, Atomic>` do not
//! interconvert.
//!
//! #   Layout
//!
//! Each distinct pointee is governed by one control block, carrying the two counts and
//! the type-erased destroy & discard operations. `Shared::new` co-allocates the control
//! block and the pointee in a single allocation; `Shared::from_box` adopts an existing
//! allocation and allocates a control block referencing it. The pointee is dropped when
//! the strong count reaches 0; the block is freed when the weak count reaches 0.

//  Use only core and alloc, guaranteeing no I/O nor threads.
#![cfg_attr(not(test), no_std)]
//  Ensure unsafe operations are duly checked.
#![deny(unsafe_op_in_unsafe_fn)]
//  Ensure proper documentation.
#![deny(missing_docs)]

//  Non-core must be explicitly depended on in no_std.
extern crate alloc;

mod block;
mod count;
mod raw;
mod shared;
mod unique;
mod weak;

pub use count::{Atomic, Count, Local};
pub use shared::Shared;
pub use unique::{BoxDeleter, Deleter, Unique};
pub use weak::Weak;

//  The allocation interface consumed by the factories, re-exported for convenience.
pub use allocator_api2::alloc::{AllocError, Allocator, Global};
