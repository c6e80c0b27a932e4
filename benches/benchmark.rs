//! Benchmarks of the ownership handles.

use std::rc::Rc;
use std::sync::Arc as StdArc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};

use tether::{Atomic, Local, Shared, Weak};

criterion_main!(control, clone_drop, upgrade);

criterion_group!(control, control_rc, control_arc);

//  Time to clone & drop the standard library's single-threaded handle.
//
//  This benchmark represents the performance baseline for `Shared<_, Local>`, which adds
//  a level of indirection for its type-erased control block.
fn control_rc(c: &mut Criterion) {
    let root = Rc::new(42u64);

    c.bench_function("control rc clone/drop", |b| b.iter(|| black_box(root.clone())));
}

//  Time to clone & drop the standard library's multi-threaded handle.
//
//  This benchmark represents the performance baseline for `Shared<_, Atomic>`.
fn control_arc(c: &mut Criterion) {
    let root = StdArc::new(42u64);

    c.bench_function("control arc clone/drop", |b| b.iter(|| black_box(root.clone())));
}

criterion_group!(clone_drop, shared_local, shared_atomic);

//  Time to clone & drop a handle over plain counts.
fn shared_local(c: &mut Criterion) {
    let root = Shared::<u64, Local>::new(42);

    c.bench_function("shared local clone/drop", |b| b.iter(|| black_box(root.clone())));
}

//  Time to clone & drop a handle over atomic counts, uncontended.
fn shared_atomic(c: &mut Criterion) {
    let root = Shared::<u64, Atomic>::new(42);

    c.bench_function("shared atomic clone/drop", |b| b.iter(|| black_box(root.clone())));
}

criterion_group!(upgrade, upgrade_local, upgrade_atomic);

//  Time to upgrade & drop from a weak handle over plain counts.
fn upgrade_local(c: &mut Criterion) {
    let root = Shared::<u64, Local>::new(42);
    let weak = Shared::downgrade(&root);

    c.bench_function("upgrade local", |b| b.iter(|| black_box(Weak::upgrade(&weak))));
}

//  Time to upgrade & drop from a weak handle over atomic counts, uncontended.
//
//  The upgrade is a compare-exchange loop rather than a blind increment; this benchmark
//  pins down its uncontended cost.
fn upgrade_atomic(c: &mut Criterion) {
    let root = Shared::<u64, Atomic>::new(42);
    let weak = Shared::downgrade(&root);

    c.bench_function("upgrade atomic", |b| b.iter(|| black_box(Weak::upgrade(&weak))));
}
