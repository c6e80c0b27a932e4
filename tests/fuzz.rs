//! Fuzzing tests for the atomic count policy.
//!
//! The fuzzing tests are heavy, and best run one at a time.
//!
//! Reminder: to run only fuzzing tests, run `cargo test --test fuzz`.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc as StdArc;

use bursty::BurstyBuilder;

use tether::{Atomic, Shared, Weak};

//  Change this variable to use a different number of threads.
const NUMBER_THREADS: usize = 8;

#[test]
fn concurrent_clone_drop() {
    //  The simplest burst: every thread clones the same handle, then drops its clone,
    //  coordinated across all threads. The pointee must be destroyed exactly once, by
    //  whichever release comes last.

    for _ in 0..256 {
        let drops = StdArc::new(AtomicUsize::new(0));

        let locals: Vec<Option<Shared<Droplet, Atomic>>> = vec![None; NUMBER_THREADS];

        let mut builder = BurstyBuilder::new(Shared::<_, Atomic>::new(Droplet::new(&drops)), locals);

        builder.add_simple_step(|| {
            |shared: &Shared<Droplet, Atomic>, local: &mut Option<Shared<Droplet, Atomic>>| {
                *local = Some(shared.clone());
            }
        });

        builder.add_simple_step(|| {
            |_shared: &Shared<Droplet, Atomic>, local: &mut Option<Shared<Droplet, Atomic>>| {
                *local = None;
            }
        });

        let bursty = builder.launch(1);

        let shared = bursty.global();
        let locals = bursty.into_locals();

        assert!(locals.iter().all(Option::is_none));
        assert_eq!(0, drops.load(Ordering::Relaxed));

        drop(shared);

        assert_eq!(1, drops.load(Ordering::Relaxed));
    }
}

//  Too expensive for MIRI to run.
#[cfg(not(miri))]
#[test]
fn concurrent_upgrade_last_drop() {
    //  The resurrection race: one thread drops the last strong handle while all the
    //  others race to upgrade a weak one. Each upgrade must either obtain a live handle
    //  or fail cleanly; the pointee must be destroyed exactly once, and afterwards every
    //  upgrade must fail, forever.

    for _ in 0..256 {
        let drops = StdArc::new(AtomicUsize::new(0));

        let root = Shared::<_, Atomic>::new(Droplet::new(&drops));
        let weak = Shared::downgrade(&root);

        //  The sole strong handle starts in the first thread's slot.
        let locals: Vec<Option<Shared<Droplet, Atomic>>> = (0..NUMBER_THREADS)
            .map(|index| (index == 0).then(|| root.clone()))
            .collect();

        drop(root);

        let mut builder = BurstyBuilder::new(weak, locals);

        builder.add_simple_step(|| {
            |weak: &Weak<Droplet, Atomic>, local: &mut Option<Shared<Droplet, Atomic>>| {
                match local.take() {
                    Some(root) => drop(root),
                    None => {
                        if let Some(upgraded) = Weak::upgrade(weak) {
                            assert!(Shared::is_owning(&upgraded));
                        }
                    }
                }
            }
        });

        let bursty = builder.launch(1);

        let weak = bursty.global();
        let _locals = bursty.into_locals();

        assert_eq!(1, drops.load(Ordering::Relaxed));
        assert_eq!(0, Weak::strong_count(&weak));
        assert!(Weak::upgrade(&weak).is_none());
    }
}

//  Too expensive for MIRI to run.
#[cfg(not(miri))]
#[test]
fn concurrent_weak_churn() {
    //  Weak handles are created, upgraded, and dropped concurrently, while the root
    //  strong handle survives throughout: every upgrade must succeed, and the pointee
    //  must survive until the root is released, then be destroyed exactly once.

    for _ in 0..256 {
        let drops = StdArc::new(AtomicUsize::new(0));

        let locals: Vec<Option<Weak<Droplet, Atomic>>> = vec![None; NUMBER_THREADS];

        let mut builder = BurstyBuilder::new(Shared::<_, Atomic>::new(Droplet::new(&drops)), locals);

        builder.add_simple_step(|| {
            |shared: &Shared<Droplet, Atomic>, local: &mut Option<Weak<Droplet, Atomic>>| {
                *local = Some(Shared::downgrade(shared));
            }
        });

        builder.add_simple_step(|| {
            |_shared: &Shared<Droplet, Atomic>, local: &mut Option<Weak<Droplet, Atomic>>| {
                let weak = local.as_ref().expect("downgraded in the previous step");

                let upgraded = Weak::upgrade(weak).expect("the root is still alive");

                assert!(Shared::is_owning(&upgraded));
            }
        });

        builder.add_simple_step(|| {
            |_shared: &Shared<Droplet, Atomic>, local: &mut Option<Weak<Droplet, Atomic>>| {
                *local = None;
            }
        });

        let bursty = builder.launch(1);

        let shared = bursty.global();
        let locals = bursty.into_locals();

        assert!(locals.iter().all(Option::is_none));
        assert_eq!(0, drops.load(Ordering::Relaxed));
        assert_eq!(1, Shared::weak_count(&shared));

        drop(shared);

        assert_eq!(1, drops.load(Ordering::Relaxed));
    }
}

struct Droplet {
    drops: StdArc<AtomicUsize>,
}

impl Droplet {
    fn new(drops: &StdArc<AtomicUsize>) -> Self {
        let drops = drops.clone();

        Self { drops }
    }
}

impl Drop for Droplet {
    fn drop(&mut self) {
        self.drops.fetch_add(1, Ordering::Relaxed);
    }
}
