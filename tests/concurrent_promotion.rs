use std::sync::atomic::Ordering::{Relaxed, SeqCst};
use std::sync::atomic::{AtomicBool, AtomicUsize};
use std::sync::{Arc, Barrier};
use std::thread;

use pretty_assertions::assert_eq;
use shared_ownership::{make_shared, Shared, Weak};

const PROMOTERS: usize = 8;
const ROUNDS: usize = 200;

struct Canary {
    value: u64,
    alive: Arc<AtomicBool>,
    drops: Arc<AtomicUsize>,
}

impl Drop for Canary {
    fn drop(&mut self) {
        self.alive.store(false, SeqCst);
        self.drops.fetch_add(1, SeqCst);
    }
}

/// Races `PROMOTERS` threads calling `lock` against one thread dropping the
/// last owner, and checks that no promotion ever observes a dead payload.
fn race(owner: Shared<Canary>, alive: Arc<AtomicBool>, drops: Arc<AtomicUsize>) -> usize {
    let weak: Weak<Canary> = Shared::downgrade(&owner);
    let barrier = Barrier::new(PROMOTERS + 1);
    let promoted = AtomicUsize::new(0);

    thread::scope(|s| {
        for _ in 0..PROMOTERS {
            s.spawn(|| {
                barrier.wait();
                let shared = weak.lock();
                match Shared::get(&shared) {
                    Some(canary) => {
                        assert!(canary.alive.load(SeqCst));
                        assert_eq!(canary.value, 42);
                        promoted.fetch_add(1, Relaxed);
                    }
                    None => assert_eq!(weak.use_count(), 0),
                }
            });
        }
        s.spawn(|| {
            barrier.wait();
            drop(owner);
        });
    });

    assert!(!alive.load(SeqCst));
    assert_eq!(drops.load(SeqCst), 1);
    assert!(weak.expired());
    assert!(weak.upgrade().is_none());
    promoted.load(Relaxed)
}

fn canary() -> (Canary, Arc<AtomicBool>, Arc<AtomicUsize>) {
    let alive = Arc::new(AtomicBool::new(true));
    let drops = Arc::new(AtomicUsize::new(0));
    let canary = Canary {
        value: 42,
        alive: alive.clone(),
        drops: drops.clone(),
    };
    (canary, alive, drops)
}

#[test]
fn test_lock_races_last_release() {
    for _ in 0..ROUNDS {
        let (payload, alive, drops) = canary();
        race(Shared::new(payload), alive, drops);
    }
}

#[test]
fn test_lock_races_last_release_in_place() {
    for _ in 0..ROUNDS {
        let (payload, alive, drops) = canary();
        race(make_shared(payload), alive, drops);
    }
}

#[test]
fn test_concurrent_clone_and_drop() {
    let (payload, alive, drops) = canary();
    let owner = Shared::new(payload);
    thread::scope(|s| {
        for _ in 0..PROMOTERS {
            let mine = owner.clone();
            s.spawn(move || {
                for _ in 0..1_000 {
                    let copy = mine.clone();
                    let weak = Shared::downgrade(&copy);
                    assert!(!weak.expired());
                    drop(copy);
                }
            });
        }
    });
    assert_eq!(Shared::use_count(&owner), 1);
    assert_eq!(Shared::weak_count(&owner), 0);
    drop(owner);
    assert!(!alive.load(SeqCst));
    assert_eq!(drops.load(SeqCst), 1);
}
