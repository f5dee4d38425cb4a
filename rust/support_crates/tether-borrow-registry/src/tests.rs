use std::{
    ptr::NonNull,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use crate::BorrowRegistry;

fn addr(n: usize) -> NonNull<u8> {
    NonNull::new(n as *mut u8).unwrap()
}

fn counting_callback(
    counter: &Arc<AtomicUsize>,
) -> impl FnOnce(NonNull<u8>, usize) + Send + 'static {
    let counter = counter.clone();
    move |_, _| {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

#[test]
fn test_register_and_release() {
    let registry = BorrowRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register(addr(0x1000), 5, counting_callback(&calls))
        .unwrap();
    assert!(registry.contains(addr(0x1000)));
    assert_eq!(registry.len(), 1);

    assert!(unsafe { registry.release(addr(0x1000), 5) });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
    assert!(!registry.contains(addr(0x1000)));
    assert!(registry.is_empty());
}

#[test]
fn test_release_runs_callback_once() {
    let registry = BorrowRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register(addr(0x2000), 8, counting_callback(&calls))
        .unwrap();

    assert!(unsafe { registry.release(addr(0x2000), 8) });
    assert!(!unsafe { registry.release(addr(0x2000), 8) });
    assert!(!unsafe { registry.release(addr(0x2000), 8) });
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn test_release_unknown_address() {
    let registry = BorrowRegistry::new();
    assert!(!unsafe { registry.release(addr(0x3000), 1) });

    let calls = Arc::new(AtomicUsize::new(0));
    registry
        .register(addr(0x3000), 1, counting_callback(&calls))
        .unwrap();
    assert!(!unsafe { registry.release(addr(0x3001), 1) });
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(registry.len(), 1);
}

#[test]
fn test_callback_receives_pointer_and_length() {
    let registry = BorrowRegistry::new();
    let seen = Arc::new(Mutex::new(None));
    let sink = seen.clone();
    registry
        .register(addr(0x4000), 16, move |p, n| {
            *sink.lock().unwrap() = Some((p.as_ptr() as usize, n));
        })
        .unwrap();

    assert!(unsafe { registry.release(addr(0x4000), 16) });
    assert_eq!(*seen.lock().unwrap(), Some((0x4000, 16)));
}

#[test]
fn test_double_register_fails() {
    let registry = BorrowRegistry::new();
    let first = Arc::new(AtomicUsize::new(0));
    let second = Arc::new(AtomicUsize::new(0));
    registry
        .register(addr(0x5000), 4, counting_callback(&first))
        .unwrap();

    let err = registry
        .register(addr(0x5000), 4, counting_callback(&second))
        .unwrap_err();
    assert!(err.is_already_borrowed());
    assert_eq!(registry.len(), 1);

    // The surviving record is still the first one.
    assert!(unsafe { registry.release(addr(0x5000), 4) });
    assert_eq!(first.load(Ordering::SeqCst), 1);
    assert_eq!(second.load(Ordering::SeqCst), 0);
}

#[test]
fn test_reentrant_release_from_callback() {
    let registry = Arc::new(BorrowRegistry::new());
    let nested = Arc::new(Mutex::new(None));

    let inner_registry = registry.clone();
    let nested_result = nested.clone();
    registry
        .register(addr(0x6000), 2, move |p, n| {
            // The record is already gone; a nested release of the same address
            // falls through instead of deadlocking.
            let again = unsafe { inner_registry.release(p, n) };
            *nested_result.lock().unwrap() = Some(again);
        })
        .unwrap();

    assert!(unsafe { registry.release(addr(0x6000), 2) });
    assert_eq!(*nested.lock().unwrap(), Some(false));
}

#[test]
fn test_callback_may_register_other_address() {
    let registry = Arc::new(BorrowRegistry::new());
    let inner_registry = registry.clone();
    registry
        .register(addr(0x7000), 1, move |_, _| {
            inner_registry.register(addr(0x7100), 1, |_, _| {}).unwrap();
        })
        .unwrap();

    assert!(unsafe { registry.release(addr(0x7000), 1) });
    assert!(registry.contains(addr(0x7100)));
    assert!(!registry.contains(addr(0x7000)));
}

#[test]
fn test_reregister_after_release() {
    let registry = BorrowRegistry::new();
    let calls = Arc::new(AtomicUsize::new(0));
    for _ in 0..3 {
        registry
            .register(addr(0x8000), 3, counting_callback(&calls))
            .unwrap();
        assert!(unsafe { registry.release(addr(0x8000), 3) });
    }
    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert!(registry.is_empty());
}

#[test]
fn test_drop_with_outstanding_borrows_skips_callbacks() {
    let calls = Arc::new(AtomicUsize::new(0));
    {
        let registry = BorrowRegistry::new();
        registry
            .register(addr(0x9000), 1, counting_callback(&calls))
            .unwrap();
    }
    assert_eq!(calls.load(Ordering::SeqCst), 0);
}

#[test]
fn test_global_registry_is_shared() {
    let a = BorrowRegistry::global();
    let b = BorrowRegistry::global();
    assert!(Arc::ptr_eq(a, b));
}

#[test]
fn test_concurrent_register_release() {
    const THREADS: usize = 8;
    const PER_THREAD: usize = 500;

    let registry = Arc::new(BorrowRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));

    let handles = (0..THREADS)
        .map(|t| {
            let registry = registry.clone();
            let calls = calls.clone();
            std::thread::spawn(move || {
                let mut rng = fastrand::Rng::with_seed(t as u64);
                let mut live = Vec::new();
                for i in 0..PER_THREAD {
                    let p = addr(0x10_0000 + (t * PER_THREAD + i) * 16);
                    registry.register(p, i, counting_callback(&calls)).unwrap();
                    live.push(p);
                    if rng.bool() {
                        let victim = live.swap_remove(rng.usize(..live.len()));
                        assert!(unsafe { registry.release(victim, 0) });
                    }
                }
                for p in live {
                    assert!(unsafe { registry.release(p, 0) });
                }
            })
        })
        .collect::<Vec<_>>();

    for h in handles {
        h.join().unwrap();
    }

    assert!(registry.is_empty());
    assert_eq!(calls.load(Ordering::SeqCst), THREADS * PER_THREAD);
}

#[test]
fn test_concurrent_release_of_same_address() {
    let registry = Arc::new(BorrowRegistry::new());
    let calls = Arc::new(AtomicUsize::new(0));
    for round in 0..100 {
        let a = 0x20_0000 + round * 8;
        registry.register(addr(a), 1, counting_callback(&calls)).unwrap();

        let handles = (0..4)
            .map(|_| {
                let registry = registry.clone();
                std::thread::spawn(move || unsafe { registry.release(addr(a), 1) })
            })
            .collect::<Vec<_>>();
        let released = handles
            .into_iter()
            .map(|h| h.join().unwrap())
            .filter(|&r| r)
            .count();
        assert_eq!(released, 1);
    }
    assert_eq!(calls.load(Ordering::SeqCst), 100);
}
