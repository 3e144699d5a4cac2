//! Tests for the per-worker session pool

use conduit::proxy::pool::SessionPool;

#[test]
fn test_acquire_up_to_capacity() {
    let pool = SessionPool::new(2);
    assert_eq!(pool.capacity(), 2);
    assert_eq!(pool.free_slots(), 2);

    let first = pool.acquire().unwrap();
    let second = pool.acquire().unwrap();
    assert_eq!(pool.free_slots(), 0);

    assert!(pool.acquire().is_err());

    drop(first);
    drop(second);
    assert_eq!(pool.free_slots(), 2);
}

#[test]
fn test_exhaustion_is_distinguishable() {
    let pool = SessionPool::new(1);
    let _held = pool.acquire().unwrap();
    let err = pool.acquire().unwrap_err();
    assert_eq!(err.to_string(), "session pool exhausted");
}

#[test]
fn test_slot_returns_on_drop() {
    let pool = SessionPool::new(1);
    for _ in 0..10 {
        let permit = pool.acquire().unwrap();
        assert_eq!(pool.free_slots(), 0);
        drop(permit);
        assert_eq!(pool.free_slots(), 1);
    }
}
