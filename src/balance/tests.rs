use super::*;
use std::collections::HashMap;
use std::sync::Arc;

#[test]
fn test_round_robin_cycles_from_start() {
    let rr = RoundRobinStrategy::new(1, 4);
    let seq: Vec<usize> = (0..9).map(|_| rr.acquire()).collect();
    assert_eq!(seq, vec![1, 2, 3, 4, 1, 2, 3, 4, 1]);
}

#[test]
fn test_round_robin_first_acquire_returns_start() {
    let rr = RoundRobinStrategy::new(5, 7);
    assert_eq!(rr.acquire(), 5);
    assert_eq!(rr.acquire(), 6);
}

#[test]
fn test_round_robin_single_slot() {
    let rr = RoundRobinStrategy::new(5, 5);
    for _ in 0..3 {
        assert_eq!(rr.acquire(), 5);
    }
}

#[test]
fn test_round_robin_zero_based_range() {
    let rr = RoundRobinStrategy::new(0, 2);
    let seq: Vec<usize> = (0..4).map(|_| rr.acquire()).collect();
    assert_eq!(seq, vec![0, 1, 2, 0]);
}

#[test]
fn test_round_robin_concurrent_callers_share_slots_evenly() {
    const SLOTS: usize = 8;
    const THREADS: usize = 8;
    const PER_THREAD: usize = 1_000;

    let rr = Arc::new(RoundRobinStrategy::new(1, SLOTS));
    let handles: Vec<_> = (0..THREADS)
        .map(|_| {
            let rr = Arc::clone(&rr);
            std::thread::spawn(move || (0..PER_THREAD).map(|_| rr.acquire()).collect::<Vec<_>>())
        })
        .collect();

    let mut counts: HashMap<usize, usize> = HashMap::new();
    for h in handles {
        for slot in h.join().unwrap() {
            assert!((1..=SLOTS).contains(&slot));
            *counts.entry(slot).or_default() += 1;
        }
    }

    // Every successful CAS installs exactly one step of the cycle, so the
    // total number of calls divides evenly across slots.
    let expected = THREADS * PER_THREAD / SLOTS;
    for slot in 1..=SLOTS {
        assert_eq!(counts.get(&slot).copied().unwrap_or(0), expected, "slot {slot}");
    }
}

#[test]
fn test_round_robin_concurrent_single_calls_no_duplicate_wins() {
    const SLOTS: usize = 16;
    let rr = Arc::new(RoundRobinStrategy::new(1, SLOTS));
    let handles: Vec<_> = (0..SLOTS)
        .map(|_| {
            let rr = Arc::clone(&rr);
            std::thread::spawn(move || rr.acquire())
        })
        .collect();

    let mut seen: Vec<usize> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    seen.sort_unstable();
    assert_eq!(seen, (1..=SLOTS).collect::<Vec<_>>());
}

#[test]
fn test_random_stays_in_inclusive_range() {
    let strategy = RandomStrategy::new(1, 3);
    let mut hit_end = false;
    for _ in 0..2_000 {
        let slot = strategy.acquire();
        assert!((1..=3).contains(&slot));
        hit_end |= slot == 3;
    }
    assert!(hit_end, "upper bound must be reachable");
}

#[test]
fn test_kind_from_str() {
    assert_eq!("RoundRobin".parse::<LoadBalanceKind>(), Ok(LoadBalanceKind::RoundRobin));
    assert_eq!("Random".parse::<LoadBalanceKind>(), Ok(LoadBalanceKind::Random));
    assert_eq!(
        "roundrobin".parse::<LoadBalanceKind>(),
        Err(UnknownStrategy("roundrobin".to_string()))
    );
    assert!("".parse::<LoadBalanceKind>().is_err());
}

#[test]
fn test_kind_build() {
    let rr = LoadBalanceKind::RoundRobin.build(1, 2);
    assert_eq!(rr.acquire(), 1);
    assert_eq!(rr.acquire(), 2);

    let random = LoadBalanceKind::Random.build(7, 7);
    assert_eq!(random.acquire(), 7);
}
