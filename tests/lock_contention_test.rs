//! Two watchdogs racing for the same lock file.

mod common;

use common::FakeHost;
use std::sync::{Arc, Barrier};
use std::thread;
use tempfile::TempDir;
use vigil::{HostOs, LockManager, LockOutcome};

const ROUNDS: usize = 200;

fn contender(
    dir: Arc<TempDir>,
    host: Arc<dyn HostOs>,
    own_pid: u32,
    barrier: Arc<Barrier>,
) -> thread::JoinHandle<Vec<bool>> {
    thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();
        let mut won = Vec::with_capacity(ROUNDS);
        for round in 0..ROUNDS {
            let path = dir.path().join(format!("round-{}.lock", round));
            let manager = LockManager::new(&path, host.clone()).with_own_pid(own_pid);

            barrier.wait();
            let outcome = rt.block_on(manager.try_acquire()).unwrap();
            // Hold any guard until both sides have tried.
            barrier.wait();
            won.push(matches!(outcome, LockOutcome::Acquired(_)));
            drop(outcome);
            barrier.wait();
        }
        won
    })
}

#[test]
fn test_exactly_one_of_two_simultaneous_watchdogs_gets_the_lock() {
    let dir = Arc::new(TempDir::new().unwrap());
    // Neither pid is alive, so only the file lock can keep the loser out.
    let host: Arc<dyn HostOs> = FakeHost::new();
    let barrier = Arc::new(Barrier::new(2));

    let first = contender(dir.clone(), host.clone(), 100, barrier.clone());
    let second = contender(dir.clone(), host.clone(), 200, barrier.clone());
    let first = first.join().unwrap();
    let second = second.join().unwrap();

    for round in 0..ROUNDS {
        assert!(
            first[round] ^ second[round],
            "round {}: first acquired {}, second acquired {}",
            round,
            first[round],
            second[round]
        );
    }
}

#[test]
fn test_released_lock_can_be_taken_by_the_next_watchdog() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("app-watchdog.lock");
    let host: Arc<dyn HostOs> = FakeHost::new();
    let rt = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap();

    let first = LockManager::new(&path, host.clone()).with_own_pid(100);
    let second = LockManager::new(&path, host.clone()).with_own_pid(200);

    let guard = match rt.block_on(first.try_acquire()).unwrap() {
        LockOutcome::Acquired(guard) => guard,
        LockOutcome::HeldBy { pid } => panic!("fresh lock held by {:?}", pid),
    };
    assert!(matches!(
        rt.block_on(second.try_acquire()).unwrap(),
        LockOutcome::HeldBy { pid: Some(100) }
    ));

    drop(guard);
    match rt.block_on(second.try_acquire()).unwrap() {
        LockOutcome::Acquired(guard) => {
            assert!(guard.still_owned());
            assert_eq!(std::fs::read_to_string(&path).unwrap(), "200");
        }
        LockOutcome::HeldBy { pid } => panic!("released lock still held by {:?}", pid),
    }
}
