use std::sync::Arc;
use std::time::Duration;
use anyhow::Result;

use sirindb::common::types::Rid;
use sirindb::transaction::{
    IsolationLevel, LockManager, LockManagerConfig, TransactionError, TransactionState,
};

mod common;
use common::open_test_database;

fn fast_detector() -> LockManagerConfig {
    LockManagerConfig {
        cycle_detection_interval: Duration::from_millis(10),
    }
}

#[test]
fn test_two_phase_deadlock_victim_and_survivor() -> Result<()> {
    let (_temp_file, path) = common::create_temp_db_file()?;
    let db = sirindb::Database::open_with_config(path, 16, fast_detector())?;

    let t1 = db.begin(IsolationLevel::RepeatableRead);
    let t2 = db.begin(IsolationLevel::RepeatableRead);
    let rid_a = Rid::new(0, 0);
    let rid_b = Rid::new(0, 1);

    let lm = db.lock_manager().clone();
    lm.lock_exclusive(&t1, rid_a)?;
    lm.lock_exclusive(&t2, rid_b)?;

    let lm1 = lm.clone();
    let t1c = t1.clone();
    let survivor = std::thread::spawn(move || lm1.lock_exclusive(&t1c, rid_b));

    // T1 -> T2 -> T1 forms the cycle; T2 has the larger id and loses.
    let result = lm.lock_exclusive(&t2, rid_a);
    assert!(matches!(result, Err(TransactionError::Deadlock(_))));
    assert_eq!(t2.state(), TransactionState::Aborted);

    // Aborting the victim through the manager releases its locks,
    // unblocking the survivor, which then commits normally.
    db.abort(&t2)?;
    survivor.join().unwrap()?;
    db.commit(&t1)?;
    assert_eq!(t1.state(), TransactionState::Committed);
    Ok(())
}

#[test]
fn test_upgrade_waits_for_second_reader() -> Result<()> {
    let (db, _temp_file) = open_test_database(16)?;
    let lm = db.lock_manager().clone();

    let t1 = db.begin(IsolationLevel::RepeatableRead);
    let t2 = db.begin(IsolationLevel::RepeatableRead);
    let rid = Rid::new(0, 7);

    lm.lock_shared(&t1, rid)?;
    lm.lock_shared(&t2, rid)?;

    let lm1 = lm.clone();
    let t1c = t1.clone();
    let upgrader = std::thread::spawn(move || lm1.lock_upgrade(&t1c, rid));

    std::thread::sleep(Duration::from_millis(50));
    assert!(!upgrader.is_finished(), "upgrade must wait for T2's read lock");

    lm.unlock(&t2, rid)?;
    upgrader.join().unwrap()?;
    assert!(t1.is_exclusive_locked(rid));

    db.commit(&t1)?;
    db.commit(&t2)?;
    Ok(())
}

#[test]
fn test_read_uncommitted_cannot_share_lock() -> Result<()> {
    let (db, _temp_file) = open_test_database(16)?;
    let txn = db.begin(IsolationLevel::ReadUncommitted);
    let rid = Rid::new(0, 0);

    let err = db.lock_manager().lock_shared(&txn, rid).unwrap_err();
    assert!(matches!(err, TransactionError::LockOnReadUncommitted(_)));
    assert_eq!(txn.state(), TransactionState::Aborted);
    db.abort(&txn)?;
    Ok(())
}

#[test]
fn test_commit_releases_everything() -> Result<()> {
    let (db, _temp_file) = open_test_database(16)?;
    let lm = db.lock_manager().clone();

    let t1 = db.begin(IsolationLevel::RepeatableRead);
    let rids: Vec<Rid> = (0..5).map(|i| Rid::new(0, i)).collect();
    for &rid in &rids {
        lm.lock_exclusive(&t1, rid)?;
    }
    db.commit(&t1)?;
    assert!(t1.locked_rids().is_empty());

    // A later transaction acquires the same RIDs without blocking.
    let t2 = db.begin(IsolationLevel::RepeatableRead);
    for &rid in &rids {
        lm.lock_exclusive(&t2, rid)?;
    }
    db.commit(&t2)?;
    Ok(())
}

#[test]
fn test_no_conflicting_holds_under_contention() -> Result<()> {
    use std::sync::atomic::{AtomicU32, Ordering};

    let (_temp_file, path) = common::create_temp_db_file()?;
    let db = Arc::new(sirindb::Database::open_with_config(path, 16, fast_detector())?);
    let rid = Rid::new(3, 3);
    let holders = Arc::new(AtomicU32::new(0));

    std::thread::scope(|scope| {
        for _ in 0..8 {
            let db = db.clone();
            let holders = holders.clone();
            scope.spawn(move || {
                for _ in 0..20 {
                    let txn = db.begin(IsolationLevel::RepeatableRead);
                    match db.lock_manager().lock_exclusive(&txn, rid) {
                        Ok(()) => {
                            // Exactly one exclusive holder at any moment.
                            assert_eq!(holders.fetch_add(1, Ordering::SeqCst), 0);
                            std::thread::sleep(Duration::from_micros(200));
                            holders.fetch_sub(1, Ordering::SeqCst);
                            db.commit(&txn).unwrap();
                        }
                        Err(_) => {
                            db.abort(&txn).unwrap();
                        }
                    }
                }
            });
        }
    });
    Ok(())
}
