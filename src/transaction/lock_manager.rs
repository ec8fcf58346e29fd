use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;
use parking_lot::{Condvar, Mutex};
use log::{debug, info};

use crate::common::types::{Rid, TxnId};
use crate::transaction::transaction::{
    IsolationLevel, Transaction, TransactionError, TransactionState,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LockMode {
    Shared,
    Exclusive,
}

struct LockRequest {
    txn_id: TxnId,
    mode: LockMode,
    granted: bool,
}

/// Per-RID FIFO request queue. Waiters block on the queue's condition
/// variable; at most one lock upgrade may be in flight per RID.
struct LockQueue {
    requests: VecDeque<LockRequest>,
    cv: Arc<Condvar>,
    upgrading: Option<TxnId>,
}

impl LockQueue {
    fn new() -> Self {
        Self {
            requests: VecDeque::new(),
            cv: Arc::new(Condvar::new()),
            upgrading: None,
        }
    }

    fn has_granted_exclusive(&self) -> bool {
        self.requests
            .iter()
            .any(|r| r.granted && r.mode == LockMode::Exclusive)
    }

    fn has_granted_any(&self) -> bool {
        self.requests.iter().any(|r| r.granted)
    }

    fn has_granted_other(&self, me: TxnId) -> bool {
        self.requests.iter().any(|r| r.granted && r.txn_id != me)
    }

    fn remove_request(&mut self, txn_id: TxnId) {
        if let Some(pos) = self.requests.iter().position(|r| r.txn_id == txn_id) {
            self.requests.remove(pos);
        }
    }
}

/// Everything the lock manager mutates, behind one mutex.
struct LockTables {
    lock_table: HashMap<Rid, LockQueue>,
    /// waiter -> transactions currently blocking it
    waits_for: HashMap<TxnId, Vec<TxnId>>,
    /// waiter -> the RID it is blocked on
    wait_rid: HashMap<TxnId, Rid>,
    /// victims flagged by the detector, cleared by the waiter on wake
    abort_marks: HashSet<TxnId>,
}

impl LockTables {
    fn queue_mut(&mut self, rid: Rid) -> &mut LockQueue {
        self.lock_table.entry(rid).or_insert_with(LockQueue::new)
    }

    /// Record who `me` is waiting on at `rid`, for the detector's graph.
    fn record_wait(&mut self, rid: Rid, me: TxnId) {
        let queue = self.queue_mut(rid);
        let mut holders: Vec<TxnId> = queue
            .requests
            .iter()
            .filter(|r| r.granted && r.txn_id != me)
            .map(|r| r.txn_id)
            .collect();
        if let Some(upgrader) = queue.upgrading {
            if upgrader != me {
                holders.push(upgrader);
            }
        }
        self.waits_for.insert(me, holders);
        self.wait_rid.insert(me, rid);
    }

    fn grant(&mut self, rid: Rid, txn_id: TxnId) {
        let queue = self.queue_mut(rid);
        if let Some(request) = queue.requests.iter_mut().find(|r| r.txn_id == txn_id) {
            request.granted = true;
        }
    }
}

pub struct LockManagerConfig {
    pub cycle_detection_interval: Duration,
}

impl Default for LockManagerConfig {
    fn default() -> Self {
        Self {
            cycle_detection_interval: Duration::from_millis(50),
        }
    }
}

struct LockManagerCore {
    tables: Mutex<LockTables>,
    /// Shutdown flag plus a condvar so `Drop` never waits out a full
    /// detection interval.
    shutdown: Mutex<bool>,
    shutdown_cv: Condvar,
    interval: Duration,
}

/// Strict two-phase lock manager over record ids, with shared/exclusive
/// modes, atomic upgrades, and a background waits-for deadlock detector
/// that aborts the youngest transaction of each cycle.
pub struct LockManager {
    core: Arc<LockManagerCore>,
    detector: Mutex<Option<JoinHandle<()>>>,
}

impl LockManager {
    pub fn new(config: LockManagerConfig) -> Self {
        let core = Arc::new(LockManagerCore {
            tables: Mutex::new(LockTables {
                lock_table: HashMap::new(),
                waits_for: HashMap::new(),
                wait_rid: HashMap::new(),
                abort_marks: HashSet::new(),
            }),
            shutdown: Mutex::new(false),
            shutdown_cv: Condvar::new(),
            interval: config.cycle_detection_interval,
        });

        let detector_core = core.clone();
        let handle = std::thread::spawn(move || Self::run_cycle_detection(detector_core));
        info!("deadlock detection thread launched");

        Self {
            core,
            detector: Mutex::new(Some(handle)),
        }
    }

    /// Acquire a shared lock. Blocks while an exclusive lock is granted or
    /// an upgrade is in flight on the RID.
    pub fn lock_shared(&self, txn: &Transaction, rid: Rid) -> Result<(), TransactionError> {
        let mut tables = self.core.tables.lock();

        self.check_growing(txn)?;
        if txn.isolation_level() == IsolationLevel::ReadUncommitted {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::LockOnReadUncommitted(txn.id()));
        }
        if txn.is_shared_locked(rid) || txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        tables.queue_mut(rid).requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Shared,
            granted: false,
        });

        loop {
            let queue = tables.queue_mut(rid);
            let blocked = queue.upgrading.is_some() || queue.has_granted_exclusive();
            if !blocked {
                break;
            }
            self.wait_on(&mut tables, rid, txn)?;
        }

        tables.wait_rid.remove(&txn.id());
        tables.grant(rid, txn.id());
        txn.add_shared_lock(rid);
        Ok(())
    }

    /// Acquire an exclusive lock. Blocks while any lock is granted or an
    /// upgrade is in flight on the RID.
    pub fn lock_exclusive(&self, txn: &Transaction, rid: Rid) -> Result<(), TransactionError> {
        let mut tables = self.core.tables.lock();

        self.check_growing(txn)?;
        if txn.is_exclusive_locked(rid) {
            return Ok(());
        }

        tables.queue_mut(rid).requests.push_back(LockRequest {
            txn_id: txn.id(),
            mode: LockMode::Exclusive,
            granted: false,
        });

        loop {
            let queue = tables.queue_mut(rid);
            let blocked = queue.upgrading.is_some() || queue.has_granted_any();
            if !blocked {
                break;
            }
            self.wait_on(&mut tables, rid, txn)?;
        }

        tables.wait_rid.remove(&txn.id());
        tables.grant(rid, txn.id());
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Upgrade a held shared lock to exclusive. The shared grant stays in
    /// place until the exclusive grant is ready, then the entry swaps
    /// atomically under the manager mutex. One upgrade per RID at a time.
    pub fn lock_upgrade(&self, txn: &Transaction, rid: Rid) -> Result<(), TransactionError> {
        let mut tables = self.core.tables.lock();

        self.check_growing(txn)?;
        if !txn.is_shared_locked(rid) {
            return Err(TransactionError::LockNotHeld(txn.id()));
        }

        // Claim the RID's single upgrade slot.
        while tables.queue_mut(rid).upgrading.is_some() {
            if let Err(e) = self.wait_on(&mut tables, rid, txn) {
                // Our granted shared entry was removed by the detector.
                txn.remove_shared_lock(rid);
                return Err(e);
            }
        }
        tables.queue_mut(rid).upgrading = Some(txn.id());

        // Wait out every other granted holder.
        while tables.queue_mut(rid).has_granted_other(txn.id()) {
            if let Err(e) = self.wait_on(&mut tables, rid, txn) {
                let queue = tables.queue_mut(rid);
                if queue.upgrading == Some(txn.id()) {
                    queue.upgrading = None;
                }
                txn.remove_shared_lock(rid);
                return Err(e);
            }
        }

        tables.wait_rid.remove(&txn.id());
        let queue = tables.queue_mut(rid);
        if let Some(request) = queue.requests.iter_mut().find(|r| r.txn_id == txn.id()) {
            request.mode = LockMode::Exclusive;
            request.granted = true;
        }
        queue.upgrading = None;
        queue.cv.notify_all();

        txn.remove_shared_lock(rid);
        txn.add_exclusive_lock(rid);
        Ok(())
    }

    /// Release a held lock. Under REPEATABLE_READ this moves a growing
    /// transaction into its shrinking phase; READ_COMMITTED may keep
    /// growing after an early shared release.
    pub fn unlock(&self, txn: &Transaction, rid: Rid) -> Result<(), TransactionError> {
        let mut tables = self.core.tables.lock();

        let held_shared = txn.remove_shared_lock(rid);
        let held_exclusive = txn.remove_exclusive_lock(rid);
        if !held_shared && !held_exclusive {
            return Err(TransactionError::LockNotHeld(txn.id()));
        }

        if txn.state() == TransactionState::Growing
            && txn.isolation_level() == IsolationLevel::RepeatableRead
        {
            txn.set_state(TransactionState::Shrinking);
        }

        if let Some(queue) = tables.lock_table.get_mut(&rid) {
            if queue.upgrading == Some(txn.id()) {
                queue.upgrading = None;
            }
            queue.remove_request(txn.id());
            queue.cv.notify_all();
        }

        Ok(())
    }

    fn check_growing(&self, txn: &Transaction) -> Result<(), TransactionError> {
        if txn.state() != TransactionState::Growing {
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::StateViolation(txn.id()));
        }
        Ok(())
    }

    /// Record wait edges, sleep on the RID's condvar, and handle a
    /// deadlock-victim flag on wake.
    fn wait_on(
        &self,
        tables: &mut parking_lot::MutexGuard<'_, LockTables>,
        rid: Rid,
        txn: &Transaction,
    ) -> Result<(), TransactionError> {
        tables.record_wait(rid, txn.id());
        let cv = tables.queue_mut(rid).cv.clone();
        cv.wait(tables);

        tables.waits_for.remove(&txn.id());
        if tables.abort_marks.remove(&txn.id()) {
            // The detector already removed our request and cleared our
            // upgrade claim; we only transition and bail out.
            tables.wait_rid.remove(&txn.id());
            txn.set_state(TransactionState::Aborted);
            return Err(TransactionError::Deadlock(txn.id()));
        }
        Ok(())
    }

    fn run_cycle_detection(core: Arc<LockManagerCore>) {
        info!("deadlock detection running");
        loop {
            {
                let mut stop = core.shutdown.lock();
                if !*stop {
                    core.shutdown_cv.wait_for(&mut stop, core.interval);
                }
                if *stop {
                    break;
                }
            }

            let mut tables = core.tables.lock();
            loop {
                let graph = Self::build_graph(&tables);
                let victim = match Self::find_cycle_victim(&graph) {
                    Some(v) => v,
                    None => break,
                };

                info!("waits-for cycle found, aborting youngest transaction {}", victim);
                tables.abort_marks.insert(victim);
                tables.waits_for.remove(&victim);
                for holders in tables.waits_for.values_mut() {
                    holders.retain(|&t| t != victim);
                }

                if let Some(rid) = tables.wait_rid.remove(&victim) {
                    if let Some(queue) = tables.lock_table.get_mut(&rid) {
                        if queue.upgrading == Some(victim) {
                            queue.upgrading = None;
                        }
                        queue.remove_request(victim);
                        queue.cv.notify_all();
                    }
                }
            }
        }
        info!("deadlock detection stopped");
    }

    /// Sparse adjacency map, keyed and ordered by txn id so every detector
    /// tick walks the graph deterministically.
    fn build_graph(tables: &LockTables) -> BTreeMap<TxnId, BTreeSet<TxnId>> {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        for (&waiter, holders) in &tables.waits_for {
            for &holder in holders {
                graph.entry(waiter).or_default().insert(holder);
            }
        }
        graph
    }

    /// DFS from each node in ascending id order; on the first cycle found,
    /// the youngest (maximum id) member is the victim.
    fn find_cycle_victim(graph: &BTreeMap<TxnId, BTreeSet<TxnId>>) -> Option<TxnId> {
        fn dfs(
            graph: &BTreeMap<TxnId, BTreeSet<TxnId>>,
            node: TxnId,
            visited: &mut HashSet<TxnId>,
            stack: &mut Vec<TxnId>,
            on_stack: &mut HashSet<TxnId>,
        ) -> Option<TxnId> {
            visited.insert(node);
            stack.push(node);
            on_stack.insert(node);

            if let Some(nexts) = graph.get(&node) {
                for &next in nexts {
                    if on_stack.contains(&next) {
                        let start = stack
                            .iter()
                            .position(|&n| n == next)
                            .expect("cycle entry must be on the stack");
                        return stack[start..].iter().copied().max();
                    }
                    if !visited.contains(&next) {
                        if let Some(victim) = dfs(graph, next, visited, stack, on_stack) {
                            return Some(victim);
                        }
                    }
                }
            }

            stack.pop();
            on_stack.remove(&node);
            None
        }

        let mut visited = HashSet::new();
        for &node in graph.keys() {
            if visited.contains(&node) {
                continue;
            }
            let mut stack = Vec::new();
            let mut on_stack = HashSet::new();
            if let Some(victim) = dfs(graph, node, &mut visited, &mut stack, &mut on_stack) {
                return Some(victim);
            }
        }
        None
    }

    #[cfg(test)]
    fn edge_list(&self) -> Vec<(TxnId, TxnId)> {
        let tables = self.core.tables.lock();
        let mut edges = Vec::new();
        for (&waiter, holders) in &tables.waits_for {
            for &holder in holders {
                edges.push((waiter, holder));
            }
        }
        edges.sort_unstable();
        edges
    }
}

impl Drop for LockManager {
    fn drop(&mut self) {
        *self.core.shutdown.lock() = true;
        self.core.shutdown_cv.notify_all();
        if let Some(handle) = self.detector.lock().take() {
            let _ = handle.join();
        }
        debug!("lock manager shut down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn make_lock_manager() -> LockManager {
        LockManager::new(LockManagerConfig {
            cycle_detection_interval: Duration::from_millis(10),
        })
    }

    #[test]
    fn test_shared_locks_are_compatible() {
        let lm = make_lock_manager();
        let t1 = Transaction::new(1, IsolationLevel::RepeatableRead);
        let t2 = Transaction::new(2, IsolationLevel::RepeatableRead);
        let rid = Rid::new(0, 0);

        lm.lock_shared(&t1, rid).unwrap();
        lm.lock_shared(&t2, rid).unwrap();
        assert!(t1.is_shared_locked(rid));
        assert!(t2.is_shared_locked(rid));

        lm.unlock(&t1, rid).unwrap();
        lm.unlock(&t2, rid).unwrap();
        assert_eq!(t1.state(), TransactionState::Shrinking);
    }

    #[test]
    fn test_read_uncommitted_rejects_shared() {
        let lm = make_lock_manager();
        let txn = Transaction::new(1, IsolationLevel::ReadUncommitted);
        let rid = Rid::new(0, 0);

        let err = lm.lock_shared(&txn, rid).unwrap_err();
        assert!(matches!(err, TransactionError::LockOnReadUncommitted(1)));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_lock_after_shrinking_aborts() {
        let lm = make_lock_manager();
        let txn = Transaction::new(1, IsolationLevel::RepeatableRead);
        let rid_a = Rid::new(0, 0);
        let rid_b = Rid::new(0, 1);

        lm.lock_shared(&txn, rid_a).unwrap();
        lm.unlock(&txn, rid_a).unwrap();
        assert_eq!(txn.state(), TransactionState::Shrinking);

        let err = lm.lock_shared(&txn, rid_b).unwrap_err();
        assert!(matches!(err, TransactionError::StateViolation(1)));
        assert_eq!(txn.state(), TransactionState::Aborted);
    }

    #[test]
    fn test_exclusive_blocks_until_release() {
        use std::sync::Arc as StdArc;

        let lm = StdArc::new(make_lock_manager());
        let t1 = StdArc::new(Transaction::new(1, IsolationLevel::RepeatableRead));
        let t2 = StdArc::new(Transaction::new(2, IsolationLevel::RepeatableRead));
        let rid = Rid::new(0, 0);

        lm.lock_exclusive(&t1, rid).unwrap();

        let lm2 = lm.clone();
        let t2c = t2.clone();
        let waiter = std::thread::spawn(move || lm2.lock_exclusive(&t2c, rid));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!waiter.is_finished());

        lm.unlock(&t1, rid).unwrap();
        waiter.join().unwrap().unwrap();
        assert!(t2.is_exclusive_locked(rid));
        lm.unlock(&t2, rid).unwrap();
    }

    #[test]
    fn test_upgrade_waits_for_other_readers() {
        use std::sync::Arc as StdArc;

        let lm = StdArc::new(make_lock_manager());
        let t1 = StdArc::new(Transaction::new(1, IsolationLevel::RepeatableRead));
        let t2 = StdArc::new(Transaction::new(2, IsolationLevel::RepeatableRead));
        let rid = Rid::new(0, 0);

        lm.lock_shared(&t1, rid).unwrap();
        lm.lock_shared(&t2, rid).unwrap();

        let lm2 = lm.clone();
        let t1c = t1.clone();
        let upgrader = std::thread::spawn(move || lm2.lock_upgrade(&t1c, rid));

        std::thread::sleep(Duration::from_millis(30));
        assert!(!upgrader.is_finished());

        lm.unlock(&t2, rid).unwrap();
        upgrader.join().unwrap().unwrap();
        assert!(t1.is_exclusive_locked(rid));
        assert!(!t1.is_shared_locked(rid));
        lm.unlock(&t1, rid).unwrap();
    }

    #[test]
    fn test_deadlock_aborts_youngest() {
        use std::sync::Arc as StdArc;

        let lm = StdArc::new(make_lock_manager());
        let t1 = StdArc::new(Transaction::new(1, IsolationLevel::RepeatableRead));
        let t2 = StdArc::new(Transaction::new(2, IsolationLevel::RepeatableRead));
        let rid_a = Rid::new(0, 0);
        let rid_b = Rid::new(0, 1);

        lm.lock_exclusive(&t1, rid_a).unwrap();
        lm.lock_exclusive(&t2, rid_b).unwrap();

        let lm1 = lm.clone();
        let t1c = t1.clone();
        let h1 = std::thread::spawn(move || lm1.lock_exclusive(&t1c, rid_b));

        let lm2 = lm.clone();
        let t2c = t2.clone();
        let h2 = std::thread::spawn(move || lm2.lock_exclusive(&t2c, rid_a));

        // T2 is the youngest member of the cycle and must be the victim.
        let r2 = h2.join().unwrap();
        assert!(matches!(r2, Err(TransactionError::Deadlock(2))));
        assert_eq!(t2.state(), TransactionState::Aborted);

        // Release the victim's held locks, as the transaction manager's
        // abort path would; the survivor then completes.
        for rid in t2.locked_rids() {
            lm.unlock(&t2, rid).unwrap();
        }
        let r1 = h1.join().unwrap();
        assert!(r1.is_ok());

        lm.unlock(&t1, rid_a).unwrap();
        lm.unlock(&t1, rid_b).unwrap();
    }

    #[test]
    fn test_cycle_victim_is_max_id() {
        let mut graph: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        graph.entry(1).or_default().insert(2);
        graph.entry(2).or_default().insert(3);
        graph.entry(3).or_default().insert(1);
        assert_eq!(LockManager::find_cycle_victim(&graph), Some(3));

        let mut acyclic: BTreeMap<TxnId, BTreeSet<TxnId>> = BTreeMap::new();
        acyclic.entry(1).or_default().insert(2);
        acyclic.entry(2).or_default().insert(3);
        assert_eq!(LockManager::find_cycle_victim(&acyclic), None);
    }

    #[test]
    fn test_wait_edges_recorded() {
        use std::sync::Arc as StdArc;

        let lm = StdArc::new(LockManager::new(LockManagerConfig {
            cycle_detection_interval: Duration::from_secs(3600),
        }));
        let t1 = StdArc::new(Transaction::new(1, IsolationLevel::RepeatableRead));
        let t2 = StdArc::new(Transaction::new(2, IsolationLevel::RepeatableRead));
        let rid = Rid::new(0, 0);

        lm.lock_exclusive(&t1, rid).unwrap();

        let lm2 = lm.clone();
        let t2c = t2.clone();
        let waiter = std::thread::spawn(move || lm2.lock_exclusive(&t2c, rid));

        std::thread::sleep(Duration::from_millis(30));
        assert_eq!(lm.edge_list(), vec![(2, 1)]);

        lm.unlock(&t1, rid).unwrap();
        waiter.join().unwrap().unwrap();
        lm.unlock(&t2, rid).unwrap();
    }
}
