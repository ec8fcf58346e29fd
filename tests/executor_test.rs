use std::sync::Arc;
use anyhow::Result;

use sirindb::catalog::{Column, DataType, Schema};
use sirindb::query::executor::operators::{
    AggregateFn, AggregationExecutor, DeleteExecutor, FilterExecutor, IndexScanExecutor,
    InsertExecutor, LimitExecutor, NestedIndexJoinExecutor, NestedLoopJoinExecutor,
    ProjectionExecutor, SeqScanExecutor, UpdateExecutor,
};
use sirindb::query::executor::{Executor, ExecutionError, Predicate, UpdateFn};
use sirindb::storage::table::{Tuple, Value};
use sirindb::transaction::IsolationLevel;

mod common;
use common::{open_test_database, people_schema};

fn person(id: i64, name: &str, active: bool) -> Tuple {
    Tuple::new(vec![
        Value::Integer(id),
        Value::Text(name.to_string()),
        Value::Boolean(active),
    ])
}

fn drain(executor: &mut dyn Executor) -> Result<Vec<Tuple>> {
    executor.init()?;
    let mut rows = Vec::new();
    while let Some((tuple, _)) = executor.next()? {
        rows.push(tuple);
    }
    Ok(rows)
}

#[test]
fn test_insert_then_seq_scan() -> Result<()> {
    let (db, _temp_file) = open_test_database(32)?;
    db.catalog().create_table("people", people_schema())?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let rows = vec![
        person(1, "ada", true),
        person(2, "grace", true),
        person(3, "edsger", false),
    ];
    let mut insert = InsertExecutor::from_rows(ctx.clone(), "people", rows);
    assert_eq!(drain(&mut insert)?.len(), 3);

    let predicate: Predicate = Arc::new(|t: &Tuple| {
        matches!(t.value_at(2), Ok(Value::Boolean(true)))
    });
    let mut scan = SeqScanExecutor::new(ctx, "people", Some(predicate));
    let result = drain(&mut scan)?;
    assert_eq!(result.len(), 2);
    assert_eq!(result[0], person(1, "ada", true));

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_repeatable_read_keeps_locks_read_committed_drops_them() -> Result<()> {
    let (db, _temp_file) = open_test_database(32)?;
    db.catalog().create_table("people", people_schema())?;

    let setup = db.begin(IsolationLevel::RepeatableRead);
    let mut insert = InsertExecutor::from_rows(
        db.executor_context(setup.clone()),
        "people",
        vec![person(1, "ada", true), person(2, "grace", true)],
    );
    drain(&mut insert)?;
    db.commit(&setup)?;

    let rr = db.begin(IsolationLevel::RepeatableRead);
    let mut scan = SeqScanExecutor::new(db.executor_context(rr.clone()), "people", None);
    drain(&mut scan)?;
    assert_eq!(rr.locked_rids().len(), 2, "RR holds a shared lock per visited row");
    db.commit(&rr)?;

    let rc = db.begin(IsolationLevel::ReadCommitted);
    let mut scan = SeqScanExecutor::new(db.executor_context(rc.clone()), "people", None);
    drain(&mut scan)?;
    assert!(rc.locked_rids().is_empty(), "RC releases shared locks after the predicate");
    db.commit(&rc)?;
    Ok(())
}

#[test]
fn test_index_scan_range() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    db.catalog().create_table("people", people_schema())?;
    db.catalog().create_index("people_id", "people", vec![0])?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let rows: Vec<Tuple> = (1..=20).map(|i| person(i, "p", true)).collect();
    let mut insert = InsertExecutor::from_rows(ctx.clone(), "people", rows);
    drain(&mut insert)?;

    let mut scan = IndexScanExecutor::new(ctx, "people", "people_id", Some(5), Some(9), None);
    let result = drain(&mut scan)?;
    let ids: Vec<i64> = result
        .iter()
        .map(|t| t.value_at(0).unwrap().as_integer().unwrap())
        .collect();
    assert_eq!(ids, vec![5, 6, 7, 8, 9]);

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_duplicate_key_rejected() -> Result<()> {
    let (db, _temp_file) = open_test_database(32)?;
    db.catalog().create_table("people", people_schema())?;
    db.catalog().create_index("people_id", "people", vec![0])?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let mut insert = InsertExecutor::from_rows(
        ctx,
        "people",
        vec![person(1, "ada", true), person(1, "imposter", true)],
    );
    insert.init()?;
    assert!(insert.next()?.is_some());
    assert!(matches!(insert.next(), Err(ExecutionError::DuplicateKey)));

    db.abort(&txn)?;
    Ok(())
}

#[test]
fn test_update_rewrites_row_and_index() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    db.catalog().create_table("people", people_schema())?;
    db.catalog().create_index("people_id", "people", vec![0])?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let mut insert = InsertExecutor::from_rows(
        ctx.clone(),
        "people",
        vec![person(1, "ada", true), person(2, "grace", true)],
    );
    drain(&mut insert)?;

    // Flip id 2 to id 20; the index must follow.
    let update_fn: UpdateFn = Arc::new(|t: &Tuple| {
        let id = t.value_at(0).unwrap().as_integer().unwrap();
        if id == 2 {
            Tuple::new(vec![
                Value::Integer(20),
                t.value_at(1).unwrap().clone(),
                t.value_at(2).unwrap().clone(),
            ])
        } else {
            t.clone()
        }
    });
    let child = Box::new(SeqScanExecutor::new(ctx.clone(), "people", None));
    let mut update = UpdateExecutor::new(ctx.clone(), "people", update_fn, child);
    assert_eq!(drain(&mut update)?.len(), 2);

    let mut by_old = IndexScanExecutor::new(ctx.clone(), "people", "people_id", Some(2), Some(2), None);
    assert!(drain(&mut by_old)?.is_empty());

    let mut by_new = IndexScanExecutor::new(ctx, "people", "people_id", Some(20), Some(20), None);
    let found = drain(&mut by_new)?;
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].value_at(1)?, &Value::Text("grace".to_string()));

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_delete_hides_rows() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    db.catalog().create_table("people", people_schema())?;
    db.catalog().create_index("people_id", "people", vec![0])?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let rows: Vec<Tuple> = (1..=5).map(|i| person(i, "p", i % 2 == 0)).collect();
    let mut insert = InsertExecutor::from_rows(ctx.clone(), "people", rows);
    drain(&mut insert)?;

    // Delete the inactive rows.
    let predicate: Predicate = Arc::new(|t: &Tuple| {
        matches!(t.value_at(2), Ok(Value::Boolean(false)))
    });
    let child = Box::new(SeqScanExecutor::new(ctx.clone(), "people", Some(predicate)));
    let mut delete = DeleteExecutor::new(ctx.clone(), "people", child);
    assert_eq!(drain(&mut delete)?.len(), 3);

    let mut scan = SeqScanExecutor::new(ctx, "people", None);
    let remaining = drain(&mut scan)?;
    let ids: Vec<i64> = remaining
        .iter()
        .map(|t| t.value_at(0).unwrap().as_integer().unwrap())
        .collect();
    assert_eq!(ids, vec![2, 4]);

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_nested_loop_join() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    db.catalog().create_table("people", people_schema())?;
    let pets = Schema::new(vec![
        Column::new("owner_id", DataType::Integer),
        Column::new("pet", DataType::Text),
    ]);
    db.catalog().create_table("pets", pets)?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    drain(&mut InsertExecutor::from_rows(
        ctx.clone(),
        "people",
        vec![person(1, "ada", true), person(2, "grace", true)],
    ))?;
    drain(&mut InsertExecutor::from_rows(
        ctx.clone(),
        "pets",
        vec![
            Tuple::new(vec![Value::Integer(1), Value::Text("cat".into())]),
            Tuple::new(vec![Value::Integer(2), Value::Text("dog".into())]),
            Tuple::new(vec![Value::Integer(1), Value::Text("owl".into())]),
        ],
    ))?;

    let left = Box::new(SeqScanExecutor::new(ctx.clone(), "people", None));
    let right = Box::new(SeqScanExecutor::new(ctx.clone(), "pets", None));
    let mut join = NestedLoopJoinExecutor::new(
        left,
        right,
        Arc::new(|l: &Tuple, r: &Tuple| l.value_at(0).ok() == r.value_at(0).ok()),
    );
    let rows = drain(&mut join)?;
    assert_eq!(rows.len(), 3);
    // Joined rows carry left columns then right columns.
    assert_eq!(rows[0].arity(), 5);

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_nested_index_join() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    db.catalog().create_table("people", people_schema())?;
    let orders = Schema::new(vec![
        Column::new("id", DataType::Integer),
        Column::new("person_id", DataType::Integer),
    ]);
    db.catalog().create_table("orders", orders)?;
    db.catalog().create_index("people_id", "people", vec![0])?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    drain(&mut InsertExecutor::from_rows(
        ctx.clone(),
        "people",
        vec![person(1, "ada", true), person(2, "grace", true)],
    ))?;
    drain(&mut InsertExecutor::from_rows(
        ctx.clone(),
        "orders",
        vec![
            Tuple::new(vec![Value::Integer(100), Value::Integer(2)]),
            Tuple::new(vec![Value::Integer(101), Value::Integer(1)]),
            Tuple::new(vec![Value::Integer(102), Value::Integer(9)]),
        ],
    ))?;

    let outer = Box::new(SeqScanExecutor::new(ctx.clone(), "orders", None));
    let mut join = NestedIndexJoinExecutor::new(
        ctx,
        outer,
        "people",
        "people_id",
        Arc::new(|t: &Tuple| t.value_at(1).ok().and_then(|v| v.as_integer())),
    );
    let rows = drain(&mut join)?;

    // Order 102 has no matching person and drops out.
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0].value_at(0)?, &Value::Integer(100));
    assert_eq!(rows[0].value_at(3)?, &Value::Text("grace".into()));

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_aggregation_with_having() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    let sales = Schema::new(vec![
        Column::new("region", DataType::Integer),
        Column::new("amount", DataType::Integer),
    ]);
    db.catalog().create_table("sales", sales)?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let rows = vec![
        Tuple::new(vec![Value::Integer(1), Value::Integer(10)]),
        Tuple::new(vec![Value::Integer(1), Value::Integer(20)]),
        Tuple::new(vec![Value::Integer(2), Value::Integer(5)]),
        Tuple::new(vec![Value::Integer(2), Value::Integer(7)]),
        Tuple::new(vec![Value::Integer(3), Value::Integer(100)]),
    ];
    drain(&mut InsertExecutor::from_rows(ctx.clone(), "sales", rows))?;

    let child = Box::new(SeqScanExecutor::new(ctx, "sales", None));
    let mut agg = AggregationExecutor::new(
        child,
        vec![0],
        vec![AggregateFn::CountStar, AggregateFn::Sum(1), AggregateFn::Max(1)],
        Some(Arc::new(|_group: &[Value], aggs: &[Value]| {
            // HAVING SUM(amount) >= 12
            matches!(aggs[1], Value::Integer(total) if total >= 12)
        })),
    );
    let result = drain(&mut agg)?;

    assert_eq!(result.len(), 3);
    // Region 1: count 2, sum 30, max 20.
    assert_eq!(
        result[0],
        Tuple::new(vec![
            Value::Integer(1),
            Value::Integer(2),
            Value::Integer(30),
            Value::Integer(20),
        ])
    );
    // Region 2 (sum 12) survives the HAVING cut; region 3 follows.
    assert_eq!(result[2].value_at(0)?, &Value::Integer(3));

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_limit_and_offset() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    db.catalog().create_table("people", people_schema())?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let rows: Vec<Tuple> = (1..=10).map(|i| person(i, "p", true)).collect();
    drain(&mut InsertExecutor::from_rows(ctx.clone(), "people", rows))?;

    let child = Box::new(SeqScanExecutor::new(ctx, "people", None));
    let mut limit = LimitExecutor::new(child, 3, 4);
    let result = drain(&mut limit)?;
    let ids: Vec<i64> = result
        .iter()
        .map(|t| t.value_at(0).unwrap().as_integer().unwrap())
        .collect();
    assert_eq!(ids, vec![4, 5, 6, 7]);

    db.commit(&txn)?;
    Ok(())
}

#[test]
fn test_filter_and_projection() -> Result<()> {
    let (db, _temp_file) = open_test_database(64)?;
    db.catalog().create_table("people", people_schema())?;

    let txn = db.begin(IsolationLevel::RepeatableRead);
    let ctx = db.executor_context(txn.clone());

    let rows: Vec<Tuple> = (1..=6).map(|i| person(i, "p", i > 3)).collect();
    drain(&mut InsertExecutor::from_rows(ctx.clone(), "people", rows))?;

    let scan = Box::new(SeqScanExecutor::new(ctx, "people", None));
    let filter = Box::new(FilterExecutor::new(
        scan,
        Arc::new(|t: &Tuple| matches!(t.value_at(2), Ok(Value::Boolean(true)))),
    ));
    let mut project = ProjectionExecutor::new(filter, vec![0]);
    let result = drain(&mut project)?;

    assert_eq!(result.len(), 3);
    assert!(result.iter().all(|t| t.arity() == 1));
    assert_eq!(result[0], Tuple::new(vec![Value::Integer(4)]));

    db.commit(&txn)?;
    Ok(())
}
