use std::collections::HashMap;
use std::sync::Arc;

use crate::common::types::Rid;
use crate::query::executor::{BoxedExecutor, ExecResult, Executor};
use crate::storage::table::{Tuple, Value};

/// Aggregate functions over integer columns
#[derive(Debug, Clone, Copy)]
pub enum AggregateFn {
    CountStar,
    Count(usize),
    Sum(usize),
    Min(usize),
    Max(usize),
}

/// Predicate over (group-by values, aggregate values) — the HAVING clause
pub type HavingPredicate = Arc<dyn Fn(&[Value], &[Value]) -> bool + Send + Sync>;

/// Running state for one aggregate within one group
#[derive(Debug, Clone, Copy, Default)]
struct AggState {
    count: i64,
    acc: Option<i64>,
}

impl AggState {
    fn combine(&mut self, agg: AggregateFn, tuple: &Tuple) -> ExecResult<()> {
        match agg {
            AggregateFn::CountStar => self.count += 1,
            AggregateFn::Count(col) => {
                if !matches!(tuple.value_at(col)?, Value::Null) {
                    self.count += 1;
                }
            }
            AggregateFn::Sum(col) => {
                if let Some(v) = tuple.value_at(col)?.as_integer() {
                    self.acc = Some(self.acc.unwrap_or(0) + v);
                }
            }
            AggregateFn::Min(col) => {
                if let Some(v) = tuple.value_at(col)?.as_integer() {
                    self.acc = Some(self.acc.map_or(v, |cur| cur.min(v)));
                }
            }
            AggregateFn::Max(col) => {
                if let Some(v) = tuple.value_at(col)?.as_integer() {
                    self.acc = Some(self.acc.map_or(v, |cur| cur.max(v)));
                }
            }
        }
        Ok(())
    }

    fn finalize(&self, agg: AggregateFn) -> Value {
        match agg {
            AggregateFn::CountStar | AggregateFn::Count(_) => Value::Integer(self.count),
            AggregateFn::Sum(_) | AggregateFn::Min(_) | AggregateFn::Max(_) => {
                self.acc.map_or(Value::Null, Value::Integer)
            }
        }
    }
}

/// Hash aggregation. `init` drains the child into a hash table keyed by
/// the group-by values; `next` walks the finished groups, applying the
/// HAVING predicate. Output rows are group-by values followed by
/// aggregate values, with no meaningful RID.
pub struct AggregationExecutor {
    child: BoxedExecutor,
    group_by: Vec<usize>,
    aggregates: Vec<AggregateFn>,
    having: Option<HavingPredicate>,
    output: Vec<Tuple>,
    cursor: usize,
}

impl AggregationExecutor {
    pub fn new(
        child: BoxedExecutor,
        group_by: Vec<usize>,
        aggregates: Vec<AggregateFn>,
        having: Option<HavingPredicate>,
    ) -> Self {
        Self {
            child,
            group_by,
            aggregates,
            having,
            output: Vec::new(),
            cursor: 0,
        }
    }
}

impl Executor for AggregationExecutor {
    fn init(&mut self) -> ExecResult<()> {
        self.child.init()?;
        self.output.clear();
        self.cursor = 0;

        let mut groups: HashMap<Vec<Value>, Vec<AggState>> = HashMap::new();

        while let Some((tuple, _)) = self.child.next()? {
            let mut group_key = Vec::with_capacity(self.group_by.len());
            for &col in &self.group_by {
                group_key.push(tuple.value_at(col)?.clone());
            }

            let states = groups
                .entry(group_key)
                .or_insert_with(|| vec![AggState::default(); self.aggregates.len()]);
            for (state, &agg) in states.iter_mut().zip(self.aggregates.iter()) {
                state.combine(agg, &tuple)?;
            }
        }

        // Deterministic output order keeps results stable across runs.
        let mut finished: Vec<(Vec<Value>, Vec<AggState>)> = groups.into_iter().collect();
        finished.sort_by(|a, b| a.0.cmp(&b.0));

        for (group_key, states) in finished {
            let agg_values: Vec<Value> = states
                .iter()
                .zip(self.aggregates.iter())
                .map(|(state, &agg)| state.finalize(agg))
                .collect();

            if let Some(having) = &self.having {
                if !having(&group_key, &agg_values) {
                    continue;
                }
            }

            let mut values = group_key;
            values.extend(agg_values);
            self.output.push(Tuple::new(values));
        }

        Ok(())
    }

    fn next(&mut self) -> ExecResult<Option<(Tuple, Rid)>> {
        if self.cursor >= self.output.len() {
            return Ok(None);
        }
        let tuple = self.output[self.cursor].clone();
        self.cursor += 1;
        Ok(Some((tuple, Rid::invalid())))
    }
}
