//! Parallel dispatch of execution units to data sources.
//!
//! Units are grouped per data source and split into at most
//! `max_connections_size_per_query` connection groups. Each group runs its
//! units serially on its own scoped thread; results come back in unit order
//! so merge tie-breaking follows route order.

use kestrel_common::error::{KestrelError, KestrelResult};
use kestrel_merge::QueryResult;
use kestrel_rewrite::ExecutionUnit;

/// Runs one physical statement against its data source.
pub trait ShardExecutor: Send + Sync {
    fn execute(&self, unit: &ExecutionUnit) -> KestrelResult<Box<dyn QueryResult>>;
}

/// Unit indices per connection group, data sources in first-seen order.
pub(crate) fn connection_groups(units: &[ExecutionUnit], max_connections: usize) -> Vec<Vec<usize>> {
    let mut by_source: Vec<(&str, Vec<usize>)> = Vec::new();
    for (i, unit) in units.iter().enumerate() {
        match by_source.iter_mut().find(|(ds, _)| *ds == unit.data_source) {
            Some((_, indices)) => indices.push(i),
            None => by_source.push((&unit.data_source, vec![i])),
        }
    }
    let max_connections = max_connections.max(1);
    by_source
        .into_iter()
        .flat_map(|(_, indices)| {
            let per_connection = indices.len().div_ceil(max_connections);
            indices
                .chunks(per_connection)
                .map(<[usize]>::to_vec)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Execute every unit and return one cursor per unit, in unit order.
///
/// If any unit fails, the cursors that did open are closed and the failure
/// of the lowest-numbered unit is returned.
pub(crate) fn dispatch(
    units: &[ExecutionUnit],
    executor: &dyn ShardExecutor,
    max_connections: usize,
) -> KestrelResult<Vec<Box<dyn QueryResult>>> {
    let groups = connection_groups(units, max_connections);

    let outcomes: Vec<Vec<(usize, KestrelResult<Box<dyn QueryResult>>)>> = if groups.len() <= 1 {
        groups
            .iter()
            .map(|group| run_group(units, group, executor))
            .collect()
    } else {
        std::thread::scope(|s| {
            let handles: Vec<_> = groups
                .iter()
                .map(|group| s.spawn(move || run_group(units, group, executor)))
                .collect();
            handles
                .into_iter()
                .zip(groups.iter())
                .map(|(h, group)| {
                    h.join().unwrap_or_else(|_| {
                        vec![(
                            group.first().copied().unwrap_or(0),
                            Err(KestrelError::internal_bug(
                                "E-DISPATCH-001",
                                "Shard thread panicked during dispatch",
                                format!("units={:?}", group),
                            )),
                        )]
                    })
                })
                .collect()
        })
    };

    let mut slots: Vec<Option<Box<dyn QueryResult>>> = (0..units.len()).map(|_| None).collect();
    let mut failures: Vec<(usize, KestrelError)> = Vec::new();
    for (index, outcome) in outcomes.into_iter().flatten() {
        match outcome {
            Ok(result) => slots[index] = Some(result),
            Err(e) => failures.push((index, e)),
        }
    }

    if !failures.is_empty() {
        for (index, e) in &failures {
            let ds = units.get(*index).map_or("?", |u| u.data_source.as_str());
            tracing::warn!("Unit {} on {} failed: {}", index, ds, e);
            kestrel_observability::record_shard_failure(ds);
        }
        for result in slots.iter_mut().flatten() {
            result.close();
        }
        failures.sort_by_key(|(index, _)| *index);
        let (_, first) = failures.remove(0);
        return Err(first);
    }

    let results: Vec<Box<dyn QueryResult>> = slots.into_iter().flatten().collect();
    if results.len() != units.len() {
        return Err(KestrelError::internal_bug(
            "E-DISPATCH-002",
            "Execution unit produced no cursor",
            format!("units={} cursors={}", units.len(), results.len()),
        ));
    }
    Ok(results)
}

/// Serial execution on one connection; stops at the first failure.
fn run_group(
    units: &[ExecutionUnit],
    group: &[usize],
    executor: &dyn ShardExecutor,
) -> Vec<(usize, KestrelResult<Box<dyn QueryResult>>)> {
    let mut out = Vec::with_capacity(group.len());
    for &index in group {
        let outcome = executor.execute(&units[index]);
        let failed = outcome.is_err();
        out.push((index, outcome));
        if failed {
            break;
        }
    }
    out
}
