use std::collections::BTreeMap;
use std::ops::Bound;

use kestrel_common::datum::Datum;
use kestrel_common::error::RouteError;
use kestrel_common::sharding_value::{RangeValue, ShardingValue};
use kestrel_common::statement::{ConditionGroup, PredicateOp, ValueExpr};

/// Sharding values one AND-group yields for one table.
#[derive(Debug, Clone, Default, PartialEq)]
pub(crate) struct TableConditions {
    /// Lower-cased column → intersected value.
    pub values: BTreeMap<String, ShardingValue>,
    /// Some column's predicates cannot all hold at once.
    pub always_false: bool,
}

/// Collect the sharding values `group` places on `columns`, considering
/// only predicates whose owner is in `owners` (table names and aliases,
/// lower-cased). An empty owner on a predicate matches any table.
pub(crate) fn extract(
    group: &ConditionGroup,
    owners: &[String],
    columns: &[&str],
    params: &[Datum],
) -> Result<TableConditions, RouteError> {
    let mut out = TableConditions::default();
    for predicate in &group.predicates {
        let owner = predicate.table.to_ascii_lowercase();
        if !owner.is_empty() && !owners.contains(&owner) {
            continue;
        }
        let column = predicate.column.to_ascii_lowercase();
        if !columns.contains(&column.as_str()) {
            continue;
        }
        let Some(value) = to_sharding_value(&predicate.op, params)? else {
            continue;
        };
        let value = match value {
            Extracted::Value(v) => v,
            Extracted::Unsatisfiable => {
                out.always_false = true;
                continue;
            }
        };
        let merged = match out.values.get(&column) {
            Some(existing) => existing.intersect(&value),
            None => Some(value),
        };
        match merged {
            Some(v) => {
                out.values.insert(column, v);
            }
            None => out.always_false = true,
        }
    }
    Ok(out)
}

enum Extracted {
    Value(ShardingValue),
    /// `col = NULL`, `col IN ()` and the like never match a row.
    Unsatisfiable,
}

fn to_sharding_value(op: &PredicateOp, params: &[Datum]) -> Result<Option<Extracted>, RouteError> {
    Ok(match op {
        PredicateOp::Equal(v) => {
            let d = v.resolve(params)?;
            Some(if d.is_null() {
                Extracted::Unsatisfiable
            } else {
                Extracted::Value(ShardingValue::Precise(d))
            })
        }
        PredicateOp::In(items) => {
            let mut values = Vec::with_capacity(items.len());
            for item in items {
                let d = item.resolve(params)?;
                if !d.is_null() {
                    values.push(d);
                }
            }
            Some(match ShardingValue::from_values(values) {
                Some(v) => Extracted::Value(v),
                None => Extracted::Unsatisfiable,
            })
        }
        PredicateOp::Range { lower, upper } => {
            let range = RangeValue::new(resolve_bound(lower, params)?, resolve_bound(upper, params)?);
            Some(if range.is_empty() {
                Extracted::Unsatisfiable
            } else {
                Extracted::Value(ShardingValue::Range(range))
            })
        }
        PredicateOp::Unsupported => None,
    })
}

fn resolve_bound(bound: &Bound<ValueExpr>, params: &[Datum]) -> Result<Bound<Datum>, RouteError> {
    Ok(match bound {
        Bound::Included(v) => Bound::Included(v.resolve(params)?),
        Bound::Excluded(v) => Bound::Excluded(v.resolve(params)?),
        Bound::Unbounded => Bound::Unbounded,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::statement::Predicate;

    fn lit(v: i64) -> ValueExpr {
        ValueExpr::Literal(Datum::Int64(v))
    }

    fn owners() -> Vec<String> {
        vec!["t_order".to_string(), "o".to_string()]
    }

    #[test]
    fn test_equal_and_in_intersect() {
        let group = ConditionGroup::new(vec![
            Predicate::in_list("t_order", "order_id", vec![lit(1), lit(2), lit(3)]),
            Predicate::equal("o", "ORDER_ID", lit(2)),
            Predicate::equal("t_order", "status", lit(9)),
        ]);
        let out = extract(&group, &owners(), &["order_id"], &[]).unwrap();
        assert!(!out.always_false);
        assert_eq!(out.values.len(), 1);
        assert_eq!(out.values["order_id"], ShardingValue::Precise(Datum::Int64(2)));
    }

    #[test]
    fn test_contradiction_is_always_false() {
        let group = ConditionGroup::new(vec![
            Predicate::equal("t_order", "order_id", lit(1)),
            Predicate::equal("t_order", "order_id", lit(2)),
        ]);
        let out = extract(&group, &owners(), &["order_id"], &[]).unwrap();
        assert!(out.always_false);
    }

    #[test]
    fn test_parameters_and_ranges() {
        let group = ConditionGroup::new(vec![Predicate::range(
            "",
            "order_id",
            Bound::Included(ValueExpr::Parameter(0)),
            Bound::Excluded(ValueExpr::Parameter(1)),
        )]);
        let params = [Datum::Int64(10), Datum::Int64(20)];
        let out = extract(&group, &owners(), &["order_id"], &params).unwrap();
        assert_eq!(
            out.values["order_id"],
            ShardingValue::Range(RangeValue::new(
                Bound::Included(Datum::Int64(10)),
                Bound::Excluded(Datum::Int64(20))
            ))
        );
        assert!(extract(&group, &owners(), &["order_id"], &params[..1]).is_err());
    }

    #[test]
    fn test_other_tables_and_unsupported_ignored() {
        let group = ConditionGroup::new(vec![
            Predicate::equal("t_user", "order_id", lit(1)),
            Predicate {
                table: "t_order".into(),
                column: "order_id".into(),
                op: PredicateOp::Unsupported,
            },
        ]);
        let out = extract(&group, &owners(), &["order_id"], &[]).unwrap();
        assert!(out.values.is_empty());
        assert!(!out.always_false);
    }

    #[test]
    fn test_null_equality_never_matches() {
        let group = ConditionGroup::new(vec![Predicate::equal(
            "t_order",
            "order_id",
            ValueExpr::Literal(Datum::Null),
        )]);
        let out = extract(&group, &owners(), &["order_id"], &[]).unwrap();
        assert!(out.always_false);
    }
}
