use std::ops::Bound;

use kestrel_common::datum::Datum;

use super::{
    find_by_suffix, AlgorithmProps, PreciseShardingValue, RangeShardingValue,
    StandardShardingAlgorithm,
};

/// Partitions the integer line at sorted boundaries `b0 < b1 < … < bn`:
/// partition 0 is `(-inf, b0)`, partition i is `[b(i-1), bi)`, and the last
/// is `[bn, +inf)`. Partition ids are matched as target suffixes.
///
/// `BOUNDARY_RANGE` takes the boundaries directly (`sharding-ranges`);
/// `VOLUME_RANGE` derives them from `range-lower`, `range-upper` and
/// `sharding-volume`.
#[derive(Debug, Clone)]
pub struct BoundaryRangeAlgorithm {
    boundaries: Vec<i64>,
}

impl BoundaryRangeAlgorithm {
    pub fn new(mut boundaries: Vec<i64>) -> Result<Self, String> {
        if boundaries.is_empty() {
            return Err("at least one boundary is required".into());
        }
        boundaries.sort_unstable();
        boundaries.dedup();
        Ok(Self { boundaries })
    }

    pub fn boundaries_from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        let raw = props.require_str("sharding-ranges")?;
        let boundaries = raw
            .split(',')
            .map(|s| {
                s.trim()
                    .parse::<i64>()
                    .map_err(|_| format!("bad boundary '{}' in sharding-ranges", s.trim()))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(boundaries)
    }

    pub fn volume_from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        let lower = props.require_i64("range-lower")?;
        let upper = props.require_i64("range-upper")?;
        let volume = props.require_positive("sharding-volume")?;
        if upper <= lower {
            return Err(format!("range-upper {} must exceed range-lower {}", upper, lower));
        }
        let mut boundaries = Vec::new();
        let mut b = lower;
        while b < upper {
            boundaries.push(b);
            b = b.saturating_add(volume);
        }
        boundaries.push(upper);
        Self::new(boundaries)
    }

    pub fn partition_count(&self) -> usize {
        self.boundaries.len() + 1
    }

    pub fn partition_of(&self, value: i64) -> usize {
        self.boundaries.partition_point(|b| *b <= value)
    }

    fn partition_of_datum(&self, value: &Datum) -> Result<usize, String> {
        value
            .as_i64()
            .map(|v| self.partition_of(v))
            .ok_or_else(|| format!("range sharding requires an integer value, got '{}'", value))
    }
}

impl StandardShardingAlgorithm for BoundaryRangeAlgorithm {
    fn shard_precise(
        &self,
        targets: &[String],
        value: &PreciseShardingValue<'_>,
    ) -> Result<Option<String>, String> {
        let p = self.partition_of_datum(value.value)?;
        Ok(find_by_suffix(targets, &p.to_string()).cloned())
    }

    fn shard_range(
        &self,
        targets: &[String],
        value: &RangeShardingValue<'_>,
    ) -> Result<Vec<String>, String> {
        let first = match &value.range.lower {
            Bound::Unbounded => 0,
            Bound::Included(d) => self.partition_of_datum(d)?,
            Bound::Excluded(d) => self.partition_of_datum(d)?,
        };
        let last = match &value.range.upper {
            Bound::Unbounded => self.partition_count() - 1,
            Bound::Included(d) => self.partition_of_datum(d)?,
            Bound::Excluded(d) => {
                let v = d
                    .as_i64()
                    .ok_or_else(|| format!("range sharding requires an integer value, got '{}'", d))?;
                self.partition_of(v.saturating_sub(1))
            }
        };
        Ok((first..=last)
            .filter_map(|p| find_by_suffix(targets, &p.to_string()).cloned())
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::sharding_value::RangeValue;
    use std::collections::BTreeMap;

    fn targets(n: usize) -> Vec<String> {
        (0..n).map(|i| format!("t_log_{}", i)).collect()
    }

    #[test]
    fn test_boundary_partitions() {
        let algo = BoundaryRangeAlgorithm::new(vec![30, 10, 20]).unwrap();
        assert_eq!(algo.partition_count(), 4);
        assert_eq!(algo.partition_of(-5), 0);
        assert_eq!(algo.partition_of(10), 1);
        assert_eq!(algo.partition_of(29), 2);
        assert_eq!(algo.partition_of(1000), 3);
    }

    #[test]
    fn test_volume_props() {
        let mut props = BTreeMap::new();
        props.insert("range-lower".to_string(), serde_json::json!(10));
        props.insert("range-upper".to_string(), serde_json::json!(40));
        props.insert("sharding-volume".to_string(), serde_json::json!("10"));
        let algo = BoundaryRangeAlgorithm::volume_from_props(AlgorithmProps::new(&props)).unwrap();
        // (-inf,10) [10,20) [20,30) [30,40) [40,+inf)
        assert_eq!(algo.partition_count(), 5);
        let v = Datum::Int64(25);
        let hit = algo
            .shard_precise(
                &targets(5),
                &PreciseShardingValue {
                    logic_table: "t_log",
                    column: "id",
                    value: &v,
                },
            )
            .unwrap();
        assert_eq!(hit.as_deref(), Some("t_log_2"));
    }

    #[test]
    fn test_range_spans_partitions() {
        let algo = BoundaryRangeAlgorithm::new(vec![10, 20, 30]).unwrap();
        let r = RangeValue::new(
            Bound::Included(Datum::Int64(15)),
            Bound::Excluded(Datum::Int64(30)),
        );
        let out = algo
            .shard_range(
                &targets(4),
                &RangeShardingValue {
                    logic_table: "t_log",
                    column: "id",
                    range: &r,
                },
            )
            .unwrap();
        assert_eq!(out, vec!["t_log_1", "t_log_2"]);

        let open = RangeValue::new(Bound::Excluded(Datum::Int64(25)), Bound::Unbounded);
        let out = algo
            .shard_range(
                &targets(4),
                &RangeShardingValue {
                    logic_table: "t_log",
                    column: "id",
                    range: &open,
                },
            )
            .unwrap();
        assert_eq!(out, vec!["t_log_2", "t_log_3"]);
    }

    #[test]
    fn test_bad_props() {
        let mut props = BTreeMap::new();
        props.insert("sharding-ranges".to_string(), serde_json::json!("10,x"));
        assert!(BoundaryRangeAlgorithm::boundaries_from_props(AlgorithmProps::new(&props)).is_err());
        assert!(BoundaryRangeAlgorithm::new(vec![]).is_err());
    }
}
