//! Modulo-based standard algorithms.
//!
//! - `MOD`: `value mod sharding-count`, integer values only
//! - `HASH_MOD`: `xxh3(value) mod sharding-count`, any value type
//!
//! The remainder selects the candidate whose name carries it as numeric
//! suffix (`t_order_3` for remainder 3).

use kestrel_common::datum::{encode_key, Datum};
use xxhash_rust::xxh3::xxh3_64;

use super::{
    find_by_suffix, AlgorithmProps, PreciseShardingValue, RangeShardingValue,
    StandardShardingAlgorithm,
};

#[derive(Debug, Clone)]
pub struct ModAlgorithm {
    sharding_count: i64,
}

impl ModAlgorithm {
    pub fn new(sharding_count: i64) -> Self {
        Self { sharding_count }
    }

    pub fn from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        Ok(Self::new(props.require_positive("sharding-count")?))
    }

    fn suffix_of(&self, value: &Datum) -> Result<i64, String> {
        let v = value
            .as_i64()
            .ok_or_else(|| format!("MOD requires an integer sharding value, got '{}'", value))?;
        Ok(v.rem_euclid(self.sharding_count))
    }
}

impl StandardShardingAlgorithm for ModAlgorithm {
    fn shard_precise(
        &self,
        targets: &[String],
        value: &PreciseShardingValue<'_>,
    ) -> Result<Option<String>, String> {
        let suffix = self.suffix_of(value.value)?;
        Ok(find_by_suffix(targets, &suffix.to_string()).cloned())
    }

    fn shard_range(
        &self,
        targets: &[String],
        value: &RangeShardingValue<'_>,
    ) -> Result<Vec<String>, String> {
        // A span covering every remainder (or an open range) hits every target.
        let Some((lo, hi)) = value.range.integral_bounds() else {
            return Ok(targets.to_vec());
        };
        if hi < lo {
            return Ok(Vec::new());
        }
        if (hi as i128 - lo as i128) >= self.sharding_count as i128 - 1 {
            return Ok(targets.to_vec());
        }
        let mut out: Vec<String> = Vec::new();
        for v in lo..=hi {
            let suffix = v.rem_euclid(self.sharding_count).to_string();
            if let Some(t) = find_by_suffix(targets, &suffix) {
                if !out.contains(t) {
                    out.push(t.clone());
                }
            }
        }
        // Keep candidate order.
        out.sort_by_key(|t| targets.iter().position(|c| c == t));
        Ok(out)
    }
}

#[derive(Debug, Clone)]
pub struct HashModAlgorithm {
    sharding_count: u64,
}

impl HashModAlgorithm {
    pub fn new(sharding_count: u64) -> Self {
        Self { sharding_count }
    }

    pub fn from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        Ok(Self::new(props.require_positive("sharding-count")? as u64))
    }

    /// Shard index for a value. Int32 and Int64 of equal value hash alike.
    pub fn shard_index(&self, value: &Datum) -> u64 {
        xxh3_64(&encode_key(&[value])) % self.sharding_count
    }
}

impl StandardShardingAlgorithm for HashModAlgorithm {
    fn shard_precise(
        &self,
        targets: &[String],
        value: &PreciseShardingValue<'_>,
    ) -> Result<Option<String>, String> {
        let suffix = self.shard_index(value.value).to_string();
        Ok(find_by_suffix(targets, &suffix).cloned())
    }

    fn shard_range(
        &self,
        targets: &[String],
        _value: &RangeShardingValue<'_>,
    ) -> Result<Vec<String>, String> {
        Ok(targets.to_vec())
    }
}
