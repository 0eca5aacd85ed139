use kestrel_common::datum::Datum;
use kestrel_common::sharding_value::ShardingValue;

use super::{
    resolve_target, AlgorithmProps, ComplexKeysShardingAlgorithm, ComplexShardingValues,
    HintShardingAlgorithm, HintShardingValues, PreciseShardingValue, RangeShardingValue,
    StandardShardingAlgorithm,
};
use crate::inline_expr::InlineTemplate;

/// `INLINE`: evaluate `algorithm-expression` (e.g. `t_order_${order_id % 2}`)
/// against the precise value. Range values cannot be mapped through an
/// arbitrary expression, so they hit every candidate.
#[derive(Debug, Clone)]
pub struct InlineAlgorithm {
    template: InlineTemplate,
}

impl InlineAlgorithm {
    pub fn new(expression: &str) -> Result<Self, String> {
        let template = InlineTemplate::parse(expression).map_err(|e| e.to_string())?;
        Ok(Self { template })
    }

    pub fn from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        Self::new(props.require_str("algorithm-expression")?)
    }
}

impl StandardShardingAlgorithm for InlineAlgorithm {
    fn shard_precise(
        &self,
        targets: &[String],
        value: &PreciseShardingValue<'_>,
    ) -> Result<Option<String>, String> {
        let computed = self.template.evaluate(|name| {
            name.eq_ignore_ascii_case(value.column)
                .then(|| value.value.clone())
        })?;
        Ok(resolve_target(targets, &computed))
    }

    fn shard_range(
        &self,
        targets: &[String],
        value: &RangeShardingValue<'_>,
    ) -> Result<Vec<String>, String> {
        tracing::debug!(
            "INLINE algorithm cannot narrow range {} on {}.{}; routing to all {} targets",
            value.range,
            value.logic_table,
            value.column,
            targets.len()
        );
        Ok(targets.to_vec())
    }
}

/// `COMPLEX_INLINE`: one expression over several columns, e.g.
/// `t_order_${(user_id + order_id) % 4}`. Every combination of the
/// columns' discrete values is evaluated. A missing or range-valued
/// column leaves the table unconstrained.
#[derive(Debug, Clone)]
pub struct ComplexInlineAlgorithm {
    template: InlineTemplate,
    columns: Vec<String>,
}

impl ComplexInlineAlgorithm {
    pub fn new(expression: &str, columns: Option<&str>) -> Result<Self, String> {
        let template = InlineTemplate::parse(expression).map_err(|e| e.to_string())?;
        let columns: Vec<String> = match columns {
            Some(list) => list
                .split(',')
                .map(|c| c.trim().to_ascii_lowercase())
                .filter(|c| !c.is_empty())
                .collect(),
            None => template
                .variables()
                .iter()
                .map(|v| v.to_ascii_lowercase())
                .collect(),
        };
        if columns.is_empty() {
            return Err("no sharding columns".into());
        }
        Ok(Self { template, columns })
    }

    pub fn from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        Self::new(
            props.require_str("algorithm-expression")?,
            props.get_str("sharding-columns"),
        )
    }
}

impl ComplexKeysShardingAlgorithm for ComplexInlineAlgorithm {
    fn shard(
        &self,
        targets: &[String],
        values: &ComplexShardingValues<'_>,
    ) -> Result<Vec<String>, String> {
        let mut axes: Vec<Vec<&Datum>> = Vec::with_capacity(self.columns.len());
        for column in &self.columns {
            match values.values.get(column).and_then(ShardingValue::discrete) {
                Some(ds) => axes.push(ds),
                None => return Ok(targets.to_vec()),
            }
        }

        let mut out: Vec<String> = Vec::new();
        let mut cursor = vec![0usize; axes.len()];
        'combos: loop {
            let computed = self.template.evaluate(|name| {
                let name = name.to_ascii_lowercase();
                self.columns
                    .iter()
                    .position(|c| *c == name)
                    .map(|i| axes[i][cursor[i]].clone())
            })?;
            if let Some(t) = resolve_target(targets, &computed) {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
            // Odometer step over the value axes.
            for i in (0..axes.len()).rev() {
                cursor[i] += 1;
                if cursor[i] < axes[i].len() {
                    continue 'combos;
                }
                cursor[i] = 0;
            }
            break;
        }
        Ok(out)
    }
}

/// `HINT_INLINE`: evaluate `algorithm-expression` (default `${value}`) for
/// each hinted value.
#[derive(Debug, Clone)]
pub struct HintInlineAlgorithm {
    template: InlineTemplate,
}

impl HintInlineAlgorithm {
    pub fn new(expression: &str) -> Result<Self, String> {
        let template = InlineTemplate::parse(expression).map_err(|e| e.to_string())?;
        Ok(Self { template })
    }

    pub fn from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        Self::new(props.get_str("algorithm-expression").unwrap_or("${value}"))
    }
}

impl HintShardingAlgorithm for HintInlineAlgorithm {
    fn shard(
        &self,
        targets: &[String],
        values: &HintShardingValues<'_>,
    ) -> Result<Vec<String>, String> {
        let mut out: Vec<String> = Vec::new();
        for value in values.values {
            let computed = self
                .template
                .evaluate(|name| name.eq_ignore_ascii_case("value").then(|| value.clone()))?;
            if let Some(t) = resolve_target(targets, &computed) {
                if !out.contains(&t) {
                    out.push(t);
                }
            }
        }
        Ok(out)
    }
}
