use std::cmp::Ordering;
use std::fmt;
use std::ops::Bound;

use crate::datum::{cmp_datum, Datum};

/// Value range over a sharding column. Unbounded sides come from
/// one-sided comparisons (`id > 10`).
#[derive(Debug, Clone, PartialEq)]
pub struct RangeValue {
    pub lower: Bound<Datum>,
    pub upper: Bound<Datum>,
}

impl RangeValue {
    pub fn new(lower: Bound<Datum>, upper: Bound<Datum>) -> Self {
        Self { lower, upper }
    }

    /// `[lower, upper]`, as produced by BETWEEN.
    pub fn closed(lower: Datum, upper: Datum) -> Self {
        Self {
            lower: Bound::Included(lower),
            upper: Bound::Included(upper),
        }
    }

    pub fn contains(&self, value: &Datum) -> bool {
        let above = match &self.lower {
            Bound::Unbounded => true,
            Bound::Included(l) => cmp_datum(value, l) != Ordering::Less,
            Bound::Excluded(l) => cmp_datum(value, l) == Ordering::Greater,
        };
        let below = match &self.upper {
            Bound::Unbounded => true,
            Bound::Included(u) => cmp_datum(value, u) != Ordering::Greater,
            Bound::Excluded(u) => cmp_datum(value, u) == Ordering::Less,
        };
        above && below
    }

    /// No value can satisfy both bounds. Integer bounds are tightened
    /// first, so `(5, 6)` over integers is empty.
    pub fn is_empty(&self) -> bool {
        if self.has_integer_bounds() {
            if let Some((lo, hi)) = self.integral_bounds() {
                return lo > hi;
            }
        }
        match (&self.lower, &self.upper) {
            (Bound::Unbounded, _) | (_, Bound::Unbounded) => false,
            (Bound::Included(l), Bound::Included(u)) => cmp_datum(l, u) == Ordering::Greater,
            (Bound::Included(l), Bound::Excluded(u))
            | (Bound::Excluded(l), Bound::Included(u))
            | (Bound::Excluded(l), Bound::Excluded(u)) => cmp_datum(l, u) != Ordering::Less,
        }
    }

    /// Intersection of two ranges; `None` when no value satisfies both.
    pub fn intersect(&self, other: &RangeValue) -> Option<RangeValue> {
        let lower = tighter_lower(&self.lower, &other.lower);
        let upper = tighter_upper(&self.upper, &other.upper);
        let range = RangeValue { lower, upper };
        if range.is_empty() {
            None
        } else {
            Some(range)
        }
    }

    fn has_integer_bounds(&self) -> bool {
        let integer = |b: &Bound<Datum>| match b {
            Bound::Included(d) | Bound::Excluded(d) => {
                matches!(d, Datum::Int32(_) | Datum::Int64(_) | Datum::Decimal(_, 0))
            }
            Bound::Unbounded => false,
        };
        integer(&self.lower) && integer(&self.upper)
    }

    /// Both ends as integers, when the range is bounded and integral.
    /// Exclusive bounds are tightened to the nearest included integer.
    pub fn integral_bounds(&self) -> Option<(i64, i64)> {
        let lo = match &self.lower {
            Bound::Included(d) => d.as_i64()?,
            Bound::Excluded(d) => d.as_i64()?.checked_add(1)?,
            Bound::Unbounded => return None,
        };
        let hi = match &self.upper {
            Bound::Included(d) => d.as_i64()?,
            Bound::Excluded(d) => d.as_i64()?.checked_sub(1)?,
            Bound::Unbounded => return None,
        };
        Some((lo, hi))
    }
}

fn tighter_lower(a: &Bound<Datum>, b: &Bound<Datum>) -> Bound<Datum> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x), Bound::Included(y)) => {
            if cmp_datum(x, y) == Ordering::Less {
                b.clone()
            } else {
                a.clone()
            }
        }
        (Bound::Excluded(x), Bound::Excluded(y)) => {
            if cmp_datum(x, y) == Ordering::Less {
                b.clone()
            } else {
                a.clone()
            }
        }
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if cmp_datum(i, e) == Ordering::Greater {
                Bound::Included(i.clone())
            } else {
                Bound::Excluded(e.clone())
            }
        }
    }
}

fn tighter_upper(a: &Bound<Datum>, b: &Bound<Datum>) -> Bound<Datum> {
    match (a, b) {
        (Bound::Unbounded, other) | (other, Bound::Unbounded) => other.clone(),
        (Bound::Included(x), Bound::Included(y)) => {
            if cmp_datum(x, y) == Ordering::Greater {
                b.clone()
            } else {
                a.clone()
            }
        }
        (Bound::Excluded(x), Bound::Excluded(y)) => {
            if cmp_datum(x, y) == Ordering::Greater {
                b.clone()
            } else {
                a.clone()
            }
        }
        (Bound::Included(i), Bound::Excluded(e)) | (Bound::Excluded(e), Bound::Included(i)) => {
            if cmp_datum(i, e) == Ordering::Less {
                Bound::Included(i.clone())
            } else {
                Bound::Excluded(e.clone())
            }
        }
    }
}

impl fmt::Display for RangeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.lower {
            Bound::Included(d) => write!(f, "[{}", d)?,
            Bound::Excluded(d) => write!(f, "({}", d)?,
            Bound::Unbounded => write!(f, "(-inf")?,
        }
        write!(f, "..")?;
        match &self.upper {
            Bound::Included(d) => write!(f, "{}]", d),
            Bound::Excluded(d) => write!(f, "{})", d),
            Bound::Unbounded => write!(f, "+inf)"),
        }
    }
}

/// Sharding value extracted for one column, from predicates or hints.
#[derive(Debug, Clone, PartialEq)]
pub enum ShardingValue {
    Precise(Datum),
    List(Vec<Datum>),
    Range(RangeValue),
}

impl ShardingValue {
    /// Discrete values, when this is not a range.
    pub fn discrete(&self) -> Option<Vec<&Datum>> {
        match self {
            ShardingValue::Precise(d) => Some(vec![d]),
            ShardingValue::List(ds) => Some(ds.iter().collect()),
            ShardingValue::Range(_) => None,
        }
    }

    /// AND-combination of two values for the same column. `None` means the
    /// conjunction is unsatisfiable.
    pub fn intersect(&self, other: &ShardingValue) -> Option<ShardingValue> {
        match (self, other) {
            (ShardingValue::Range(a), ShardingValue::Range(b)) => {
                a.intersect(b).map(ShardingValue::Range)
            }
            (ShardingValue::Range(r), discrete) | (discrete, ShardingValue::Range(r)) => {
                let kept: Vec<Datum> = discrete
                    .discrete()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|d| r.contains(d))
                    .cloned()
                    .collect();
                Self::from_values(kept)
            }
            (a, b) => {
                let right = b.discrete().unwrap_or_default();
                let kept: Vec<Datum> = a
                    .discrete()
                    .unwrap_or_default()
                    .into_iter()
                    .filter(|d| right.iter().any(|r| r == d))
                    .cloned()
                    .collect();
                Self::from_values(kept)
            }
        }
    }

    /// Precise for one value, List for several, `None` for none.
    pub fn from_values(mut values: Vec<Datum>) -> Option<ShardingValue> {
        let mut unique: Vec<Datum> = Vec::with_capacity(values.len());
        for v in values.drain(..) {
            if !unique.contains(&v) {
                unique.push(v);
            }
        }
        match unique.len() {
            0 => None,
            1 => unique.pop().map(ShardingValue::Precise),
            _ => Some(ShardingValue::List(unique)),
        }
    }
}

impl fmt::Display for ShardingValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShardingValue::Precise(d) => write!(f, "{}", d),
            ShardingValue::List(ds) => {
                write!(f, "[")?;
                for (i, d) in ds.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}", d)?;
                }
                write!(f, "]")
            }
            ShardingValue::Range(r) => write!(f, "{}", r),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn int(v: i64) -> Datum {
        Datum::Int64(v)
    }

    #[test]
    fn test_range_contains_and_empty() {
        let r = RangeValue::new(Bound::Excluded(int(1)), Bound::Included(int(5)));
        assert!(!r.contains(&int(1)));
        assert!(r.contains(&int(5)));
        assert!(!r.is_empty());
        assert!(RangeValue::new(Bound::Excluded(int(3)), Bound::Excluded(int(3))).is_empty());
        assert!(!RangeValue::closed(int(3), int(3)).is_empty());
    }

    #[test]
    fn test_integer_gap_is_empty() {
        let gap = RangeValue::new(Bound::Excluded(int(5)), Bound::Excluded(int(6)));
        assert!(gap.is_empty());
        assert!(!RangeValue::new(Bound::Excluded(int(5)), Bound::Excluded(int(7))).is_empty());
        let floats = RangeValue::new(
            Bound::Excluded(Datum::Float64(5.0)),
            Bound::Excluded(Datum::Float64(6.0)),
        );
        assert!(!floats.is_empty());
        let text = RangeValue::new(
            Bound::Excluded(Datum::Text("5".into())),
            Bound::Excluded(Datum::Text("6".into())),
        );
        assert!(!text.is_empty());
        let a = RangeValue::new(Bound::Excluded(int(5)), Bound::Unbounded);
        let b = RangeValue::new(Bound::Unbounded, Bound::Excluded(int(6)));
        assert!(a.intersect(&b).is_none());
    }

    #[test]
    fn test_range_intersection() {
        let a = RangeValue::new(Bound::Included(int(1)), Bound::Unbounded);
        let b = RangeValue::new(Bound::Unbounded, Bound::Excluded(int(4)));
        let both = a.intersect(&b).unwrap();
        assert_eq!(both.integral_bounds(), Some((1, 3)));
        let c = RangeValue::closed(int(10), int(20));
        assert!(b.intersect(&c).is_none());
    }

    #[test]
    fn test_discrete_intersection() {
        let list = ShardingValue::List(vec![int(1), int(2), int(3)]);
        let eq = ShardingValue::Precise(int(2));
        assert_eq!(list.intersect(&eq), Some(ShardingValue::Precise(int(2))));
        assert_eq!(
            ShardingValue::Precise(int(1)).intersect(&ShardingValue::Precise(int(2))),
            None
        );
        let range = ShardingValue::Range(RangeValue::closed(int(2), int(9)));
        assert_eq!(
            list.intersect(&range),
            Some(ShardingValue::List(vec![int(2), int(3)]))
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(ShardingValue::List(vec![int(1), int(2)]).to_string(), "[1, 2]");
        assert_eq!(
            ShardingValue::Range(RangeValue::new(Bound::Unbounded, Bound::Excluded(int(4))))
                .to_string(),
            "(-inf..4)"
        );
    }
}
