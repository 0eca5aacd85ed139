use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

/// A single scalar value flowing through routing (sharding values, hint
/// values, statement parameters) and merging (shard result cells).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Datum {
    Null,
    Boolean(bool),
    Int32(i32),
    Int64(i64),
    Float64(f64),
    Text(String),
    Timestamp(i64), // microseconds since Unix epoch
    Date(i32),      // days since Unix epoch (1970-01-01)
    /// Fixed-point decimal: mantissa × 10^(-scale).
    /// e.g. Decimal(12345, 2) = 123.45
    Decimal(i128, u8),
    Bytea(Vec<u8>),
}

impl Datum {
    pub fn is_null(&self) -> bool {
        matches!(self, Datum::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Datum::Int32(v) => Some(*v as i64),
            Datum::Int64(v) => Some(*v),
            Datum::Decimal(m, 0) => i64::try_from(*m).ok(),
            Datum::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Datum::Int32(v) => Some(*v as f64),
            Datum::Int64(v) => Some(*v as f64),
            Datum::Float64(v) => Some(*v),
            Datum::Decimal(m, s) => Some(*m as f64 / 10f64.powi(*s as i32)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Datum::Text(s) => Some(s.as_str()),
            _ => None,
        }
    }

    /// Add two datums (SUM/COUNT combination). NULL is the identity;
    /// mixed integer/float operands widen to float.
    pub fn add(&self, other: &Datum) -> Option<Datum> {
        match (self, other) {
            (Datum::Null, other) | (other, Datum::Null) => Some(other.clone()),
            (Datum::Int32(a), Datum::Int32(b)) => Some(Datum::Int64(*a as i64 + *b as i64)),
            (Datum::Int64(a), Datum::Int64(b)) => Some(Datum::Int64(a.checked_add(*b)?)),
            (Datum::Int64(a), Datum::Int32(b)) => Some(Datum::Int64(a.checked_add(*b as i64)?)),
            (Datum::Int32(a), Datum::Int64(b)) => Some(Datum::Int64((*a as i64).checked_add(*b)?)),
            (Datum::Float64(a), Datum::Float64(b)) => Some(Datum::Float64(a + b)),
            (Datum::Float64(a), Datum::Int64(b)) | (Datum::Int64(b), Datum::Float64(a)) => {
                Some(Datum::Float64(a + *b as f64))
            }
            (Datum::Float64(a), Datum::Int32(b)) | (Datum::Int32(b), Datum::Float64(a)) => {
                Some(Datum::Float64(a + *b as f64))
            }
            (Datum::Decimal(a, sa), Datum::Decimal(b, sb)) => decimal_add(*a, *sa, *b, *sb),
            (Datum::Decimal(a, sa), other) | (other, Datum::Decimal(a, sa)) => {
                let b = (other.as_i64()? as i128).checked_mul(10i128.checked_pow(*sa as u32)?)?;
                Some(Datum::Decimal(a.checked_add(b)?, *sa))
            }
            _ => None,
        }
    }

    /// Divide for AVG emission. Always produces a float except for exact
    /// decimal inputs, which keep a fixed scale of at least 4 digits.
    pub fn div_count(&self, count: i64) -> Option<Datum> {
        if count == 0 {
            return Some(Datum::Null);
        }
        match self {
            Datum::Null => Some(Datum::Null),
            Datum::Decimal(m, s) => {
                let scale = (*s).max(4);
                let widened = m.checked_mul(10i128.checked_pow((scale - *s) as u32)?)?;
                Some(Datum::Decimal(widened / count as i128, scale))
            }
            other => Some(Datum::Float64(other.as_f64()? / count as f64)),
        }
    }

    /// SQL literal text, used when a rewritten statement needs a value inline.
    pub fn to_sql_literal(&self) -> String {
        match self {
            Datum::Null => "NULL".into(),
            Datum::Text(s) => format!("'{}'", s.replace('\'', "''")),
            Datum::Boolean(b) => if *b { "TRUE".into() } else { "FALSE".into() },
            Datum::Timestamp(_) | Datum::Date(_) | Datum::Bytea(_) => format!("'{}'", self),
            other => other.to_string(),
        }
    }
}

impl fmt::Display for Datum {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Datum::Null => write!(f, "NULL"),
            Datum::Boolean(b) => write!(f, "{}", b),
            Datum::Int32(v) => write!(f, "{}", v),
            Datum::Int64(v) => write!(f, "{}", v),
            Datum::Float64(v) => write!(f, "{}", v),
            Datum::Text(s) => write!(f, "{}", s),
            Datum::Timestamp(us) => {
                let secs = us.div_euclid(1_000_000);
                let nsecs = (us.rem_euclid(1_000_000) * 1000) as u32;
                match chrono::DateTime::from_timestamp(secs, nsecs) {
                    Some(dt) => write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S")),
                    None => write!(f, "{}", us),
                }
            }
            Datum::Date(days) => {
                let epoch =
                    chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap_or(chrono::NaiveDate::MIN);
                match epoch.checked_add_signed(chrono::Duration::days(*days as i64)) {
                    Some(d) => write!(f, "{}", d.format("%Y-%m-%d")),
                    None => write!(f, "{}", days),
                }
            }
            Datum::Decimal(m, s) => write!(f, "{}", decimal_to_string(*m, *s)),
            Datum::Bytea(bytes) => {
                write!(f, "\\x")?;
                for b in bytes {
                    write!(f, "{:02x}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// Structural equality: NULL equals NULL here (group keys, sharding values),
/// and integers compare equal to floats and decimals of the same value.
impl PartialEq for Datum {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Datum::Null, Datum::Null) => true,
            (Datum::Null, _) | (_, Datum::Null) => false,
            (Datum::Text(a), Datum::Text(b)) => a == b,
            (Datum::Bytea(a), Datum::Bytea(b)) => a == b,
            _ => cmp_datum(self, other) == Ordering::Equal && comparable(self, other),
        }
    }
}

fn comparable(a: &Datum, b: &Datum) -> bool {
    let numeric = |d: &Datum| {
        matches!(
            d,
            Datum::Int32(_) | Datum::Int64(_) | Datum::Float64(_) | Datum::Decimal(_, _)
        )
    };
    (numeric(a) && numeric(b)) || std::mem::discriminant(a) == std::mem::discriminant(b)
}

/// Total order over datums. NULL sorts lowest; numeric types compare across
/// widths; values of unrelated types compare equal.
pub fn cmp_datum(a: &Datum, b: &Datum) -> Ordering {
    match (a, b) {
        (Datum::Null, Datum::Null) => Ordering::Equal,
        (Datum::Null, _) => Ordering::Less,
        (_, Datum::Null) => Ordering::Greater,
        (Datum::Int32(x), Datum::Int32(y)) => x.cmp(y),
        (Datum::Int64(x), Datum::Int64(y)) => x.cmp(y),
        (Datum::Int32(x), Datum::Int64(y)) => (*x as i64).cmp(y),
        (Datum::Int64(x), Datum::Int32(y)) => x.cmp(&(*y as i64)),
        (Datum::Decimal(x, sx), Datum::Decimal(y, sy)) => match decimal_normalize(*x, *sx, *y, *sy) {
            Some((nx, ny)) => nx.cmp(&ny),
            None => cmp_as_f64(a, b),
        },
        (Datum::Text(x), Datum::Text(y)) => x.cmp(y),
        (Datum::Boolean(x), Datum::Boolean(y)) => x.cmp(y),
        (Datum::Timestamp(x), Datum::Timestamp(y)) => x.cmp(y),
        (Datum::Date(x), Datum::Date(y)) => x.cmp(y),
        (Datum::Bytea(x), Datum::Bytea(y)) => x.cmp(y),
        (x, y) => cmp_as_f64(x, y),
    }
}

fn cmp_as_f64(a: &Datum, b: &Datum) -> Ordering {
    match (a.as_f64(), b.as_f64()) {
        (Some(fa), Some(fb)) => fa.partial_cmp(&fb).unwrap_or(Ordering::Equal),
        _ => Ordering::Equal,
    }
}

/// Deterministic binary encoding used as a hash-map key for group-by merging.
pub fn encode_key(values: &[&Datum]) -> Vec<u8> {
    let mut key = Vec::with_capacity(values.len() * 9);
    for datum in values {
        match datum {
            Datum::Null => key.push(0),
            Datum::Boolean(b) => {
                key.push(1);
                key.push(u8::from(*b));
            }
            // Integers share a tag so Int32(1) and Int64(1) land in one group.
            Datum::Int32(v) => {
                key.push(2);
                key.extend_from_slice(&(*v as i64).to_be_bytes());
            }
            Datum::Int64(v) => {
                key.push(2);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Float64(v) => {
                key.push(4);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Text(s) => {
                key.push(5);
                key.extend_from_slice(&(s.len() as u32).to_be_bytes());
                key.extend_from_slice(s.as_bytes());
            }
            Datum::Timestamp(v) => {
                key.push(6);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Date(v) => {
                key.push(9);
                key.extend_from_slice(&v.to_be_bytes());
            }
            Datum::Decimal(m, s) => {
                key.push(10);
                key.push(*s);
                key.extend_from_slice(&m.to_be_bytes());
            }
            Datum::Bytea(bytes) => {
                key.push(14);
                key.extend_from_slice(&(bytes.len() as u32).to_be_bytes());
                key.extend_from_slice(bytes);
            }
        }
    }
    key
}

/// Rescale both mantissas to the larger scale; `None` on i128 overflow.
fn decimal_normalize(a: i128, sa: u8, b: i128, sb: u8) -> Option<(i128, i128)> {
    match sa.cmp(&sb) {
        Ordering::Equal => Some((a, b)),
        Ordering::Less => Some((a.checked_mul(10i128.checked_pow((sb - sa) as u32)?)?, b)),
        Ordering::Greater => Some((a, b.checked_mul(10i128.checked_pow((sa - sb) as u32)?)?)),
    }
}

fn decimal_add(a: i128, sa: u8, b: i128, sb: u8) -> Option<Datum> {
    let (na, nb) = decimal_normalize(a, sa, b, sb)?;
    Some(Datum::Decimal(na.checked_add(nb)?, sa.max(sb)))
}

fn decimal_to_string(mantissa: i128, scale: u8) -> String {
    if scale == 0 {
        return mantissa.to_string();
    }
    let Some(divisor) = 10i128.checked_pow(scale as u32) else {
        return format!("{}E-{}", mantissa, scale);
    };
    let int_part = mantissa / divisor;
    let frac_part = (mantissa % divisor).abs();
    let sign = if mantissa < 0 && int_part == 0 { "-" } else { "" };
    format!(
        "{}{}.{:0>width$}",
        sign,
        int_part,
        frac_part,
        width = scale as usize
    )
}

impl From<i32> for Datum {
    fn from(v: i32) -> Self {
        Datum::Int32(v)
    }
}

impl From<i64> for Datum {
    fn from(v: i64) -> Self {
        Datum::Int64(v)
    }
}

impl From<f64> for Datum {
    fn from(v: f64) -> Self {
        Datum::Float64(v)
    }
}

impl From<bool> for Datum {
    fn from(v: bool) -> Self {
        Datum::Boolean(v)
    }
}

impl From<&str> for Datum {
    fn from(v: &str) -> Self {
        Datum::Text(v.to_string())
    }
}

impl From<String> for Datum {
    fn from(v: String) -> Self {
        Datum::Text(v)
    }
}

/// A row of datums, as produced by one shard cursor step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OwnedRow {
    pub values: Vec<Datum>,
}

impl OwnedRow {
    pub fn new(values: Vec<Datum>) -> Self {
        Self { values }
    }

    pub fn get(&self, idx: usize) -> Option<&Datum> {
        self.values.get(idx)
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cmp_datum_null_lowest() {
        assert_eq!(cmp_datum(&Datum::Null, &Datum::Int64(-5)), Ordering::Less);
        assert_eq!(cmp_datum(&Datum::Text("a".into()), &Datum::Null), Ordering::Greater);
        assert_eq!(cmp_datum(&Datum::Null, &Datum::Null), Ordering::Equal);
    }

    #[test]
    fn test_cmp_datum_mixed_numeric() {
        assert_eq!(cmp_datum(&Datum::Int32(3), &Datum::Int64(3)), Ordering::Equal);
        assert_eq!(cmp_datum(&Datum::Int64(2), &Datum::Float64(2.5)), Ordering::Less);
        assert_eq!(cmp_datum(&Datum::Decimal(150, 2), &Datum::Int64(1)), Ordering::Greater);
        assert_eq!(
            cmp_datum(&Datum::Decimal(150, 2), &Datum::Decimal(15, 1)),
            Ordering::Equal
        );
    }

    #[test]
    fn test_equality_is_structural() {
        assert_eq!(Datum::Null, Datum::Null);
        assert_eq!(Datum::Int32(7), Datum::Int64(7));
        assert_ne!(Datum::Int64(7), Datum::Text("7".into()));
        assert_ne!(Datum::Null, Datum::Int64(0));
    }

    #[test]
    fn test_add_widens() {
        assert_eq!(Datum::Int32(2).add(&Datum::Int32(3)), Some(Datum::Int64(5)));
        assert_eq!(Datum::Null.add(&Datum::Int64(4)), Some(Datum::Int64(4)));
        assert_eq!(Datum::Int64(1).add(&Datum::Float64(0.5)), Some(Datum::Float64(1.5)));
        assert_eq!(
            Datum::Decimal(125, 2).add(&Datum::Decimal(5, 1)),
            Some(Datum::Decimal(175, 2))
        );
        assert_eq!(Datum::Text("a".into()).add(&Datum::Int64(1)), None);
        assert_eq!(Datum::Int64(i64::MAX).add(&Datum::Int64(1)), None);
        assert_eq!(Datum::Decimal(i128::MAX, 0).add(&Datum::Decimal(1, 0)), None);
        assert_eq!(Datum::Decimal(i128::MAX, 0).add(&Datum::Int64(1)), None);
        assert_eq!(Datum::Decimal(i128::MAX / 2, 0).add(&Datum::Decimal(1, 1)), None);
    }

    #[test]
    fn test_cmp_decimal_rescale_overflow_falls_back_to_float() {
        let big = Datum::Decimal(i128::MAX / 10, 0);
        let small = Datum::Decimal(5, 3);
        assert_eq!(cmp_datum(&big, &small), Ordering::Greater);
        assert_eq!(cmp_datum(&small, &big), Ordering::Less);
    }

    #[test]
    fn test_div_count() {
        assert_eq!(Datum::Int64(9).div_count(2), Some(Datum::Float64(4.5)));
        assert_eq!(Datum::Int64(9).div_count(0), Some(Datum::Null));
        assert_eq!(Datum::Decimal(900, 2).div_count(4), Some(Datum::Decimal(22500, 4)));
    }

    #[test]
    fn test_encode_key_int_widths_collide() {
        assert_eq!(
            encode_key(&[&Datum::Int32(1)]),
            encode_key(&[&Datum::Int64(1)])
        );
        assert_ne!(
            encode_key(&[&Datum::Text("ab".into()), &Datum::Text("c".into())]),
            encode_key(&[&Datum::Text("a".into()), &Datum::Text("bc".into())])
        );
    }

    #[test]
    fn test_display() {
        assert_eq!(Datum::Decimal(-5, 2).to_string(), "-0.05");
        assert_eq!(Datum::Date(0).to_string(), "1970-01-01");
        assert_eq!(Datum::Text("o'k".into()).to_sql_literal(), "'o''k'");
        assert_eq!(Datum::Date(0).to_sql_literal(), "'1970-01-01'");
        assert_eq!(Datum::Decimal(1050, 2).to_sql_literal(), "10.50");
    }
}
