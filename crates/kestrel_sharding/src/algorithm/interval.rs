use std::ops::Bound;

use chrono::{Datelike, Months, NaiveDate, NaiveDateTime};
use kestrel_common::datum::Datum;

use super::{
    find_by_suffix, AlgorithmProps, PreciseShardingValue, RangeShardingValue,
    StandardShardingAlgorithm,
};

const DEFAULT_DATETIME_PATTERN: &str = "%Y-%m-%d %H:%M:%S";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntervalUnit {
    Years,
    Months,
    Weeks,
    Days,
    Hours,
    Minutes,
    Seconds,
}

impl IntervalUnit {
    pub fn parse(text: &str) -> Result<Self, String> {
        Ok(match text.trim().to_ascii_uppercase().as_str() {
            "YEARS" => IntervalUnit::Years,
            "MONTHS" => IntervalUnit::Months,
            "WEEKS" => IntervalUnit::Weeks,
            "DAYS" => IntervalUnit::Days,
            "HOURS" => IntervalUnit::Hours,
            "MINUTES" => IntervalUnit::Minutes,
            "SECONDS" => IntervalUnit::Seconds,
            other => return Err(format!("unsupported datetime-interval-unit '{}'", other)),
        })
    }

    /// Length in seconds for fixed-length units; calendar units are `None`.
    fn seconds(&self) -> Option<i64> {
        match self {
            IntervalUnit::Years | IntervalUnit::Months => None,
            IntervalUnit::Weeks => Some(7 * 86_400),
            IntervalUnit::Days => Some(86_400),
            IntervalUnit::Hours => Some(3_600),
            IntervalUnit::Minutes => Some(60),
            IntervalUnit::Seconds => Some(1),
        }
    }

    fn months(&self) -> Option<i64> {
        match self {
            IntervalUnit::Years => Some(12),
            IntervalUnit::Months => Some(1),
            _ => None,
        }
    }
}

/// `INTERVAL`: fixed-size time intervals from `datetime-lower` to
/// `datetime-upper`, `datetime-interval-amount` × `datetime-interval-unit`
/// wide. A value belongs to the interval that starts at or before it; the
/// interval start formatted with `sharding-suffix-pattern` (a chrono
/// format string such as `%Y%m`) names the target by suffix.
///
/// Values may be timestamps, dates, or text in `datetime-pattern`. Values
/// outside `[lower, upper]` have no target.
#[derive(Debug, Clone)]
pub struct IntervalAlgorithm {
    datetime_pattern: String,
    lower: NaiveDateTime,
    upper: NaiveDateTime,
    suffix_pattern: String,
    amount: i64,
    unit: IntervalUnit,
}

impl IntervalAlgorithm {
    pub fn from_props(props: AlgorithmProps<'_>) -> Result<Self, String> {
        let datetime_pattern = props
            .get_str("datetime-pattern")
            .unwrap_or(DEFAULT_DATETIME_PATTERN)
            .to_string();
        let lower = parse_datetime(props.require_str("datetime-lower")?, &datetime_pattern)?;
        let upper = match props.get_str("datetime-upper") {
            Some(text) => parse_datetime(text, &datetime_pattern)?,
            None => chrono::Utc::now().naive_utc(),
        };
        if upper < lower {
            return Err(format!("datetime-upper {} is before datetime-lower {}", upper, lower));
        }
        let suffix_pattern = props.require_str("sharding-suffix-pattern")?.to_string();
        let amount = match props.get_i64("datetime-interval-amount") {
            Some(_) => props.require_positive("datetime-interval-amount")?,
            None => 1,
        };
        let unit = match props.get_str("datetime-interval-unit") {
            Some(text) => IntervalUnit::parse(text)?,
            None => IntervalUnit::Days,
        };
        let algorithm = Self {
            datetime_pattern,
            lower,
            upper,
            suffix_pattern,
            amount,
            unit,
        };
        // Surface a bad suffix pattern at build time, not on the first query.
        algorithm.suffix(lower)?;
        Ok(algorithm)
    }

    /// Start of the `k`-th interval.
    fn interval_start(&self, k: i64) -> Option<NaiveDateTime> {
        if let Some(months) = self.unit.months() {
            let total = u32::try_from(k.checked_mul(self.amount)?.checked_mul(months)?).ok()?;
            return self.lower.checked_add_months(Months::new(total));
        }
        let seconds = k
            .checked_mul(self.amount)?
            .checked_mul(self.unit.seconds()?)?;
        self.lower
            .checked_add_signed(chrono::Duration::try_seconds(seconds)?)
    }

    /// Index of the interval holding `value`, which must not precede `lower`.
    fn interval_index(&self, value: NaiveDateTime) -> Option<i64> {
        if let Some(seconds) = self.unit.seconds() {
            let elapsed = value.signed_duration_since(self.lower).num_seconds();
            return Some(elapsed / seconds.checked_mul(self.amount)?);
        }
        let months = self.unit.months()?.checked_mul(self.amount)?;
        let elapsed = (value.year() as i64 - self.lower.year() as i64) * 12
            + (value.month() as i64 - self.lower.month() as i64);
        let mut k = elapsed / months;
        // Day and time inside the month can put the value before the guess.
        while k > 0 && self.interval_start(k).map_or(true, |start| start > value) {
            k -= 1;
        }
        Some(k)
    }

    fn suffix(&self, start: NaiveDateTime) -> Result<String, String> {
        use std::fmt::Write as _;
        let mut out = String::new();
        write!(out, "{}", start.format(&self.suffix_pattern))
            .map_err(|_| format!("invalid sharding-suffix-pattern '{}'", self.suffix_pattern))?;
        Ok(out)
    }

    fn to_datetime(&self, value: &Datum) -> Result<NaiveDateTime, String> {
        match value {
            Datum::Timestamp(us) => {
                let secs = us.div_euclid(1_000_000);
                let nsecs = (us.rem_euclid(1_000_000) * 1000) as u32;
                chrono::DateTime::from_timestamp(secs, nsecs)
                    .map(|dt| dt.naive_utc())
                    .ok_or_else(|| format!("timestamp {} out of range", us))
            }
            Datum::Date(days) => NaiveDate::from_ymd_opt(1970, 1, 1)
                .and_then(|epoch| epoch.checked_add_signed(chrono::Duration::try_days(*days as i64)?))
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .ok_or_else(|| format!("date {} out of range", days)),
            Datum::Text(s) => parse_datetime(s, &self.datetime_pattern),
            other => Err(format!(
                "INTERVAL requires a timestamp, date or datetime text, got '{}'",
                other
            )),
        }
    }
}

impl StandardShardingAlgorithm for IntervalAlgorithm {
    fn shard_precise(
        &self,
        targets: &[String],
        value: &PreciseShardingValue<'_>,
    ) -> Result<Option<String>, String> {
        let at = self.to_datetime(value.value)?;
        if at < self.lower || at > self.upper {
            return Ok(None);
        }
        let Some(start) = self
            .interval_index(at)
            .and_then(|k| self.interval_start(k))
        else {
            return Ok(None);
        };
        Ok(find_by_suffix(targets, &self.suffix(start)?).cloned())
    }

    fn shard_range(
        &self,
        targets: &[String],
        value: &RangeShardingValue<'_>,
    ) -> Result<Vec<String>, String> {
        let lower = match &value.range.lower {
            Bound::Included(d) | Bound::Excluded(d) => Some(self.to_datetime(d)?),
            Bound::Unbounded => None,
        };
        let upper = match &value.range.upper {
            Bound::Included(d) => Some((self.to_datetime(d)?, true)),
            Bound::Excluded(d) => Some((self.to_datetime(d)?, false)),
            Bound::Unbounded => None,
        };

        let mut k = match lower {
            Some(l) if l > self.lower => self.interval_index(l).unwrap_or(0),
            _ => 0,
        };
        let mut out: Vec<String> = Vec::new();
        while let Some(start) = self.interval_start(k) {
            if start > self.upper || out.len() == targets.len() {
                break;
            }
            let past_upper = match upper {
                Some((u, true)) => start > u,
                Some((u, false)) => start >= u,
                None => false,
            };
            if past_upper {
                break;
            }
            let end = self.interval_start(k + 1);
            // [start, end) must reach past the range's lower bound.
            let reaches = match (lower, end) {
                (Some(l), Some(end)) => l < end,
                _ => true,
            };
            if reaches {
                if let Some(t) = find_by_suffix(targets, &self.suffix(start)?) {
                    if !out.contains(t) {
                        out.push(t.clone());
                    }
                }
            }
            k += 1;
        }
        out.sort_by_key(|t| targets.iter().position(|c| c == t));
        Ok(out)
    }
}

/// Parse `text` with `pattern`; patterns without a time part parse as
/// midnight.
fn parse_datetime(text: &str, pattern: &str) -> Result<NaiveDateTime, String> {
    let text = text.trim();
    NaiveDateTime::parse_from_str(text, pattern)
        .ok()
        .or_else(|| {
            NaiveDate::parse_from_str(text, pattern)
                .ok()
                .and_then(|d| d.and_hms_opt(0, 0, 0))
        })
        .ok_or_else(|| format!("'{}' does not match datetime pattern '{}'", text, pattern))
}
