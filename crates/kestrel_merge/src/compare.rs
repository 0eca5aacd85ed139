use std::cmp::Ordering;

use kestrel_common::config::NullOrdering;
use kestrel_common::datum::{cmp_datum, Datum};
use kestrel_common::select_context::SortKey;
use kestrel_common::statement::{NullsOrder, OrderDirection};

/// Multi-column row comparator for ORDER BY / GROUP BY keys.
///
/// NULL placement follows an explicit `NULLS FIRST/LAST` on the key, else
/// the configured default, and does not flip with `DESC`.
#[derive(Debug, Clone)]
pub struct RowComparator {
    keys: Vec<(usize, OrderDirection, bool)>,
}

impl RowComparator {
    pub fn new(keys: &[SortKey], null_ordering: NullOrdering) -> Self {
        let keys = keys
            .iter()
            .map(|k| {
                let nulls_first = match (k.nulls, null_ordering, k.direction) {
                    (Some(NullsOrder::First), _, _) => true,
                    (Some(NullsOrder::Last), _, _) => false,
                    (None, NullOrdering::Smallest, OrderDirection::Asc) => true,
                    (None, NullOrdering::Smallest, OrderDirection::Desc) => false,
                    (None, NullOrdering::Largest, OrderDirection::Asc) => false,
                    (None, NullOrdering::Largest, OrderDirection::Desc) => true,
                };
                (k.index, k.direction, nulls_first)
            })
            .collect();
        Self { keys }
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn compare(&self, a: &[Datum], b: &[Datum]) -> Ordering {
        for &(index, direction, nulls_first) in &self.keys {
            let x = a.get(index).unwrap_or(&Datum::Null);
            let y = b.get(index).unwrap_or(&Datum::Null);
            let ord = match (x.is_null(), y.is_null()) {
                (true, true) => Ordering::Equal,
                (true, false) if nulls_first => Ordering::Less,
                (true, false) => Ordering::Greater,
                (false, true) if nulls_first => Ordering::Greater,
                (false, true) => Ordering::Less,
                (false, false) => match direction {
                    OrderDirection::Asc => cmp_datum(x, y),
                    OrderDirection::Desc => cmp_datum(y, x),
                },
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}
