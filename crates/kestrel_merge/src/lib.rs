//! Result merging.
//!
//! Shard cursors implement [`QueryResult`]. [`MergeEngine::merge`] picks one
//! composed strategy per statement and returns a [`MergedResult`] the caller
//! pulls rows from; nothing runs in the background.
//!
//! | Shape                              | Strategy                  |
//! |------------------------------------|---------------------------|
//! | one shard                          | transparent               |
//! | GROUP BY equal to ORDER BY         | group-by stream           |
//! | other GROUP BY / aggregates        | group-by memory           |
//! | ORDER BY                           | order-by heap             |
//! | anything else                      | stream concatenation      |
//! | LIMIT / OFFSET (multi-shard)       | pagination decorator      |

mod aggregate;
pub mod compare;
pub mod engine;
pub mod group_by;
pub mod order_by;
pub mod pagination;
pub mod result;
pub mod stream;

pub use compare::RowComparator;
pub use engine::{MergeEngine, MergedResult};
pub use result::{MemoryQueryResult, QueryResult};
