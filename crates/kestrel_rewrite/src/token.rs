use kestrel_common::error::RewriteError;
use kestrel_common::select_context::DerivedColumn;
use kestrel_common::statement::{PaginationSegment, ValueExpr};
use kestrel_sharding::RouteUnit;

/// One value of an IN list and the route units whose shard can hold rows
/// matching it.
#[derive(Debug, Clone, PartialEq)]
pub struct InListItem {
    pub value: ValueExpr,
    pub units: Vec<RouteUnit>,
}

impl InListItem {
    pub fn matches(&self, unit: &RouteUnit) -> bool {
        self.units.contains(unit)
    }
}

/// A span `[start, stop)` of the original SQL and what replaces it.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlToken {
    /// Logic table occurrence → the unit's actual table.
    Table {
        start: usize,
        stop: usize,
        logic_table: String,
    },
    /// Schema qualifier → the unit's data source name.
    Schema { start: usize, stop: usize },
    /// Index name → `<index>_<actual table>`.
    Index {
        start: usize,
        stop: usize,
        name: String,
        logic_table: String,
    },
    /// Zero-width insertion of derived columns after the select list.
    Projections {
        at: usize,
        columns: Vec<DerivedColumn>,
    },
    /// Parenthesized IN list → only the values that can match on the unit.
    InList {
        start: usize,
        stop: usize,
        items: Vec<InListItem>,
    },
    /// OFFSET value.
    Offset(PaginationSegment),
    /// LIMIT / FETCH row count.
    RowCount(PaginationSegment),
}

impl SqlToken {
    pub fn start(&self) -> usize {
        match self {
            SqlToken::Table { start, .. }
            | SqlToken::Schema { start, .. }
            | SqlToken::Index { start, .. }
            | SqlToken::InList { start, .. } => *start,
            SqlToken::Projections { at, .. } => *at,
            SqlToken::Offset(seg) | SqlToken::RowCount(seg) => seg.start,
        }
    }

    pub fn stop(&self) -> usize {
        match self {
            SqlToken::Table { stop, .. }
            | SqlToken::Schema { stop, .. }
            | SqlToken::Index { stop, .. }
            | SqlToken::InList { stop, .. } => *stop,
            SqlToken::Projections { at, .. } => *at,
            SqlToken::Offset(seg) | SqlToken::RowCount(seg) => seg.stop,
        }
    }

    pub fn kind_name(&self) -> &'static str {
        match self {
            SqlToken::Table { .. } => "table",
            SqlToken::Schema { .. } => "schema",
            SqlToken::Index { .. } => "index",
            SqlToken::Projections { .. } => "projections",
            SqlToken::InList { .. } => "in_list",
            SqlToken::Offset(_) => "offset",
            SqlToken::RowCount(_) => "row_count",
        }
    }
}

/// Tokens for one SQL text, validated once and rendered many times.
///
/// Invariants checked by [`TokenSet::new`]: tokens are ascending by start,
/// no token begins before the previous one ends, and every boundary lies
/// inside the text on a UTF-8 character boundary. Tokens are never
/// re-sorted here; an unsorted input is a generator bug.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenSet {
    tokens: Vec<SqlToken>,
}

impl TokenSet {
    pub fn new(tokens: Vec<SqlToken>, sql: &str) -> Result<Self, RewriteError> {
        let mut previous: Option<(usize, usize)> = None;
        for token in &tokens {
            let (start, stop) = (token.start(), token.stop());
            if start > stop || stop > sql.len() {
                return Err(RewriteError::TokenOutOfBounds {
                    start,
                    stop,
                    len: sql.len(),
                });
            }
            for pos in [start, stop] {
                if !sql.is_char_boundary(pos) {
                    return Err(RewriteError::NotCharBoundary(pos));
                }
            }
            if let Some((previous_start, previous_stop)) = previous {
                if start < previous_start {
                    return Err(RewriteError::UnsortedTokens {
                        previous_start,
                        start,
                    });
                }
                if start < previous_stop {
                    return Err(RewriteError::OverlappingTokens {
                        previous_stop,
                        start,
                    });
                }
            }
            previous = Some((start, stop));
        }
        Ok(Self { tokens })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn tokens(&self) -> &[SqlToken] {
        &self.tokens
    }

    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}
