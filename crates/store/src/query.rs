//! SQL composition for policy scans.
//!
//! Only static column names from [`SortKey::column`] and [`SEARCH_COLUMNS`]
//! are spliced into the statement text. The search term is always bound.

use polreg_contracts::{PageRequest, ScanQuery, SortKey};
use sqlx::{QueryBuilder, Sqlite};

pub const SEARCH_COLUMNS: [&str; 3] = ["number", "holder", "status"];

const SELECT_POLICIES: &str = "SELECT id, number, holder, premium, status FROM policies";
const COUNT_POLICIES: &str = "SELECT COUNT(*) FROM policies";

/// Wraps `term` for a `LIKE ... ESCAPE '\'` substring match, escaping the
/// LIKE wildcards so they match literally.
pub fn like_pattern(term: &str) -> String {
    let mut out = String::with_capacity(term.len() + 2);
    out.push('%');
    for ch in term.chars() {
        if matches!(ch, '%' | '_' | '\\') {
            out.push('\\');
        }
        out.push(ch);
    }
    out.push('%');
    out
}

pub fn order_by(query: &ScanQuery) -> String {
    let dir = query.dir.as_sql();
    match query.sort {
        SortKey::Id => format!(" ORDER BY id {}", dir),
        key => format!(" ORDER BY {} {}, id {}", key.column(), dir, dir),
    }
}

fn push_filter(qb: &mut QueryBuilder<'static, Sqlite>, query: &ScanQuery) {
    let Some(term) = query.search.as_deref() else {
        return;
    };

    let pattern = like_pattern(term);
    qb.push(" WHERE (");
    for (idx, column) in SEARCH_COLUMNS.iter().enumerate() {
        if idx != 0 {
            qb.push(" OR ");
        }
        qb.push(*column);
        qb.push(" LIKE ");
        qb.push_bind(pattern.clone());
        qb.push(" ESCAPE '\\'");
    }
    qb.push(")");
}

pub fn count_query(query: &ScanQuery) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(COUNT_POLICIES);
    push_filter(&mut qb, query);
    qb
}

pub fn select_query(query: &ScanQuery) -> QueryBuilder<'static, Sqlite> {
    let mut qb = QueryBuilder::new(SELECT_POLICIES);
    push_filter(&mut qb, query);
    qb.push(order_by(query));
    qb
}

pub fn page_query(query: &ScanQuery, page: PageRequest) -> QueryBuilder<'static, Sqlite> {
    let mut qb = select_query(query);
    qb.push(" LIMIT ");
    qb.push_bind(page.limit);
    qb.push(" OFFSET ");
    qb.push_bind(page.offset);
    qb
}
