use std::fmt::Write as _;

use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::response::Html;
use polreg_contracts::export::format_premium;
use polreg_contracts::{PolicyRecord, ScanQuery, SortDir, SortKey};
use serde::Deserialize;

use super::{ApiError, AppState, store_error_response, validation_error};

#[derive(Debug, Default, Deserialize)]
pub(super) struct IndexParams {
    q: Option<String>,
}

/// Ungated HTML listing. Ordering is fixed to newest first.
pub(super) async fn index(
    State(state): State<AppState>,
    params: Result<Query<IndexParams>, QueryRejection>,
) -> Result<Html<String>, ApiError> {
    let Query(params) = params.map_err(|err| validation_error(err.body_text(), None))?;
    let q = params.q.unwrap_or_default();

    let query = ScanQuery {
        search: (!q.is_empty()).then(|| q.clone()),
        sort: SortKey::Id,
        dir: SortDir::Desc,
    };

    let records = state
        .store
        .scan_all(&query)
        .await
        .map_err(|err| store_error_response(&err))?;

    Ok(Html(render_index(
        &state.config.app_name,
        &q,
        &records,
        state.access.is_enabled(),
    )))
}

fn render_index(app_name: &str, q: &str, records: &[PolicyRecord], gated: bool) -> String {
    let mut out = String::with_capacity(1024 + records.len() * 160);
    let title = escape_html(app_name);
    let q = escape_html(q);

    let _ = write!(
        out,
        "<!doctype html>\n<html lang=\"en\">\n<head>\n<meta charset=\"utf-8\">\n\
         <title>{title}</title>\n</head>\n<body>\n<h1>{title}</h1>\n\
         <p class=\"pills\"><span id=\"auth\">auth: {auth}</span></p>\n\
         <form method=\"get\" action=\"/\">\n\
         <input type=\"search\" name=\"q\" value=\"{q}\" placeholder=\"Search number, holder or status\">\n\
         <button type=\"submit\">Search</button>\n</form>\n\
         <p id=\"count\">{count} policies</p>\n",
        auth = if gated { "required" } else { "open" },
        count = records.len(),
    );

    out.push_str(
        "<table>\n<thead><tr><th>id</th><th>number</th><th>holder</th>\
         <th>premium</th><th>status</th></tr></thead>\n<tbody>\n",
    );
    for record in records {
        let _ = writeln!(
            out,
            "<tr data-id=\"{id}\"><td>{id}</td><td>{number}</td><td>{holder}</td>\
             <td>{premium}</td><td>{status}</td></tr>",
            id = record.id,
            number = escape_html(&record.number),
            holder = escape_html(&record.holder),
            premium = format_premium(record.premium),
            status = escape_html(&record.status),
        );
    }
    out.push_str("</tbody>\n</table>\n</body>\n</html>\n");
    out
}

fn escape_html(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for ch in raw.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#x27;"),
            _ => out.push(ch),
        }
    }
    out
}
