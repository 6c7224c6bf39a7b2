//! CSV rendering of policy records.
//!
//! Column order and premium formatting are fixed so two exports of the same
//! rows are byte-identical.

use crate::PolicyRecord;

pub const CSV_HEADER: [&str; 5] = ["id", "number", "holder", "premium", "status"];
pub const CSV_FILENAME: &str = "policies.csv";
pub const CSV_CONTENT_TYPE: &str = "text/csv; charset=utf-8";

pub fn format_premium(premium: f64) -> String {
    format!("{:.2}", premium)
}

pub fn write_csv(records: &[PolicyRecord]) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::with_capacity(64 * (records.len() + 1)));

    writer.write_record(CSV_HEADER)?;
    for record in records {
        writer.write_record([
            record.id.to_string(),
            record.number.clone(),
            record.holder.clone(),
            format_premium(record.premium),
            record.status.clone(),
        ])?;
    }

    writer.flush()?;
    writer.into_inner().map_err(|err| err.into_error().into())
}
