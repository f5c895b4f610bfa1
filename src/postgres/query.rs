use chrono::{DateTime, NaiveDate, NaiveDateTime, Utc};
use serde_json::Value;
use tokio_postgres::types::Type;

use crate::error::DriverError;
use crate::types::RowValues;

/// Column names of a prepared statement, `None` when it returns no columns.
pub(crate) fn describe(stmt: &tokio_postgres::Statement) -> Option<Vec<String>> {
    if stmt.columns().is_empty() {
        return None;
    }
    Some(
        stmt.columns()
            .iter()
            .map(|col| col.name().to_string())
            .collect(),
    )
}

/// Convert fetched rows into positional `RowValues`.
///
/// # Errors
/// Returns a `DriverError` if a column cannot be decoded.
pub(crate) fn rows_to_values(
    rows: &[tokio_postgres::Row],
) -> Result<Vec<Vec<RowValues>>, DriverError> {
    rows.iter()
        .map(|row| {
            (0..row.columns().len())
                .map(|idx| postgres_extract_value(row, idx))
                .collect()
        })
        .collect()
}

/// Extract a `RowValues` from a `tokio_postgres` row at the given index.
///
/// # Errors
/// Returns a `DriverError` if the column cannot be decoded.
pub fn postgres_extract_value(
    row: &tokio_postgres::Row,
    idx: usize,
) -> Result<RowValues, DriverError> {
    let decode_err = |e: tokio_postgres::Error| {
        DriverError::other(format!("cannot decode column {idx}: {e}"))
    };
    let type_info = row.columns()[idx].type_().clone();

    let value = match type_info {
        Type::INT2 => row
            .try_get::<_, Option<i16>>(idx)
            .map_err(decode_err)?
            .map(|v| RowValues::Int(i64::from(v))),
        Type::INT4 => row
            .try_get::<_, Option<i32>>(idx)
            .map_err(decode_err)?
            .map(|v| RowValues::Int(i64::from(v))),
        Type::INT8 => row
            .try_get::<_, Option<i64>>(idx)
            .map_err(decode_err)?
            .map(RowValues::Int),
        Type::FLOAT4 => row
            .try_get::<_, Option<f32>>(idx)
            .map_err(decode_err)?
            .map(|v| RowValues::Float(f64::from(v))),
        Type::FLOAT8 => row
            .try_get::<_, Option<f64>>(idx)
            .map_err(decode_err)?
            .map(RowValues::Float),
        Type::BOOL => row
            .try_get::<_, Option<bool>>(idx)
            .map_err(decode_err)?
            .map(RowValues::Bool),
        Type::TIMESTAMP => row
            .try_get::<_, Option<NaiveDateTime>>(idx)
            .map_err(decode_err)?
            .map(RowValues::Timestamp),
        Type::TIMESTAMPTZ => row
            .try_get::<_, Option<DateTime<Utc>>>(idx)
            .map_err(decode_err)?
            .map(|v| RowValues::Timestamp(v.naive_utc())),
        Type::DATE => row
            .try_get::<_, Option<NaiveDate>>(idx)
            .map_err(decode_err)?
            .map(|d| RowValues::Timestamp(d.and_time(chrono::NaiveTime::default()))),
        Type::JSON | Type::JSONB => row
            .try_get::<_, Option<Value>>(idx)
            .map_err(decode_err)?
            .map(RowValues::JSON),
        Type::BYTEA => row
            .try_get::<_, Option<Vec<u8>>>(idx)
            .map_err(decode_err)?
            .map(RowValues::Blob),
        // text-like and anything else that decodes as a string
        _ => row
            .try_get::<_, Option<String>>(idx)
            .map_err(decode_err)?
            .map(RowValues::Text),
    };

    Ok(value.unwrap_or(RowValues::Null))
}
