//! Exact money values in SQLite.
//!
//! Amounts are `rust_decimal::Decimal` everywhere and stored as normalized
//! decimal text, so `100`, `100.0` and `100.00` all persist as `"100"` and
//! no value ever passes through a float on the write path.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rust_decimal::Decimal;
use std::str::FromStr;

/// SQL adapter for a `Decimal` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SqlDecimal(pub Decimal);

impl ToSql for SqlDecimal {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.0.normalize().to_string()))
    }
}

impl FromSql for SqlDecimal {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        match value {
            ValueRef::Text(raw) => {
                let text = std::str::from_utf8(raw).map_err(|e| FromSqlError::Other(Box::new(e)))?;
                Decimal::from_str(text.trim())
                    .map(SqlDecimal)
                    .map_err(|e| FromSqlError::Other(Box::new(e)))
            }
            ValueRef::Integer(i) => Ok(SqlDecimal(Decimal::from(i))),
            // Rows written by older tooling may carry REAL columns.
            ValueRef::Real(f) => Decimal::try_from(f)
                .map(SqlDecimal)
                .map_err(|e| FromSqlError::Other(Box::new(e))),
            _ => Err(FromSqlError::InvalidType),
        }
    }
}

/// Read a non-null decimal column.
pub fn get(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Decimal> {
    row.get::<_, SqlDecimal>(idx).map(|d| d.0)
}

/// Read a nullable decimal column.
pub fn get_opt(row: &rusqlite::Row<'_>, idx: usize) -> rusqlite::Result<Option<Decimal>> {
    row.get::<_, Option<SqlDecimal>>(idx).map(|d| d.map(|d| d.0))
}

/// `max(0, amount)`, never a negative zero.
pub fn floor_zero(amount: Decimal) -> Decimal {
    if amount <= Decimal::ZERO {
        Decimal::ZERO
    } else {
        amount
    }
}
