//! `rusqlite` column hooks for [`JsonColumn`].
//!
//! `ToSql` produces the storable value on write and `FromSql` consumes the
//! stored value on read. Both delegate to the store-agnostic codec so every
//! record type shares one adapter.

use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, Value, ValueRef};
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::json_column::{ColumnError, JsonColumn, RawColumn};

impl<T: Serialize> ToSql for JsonColumn<T> {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        let encoded =
            self.encode().map_err(|err| rusqlite::Error::ToSqlConversionFailure(Box::new(err)))?;
        Ok(ToSqlOutput::Owned(encoded.map_or(Value::Null, Value::Text)))
    }
}

impl<T: DeserializeOwned> FromSql for JsonColumn<T> {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let raw = match value {
            ValueRef::Null => RawColumn::Null,
            ValueRef::Integer(int) => RawColumn::Integer(int),
            ValueRef::Real(real) => RawColumn::Real(real),
            ValueRef::Text(text) => RawColumn::Text(text),
            ValueRef::Blob(bytes) => RawColumn::Blob(bytes),
        };

        Self::decode(raw).map_err(|err| match err {
            ColumnError::WrongRepresentation { .. } => FromSqlError::InvalidType,
            other => FromSqlError::Other(Box::new(other)),
        })
    }
}
