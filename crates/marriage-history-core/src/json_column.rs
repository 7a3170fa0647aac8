use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// String-keyed payload stored in a history record's `content` column.
pub type ContentMap = serde_json::Map<String, Value>;

#[derive(Debug, thiserror::Error)]
pub enum ColumnError {
    #[error("failed to encode json column: {0}")]
    Encode(#[source] serde_json::Error),
    #[error("malformed json column: {0}")]
    Malformed(#[source] serde_json::Error),
    #[error("json column stored as {found}; expected text or null")]
    WrongRepresentation { found: &'static str },
}

/// A column value exactly as the backing store surfaced it.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RawColumn<'a> {
    Null,
    Text(&'a [u8]),
    Blob(&'a [u8]),
    Integer(i64),
    Real(f64),
    Boolean(bool),
}

impl RawColumn<'_> {
    #[must_use]
    pub fn kind(self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Text(_) => "text",
            Self::Blob(_) => "blob",
            Self::Integer(_) => "integer",
            Self::Real(_) => "real",
            Self::Boolean(_) => "boolean",
        }
    }
}

/// Structured value persisted as JSON text in a single nullable column.
///
/// The absent state (`NULL` in storage) is kept distinct from a present but
/// empty value: `JsonColumn::absent()` encodes to no value at all while
/// `JsonColumn::new(ContentMap::new())` encodes to `{}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JsonColumn<T = ContentMap>(Option<T>);

impl<T> JsonColumn<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self(Some(value))
    }

    #[must_use]
    pub fn absent() -> Self {
        Self(None)
    }

    #[must_use]
    pub fn from_option(value: Option<T>) -> Self {
        Self(value)
    }

    #[must_use]
    pub fn is_absent(&self) -> bool {
        self.0.is_none()
    }

    #[must_use]
    pub fn value(&self) -> Option<&T> {
        self.0.as_ref()
    }

    #[must_use]
    pub fn into_inner(self) -> Option<T> {
        self.0
    }
}

impl<T: Serialize> JsonColumn<T> {
    /// Render the value to the text stored in the column, or `None` for the
    /// absent state.
    ///
    /// # Errors
    /// Returns [`ColumnError::Encode`] when the value cannot be serialized to JSON.
    pub fn encode(&self) -> Result<Option<String>, ColumnError> {
        self.0
            .as_ref()
            .map(|value| serde_json::to_string(value).map_err(ColumnError::Encode))
            .transpose()
    }
}

impl<T: DeserializeOwned> JsonColumn<T> {
    /// Rebuild the value from a raw stored column.
    ///
    /// `NULL` and the JSON literal `null` both yield the absent state. Text and
    /// byte payloads are parsed as JSON; every other representation is rejected
    /// without coercion.
    ///
    /// # Errors
    /// Returns [`ColumnError::Malformed`] for text that is not valid JSON for `T`
    /// and [`ColumnError::WrongRepresentation`] for non-textual values.
    pub fn decode(raw: RawColumn<'_>) -> Result<Self, ColumnError> {
        match raw {
            RawColumn::Null => Ok(Self::absent()),
            RawColumn::Text(bytes) | RawColumn::Blob(bytes) => {
                serde_json::from_slice::<Option<T>>(bytes).map(Self).map_err(ColumnError::Malformed)
            }
            other => Err(ColumnError::WrongRepresentation { found: other.kind() }),
        }
    }
}

impl JsonColumn<ContentMap> {
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.as_ref().and_then(|map| map.get(key))
    }

    /// Number of top-level keys; zero for the absent state.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.as_ref().map_or(0, ContentMap::len)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> Default for JsonColumn<T> {
    fn default() -> Self {
        Self::absent()
    }
}

impl<T> From<T> for JsonColumn<T> {
    fn from(value: T) -> Self {
        Self::new(value)
    }
}
