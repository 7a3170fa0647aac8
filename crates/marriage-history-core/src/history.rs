use std::fmt::{Debug, Display, Formatter};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use ulid::Ulid;

use crate::json_column::{ColumnError, ContentMap, JsonColumn};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum HistoryError {
    #[error("validation error: {0}")]
    Validation(String),
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
pub struct HistoryId(pub Ulid);

impl HistoryId {
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        Ulid::from_string(raw).ok().map(Self)
    }
}

impl Default for HistoryId {
    fn default() -> Self {
        Self::new()
    }
}

impl Display for HistoryId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Operation tag recorded on a history row.
pub trait OperateTag:
    Copy + Eq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static
{
    const ALL: &'static [Self];

    fn as_str(self) -> &'static str;

    fn parse(value: &str) -> Option<Self>;
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperateType {
    Create,
    Modify,
    Delete,
}

impl OperateTag for OperateType {
    const ALL: &'static [Self] = &[Self::Create, Self::Modify, Self::Delete];

    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Modify => "modify",
            Self::Delete => "delete",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "modify" => Some(Self::Modify),
            "delete" => Some(Self::Delete),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AuthorizationOperateType {
    Create,
    Update,
}

impl OperateTag for AuthorizationOperateType {
    const ALL: &'static [Self] = &[Self::Create, Self::Update];

    fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
        }
    }

    fn parse(value: &str) -> Option<Self> {
        match value {
            "create" => Some(Self::Create),
            "update" => Some(Self::Update),
            _ => None,
        }
    }
}

/// Table binding for one family of history rows.
pub trait HistoryKind: Debug + Clone + Copy + PartialEq + Eq + Send + Sync + 'static {
    const TABLE: &'static str;
    /// Column holding the id of the entity the history row describes.
    const SUBJECT_COLUMN: &'static str;
    const TRACKS_SOFT_DELETE: bool;

    type Operate: OperateTag;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreCooperation {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CustomerAuthorization {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Organization {}

impl HistoryKind for StoreCooperation {
    const TABLE: &'static str = "store_cooperation_history";
    const SUBJECT_COLUMN: &'static str = "store_id";
    const TRACKS_SOFT_DELETE: bool = false;

    type Operate = OperateType;
}

impl HistoryKind for CustomerAuthorization {
    const TABLE: &'static str = "customer_authorization_history";
    const SUBJECT_COLUMN: &'static str = "customer_id";
    const TRACKS_SOFT_DELETE: bool = false;

    type Operate = AuthorizationOperateType;
}

impl HistoryKind for Organization {
    const TABLE: &'static str = "organization_history";
    const SUBJECT_COLUMN: &'static str = "organization_id";
    const TRACKS_SOFT_DELETE: bool = true;

    type Operate = OperateType;
}

pub type StoreCooperationHistory = History<StoreCooperation>;
pub type CustomerAuthorizationHistory = History<CustomerAuthorization>;
pub type OrganizationHistory = History<Organization>;

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct Operator {
    pub id: i64,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct AuditColumns {
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub updated_at: OffsetDateTime,
    pub created_by: String,
    pub updated_by: String,
}

/// Immutable audit row: who did what to which subject, and what changed.
///
/// `is_deleted` is only ever set for kinds with `TRACKS_SOFT_DELETE`. It is
/// independent of `operate_type`: soft deleting a history row hides the row,
/// it does not rewrite the operation it recorded.
#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
#[serde(bound = "K: HistoryKind")]
pub struct History<K: HistoryKind> {
    pub id: HistoryId,
    pub subject_id: i64,
    pub operate_type: K::Operate,
    #[serde(with = "time::serde::rfc3339")]
    pub operate_time: OffsetDateTime,
    pub content: JsonColumn<ContentMap>,
    pub operator: Operator,
    #[serde(default)]
    pub is_deleted: bool,
    pub audit: AuditColumns,
}

impl<K: HistoryKind> History<K> {
    /// Build a fresh history row stamped at `at` on behalf of `operator`.
    #[must_use]
    pub fn record(
        subject_id: i64,
        operate_type: K::Operate,
        operator: Operator,
        content: JsonColumn<ContentMap>,
        at: OffsetDateTime,
    ) -> Self {
        let audit = AuditColumns {
            created_at: at,
            updated_at: at,
            created_by: operator.name.clone(),
            updated_by: operator.name.clone(),
        };

        Self {
            id: HistoryId::new(),
            subject_id,
            operate_type,
            operate_time: at,
            content,
            operator,
            is_deleted: false,
            audit,
        }
    }

    /// Check the row before it is persisted.
    ///
    /// # Errors
    /// Returns [`HistoryError::Validation`] when the subject reference, operator,
    /// audit columns, or deletion flag are inconsistent.
    pub fn validate(&self) -> Result<(), HistoryError> {
        if self.subject_id <= 0 {
            return Err(HistoryError::Validation(format!(
                "{} MUST reference an existing subject (got {})",
                K::SUBJECT_COLUMN,
                self.subject_id
            )));
        }

        if self.operator.name.trim().is_empty() {
            return Err(HistoryError::Validation(
                "operator name MUST be provided for every history row".to_string(),
            ));
        }

        if self.audit.created_by.trim().is_empty() || self.audit.updated_by.trim().is_empty() {
            return Err(HistoryError::Validation(
                "created_by and updated_by MUST be provided".to_string(),
            ));
        }

        if self.audit.updated_at < self.audit.created_at {
            return Err(HistoryError::Validation(
                "updated_at MUST NOT precede created_at".to_string(),
            ));
        }

        if self.is_deleted && !K::TRACKS_SOFT_DELETE {
            return Err(HistoryError::Validation(format!(
                "{} does not track soft deletion",
                K::TABLE
            )));
        }

        Ok(())
    }

    /// Flag the row as soft deleted and stamp the audit update columns.
    ///
    /// # Errors
    /// Returns [`HistoryError::Validation`] when the kind does not track soft
    /// deletion, the row is already deleted, or `at` precedes `created_at`.
    pub fn mark_deleted(&mut self, by: &str, at: OffsetDateTime) -> Result<(), HistoryError> {
        if !K::TRACKS_SOFT_DELETE {
            return Err(HistoryError::Validation(format!(
                "{} does not track soft deletion",
                K::TABLE
            )));
        }

        if self.is_deleted {
            return Err(HistoryError::Validation(format!("history row {} is already deleted", self.id)));
        }

        if by.trim().is_empty() {
            return Err(HistoryError::Validation("updated_by MUST be provided".to_string()));
        }

        if at < self.audit.created_at {
            return Err(HistoryError::Validation(
                "deletion time MUST NOT precede created_at".to_string(),
            ));
        }

        self.is_deleted = true;
        self.audit.updated_by = by.to_string();
        self.audit.updated_at = at;
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Eq, PartialEq)]
pub struct FieldChange {
    pub field: String,
    pub old: Value,
    pub new: Value,
}

/// Collects field-level changes into a history `content` payload.
#[derive(Debug, Clone, Default, Eq, PartialEq)]
pub struct ChangeSet {
    changes: Vec<FieldChange>,
}

impl ChangeSet {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, old: impl Into<Value>, new: impl Into<Value>) -> Self {
        let (old, new) = (old.into(), new.into());
        if old != new {
            self.changes.push(FieldChange { field: name.into(), old, new });
        }
        self
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    #[must_use]
    pub fn changes(&self) -> &[FieldChange] {
        &self.changes
    }

    /// One change flattens to `{"field", "old", "new"}`; several nest under
    /// `"changes"`. No changes yields the absent payload.
    #[must_use]
    pub fn into_content(self) -> JsonColumn<ContentMap> {
        let mut changes = self.changes;
        let mut content = ContentMap::new();

        match changes.len() {
            0 => return JsonColumn::absent(),
            1 => {
                if let Some(change) = changes.pop() {
                    content.insert("field".to_string(), Value::String(change.field));
                    content.insert("old".to_string(), change.old);
                    content.insert("new".to_string(), change.new);
                }
            }
            _ => {
                let entries = changes
                    .into_iter()
                    .map(|change| {
                        let mut entry = ContentMap::new();
                        entry.insert("field".to_string(), Value::String(change.field));
                        entry.insert("old".to_string(), change.old);
                        entry.insert("new".to_string(), change.new);
                        Value::Object(entry)
                    })
                    .collect();
                content.insert("changes".to_string(), Value::Array(entries));
            }
        }

        JsonColumn::new(content)
    }
}

/// Capture a whole entity as the payload of a create or delete row.
///
/// Objects become the payload directly; any other JSON shape is wrapped under
/// `"value"`.
///
/// # Errors
/// Returns [`ColumnError::Encode`] when `value` cannot be represented as JSON.
pub fn snapshot<T: Serialize>(value: &T) -> Result<JsonColumn<ContentMap>, ColumnError> {
    match serde_json::to_value(value).map_err(ColumnError::Encode)? {
        Value::Object(map) => Ok(JsonColumn::new(map)),
        other => {
            let mut content = ContentMap::new();
            content.insert("value".to_string(), other);
            Ok(JsonColumn::new(content))
        }
    }
}
