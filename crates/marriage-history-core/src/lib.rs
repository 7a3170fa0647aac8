//! History records for the marriage-system administrative backend.
//!
//! Every history table stores its change payload in one nullable JSON text
//! column. [`JsonColumn`] is the single adapter for that column and
//! [`History`] is the single record shape, bound to a table by a
//! [`HistoryKind`] marker.

mod history;
mod json_column;
#[cfg(feature = "rusqlite")]
mod sqlite;

pub use history::{
    snapshot, AuditColumns, AuthorizationOperateType, ChangeSet, CustomerAuthorization,
    CustomerAuthorizationHistory, FieldChange, History, HistoryError, HistoryId, HistoryKind,
    OperateTag, OperateType, Operator, Organization, OrganizationHistory, StoreCooperation,
    StoreCooperationHistory,
};
pub use json_column::{ColumnError, ContentMap, JsonColumn, RawColumn};
