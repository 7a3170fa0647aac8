use std::path::Path;

use anyhow::{anyhow, Context, Result};
use marriage_history_core::{
    AuditColumns, History, HistoryError, HistoryId, HistoryKind, OperateTag, Operator,
    Organization,
};
use rusqlite::{params, Connection, Row, ToSql};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

const LATEST_SCHEMA_VERSION: i64 = 2;

const CREATE_SCHEMA_MIGRATIONS_SQL: &str = r"
CREATE TABLE IF NOT EXISTS schema_migrations (
  version INTEGER PRIMARY KEY,
  applied_at TEXT NOT NULL
);
";

const MIGRATION_001_SQL: &str = r"
CREATE TABLE IF NOT EXISTS store_cooperation_history (
  id TEXT PRIMARY KEY,
  store_id INTEGER NOT NULL CHECK (store_id > 0),
  operate_type TEXT NOT NULL CHECK (operate_type IN ('create','modify','delete')),
  operate_time TEXT NOT NULL,
  content TEXT,
  operator_id INTEGER NOT NULL,
  operator_name TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  created_by TEXT NOT NULL,
  updated_by TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS customer_authorization_history (
  id TEXT PRIMARY KEY,
  customer_id INTEGER NOT NULL CHECK (customer_id > 0),
  operate_type TEXT NOT NULL CHECK (operate_type IN ('create','update')),
  operate_time TEXT NOT NULL,
  content TEXT,
  operator_id INTEGER NOT NULL,
  operator_name TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  created_by TEXT NOT NULL,
  updated_by TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS organization_history (
  id TEXT PRIMARY KEY,
  organization_id INTEGER NOT NULL CHECK (organization_id > 0),
  operate_type TEXT NOT NULL CHECK (operate_type IN ('create','modify','delete')),
  operate_time TEXT NOT NULL,
  content TEXT,
  operator_id INTEGER NOT NULL,
  operator_name TEXT NOT NULL,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  created_by TEXT NOT NULL,
  updated_by TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_store_cooperation_history_store ON store_cooperation_history(store_id);
CREATE INDEX IF NOT EXISTS idx_customer_authorization_history_customer ON customer_authorization_history(customer_id);
CREATE INDEX IF NOT EXISTS idx_organization_history_organization ON organization_history(organization_id);
";

const MIGRATION_002_ADD_IS_DELETED_SQL: &str = r"
ALTER TABLE organization_history
  ADD COLUMN is_deleted INTEGER NOT NULL DEFAULT 0 CHECK (is_deleted IN (0, 1));
";

/// Runtime settings applied as pragmas when a store is opened.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct StoreOptions {
    pub busy_timeout_ms: u32,
    pub wal: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self { busy_timeout_ms: 5000, wal: true }
    }
}

pub struct SqliteHistoryStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SchemaStatus {
    pub current_version: i64,
    pub target_version: i64,
    pub pending_versions: Vec<i64>,
    pub inferred_from_legacy: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IntegrityReport {
    pub quick_check_ok: bool,
    pub quick_check_message: String,
    pub schema_status: SchemaStatus,
}

impl SqliteHistoryStore {
    /// Open a SQLite-backed history store with default options.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_options(path, &StoreOptions::default())
    }

    /// Open a SQLite-backed history store and apply `options` as pragmas.
    ///
    /// # Errors
    /// Returns an error when the database cannot be opened or pragmas cannot be applied.
    pub fn open_with_options(path: &Path, options: &StoreOptions) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        let journal = if options.wal { "PRAGMA journal_mode = WAL;" } else { "" };
        conn.execute_batch(&format!(
            "{journal}
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = {};",
            options.busy_timeout_ms
        ))
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    /// Report current and target schema versions plus pending migrations.
    ///
    /// # Errors
    /// Returns an error when schema metadata cannot be read or initialized.
    pub fn schema_status(&self) -> Result<SchemaStatus> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;
        let (current_version, inferred_from_legacy) = detect_effective_schema_version(&self.conn)?;
        let pending_versions = if current_version < LATEST_SCHEMA_VERSION {
            ((current_version + 1)..=LATEST_SCHEMA_VERSION).collect::<Vec<_>>()
        } else {
            Vec::new()
        };

        Ok(SchemaStatus {
            current_version,
            target_version: LATEST_SCHEMA_VERSION,
            pending_versions,
            inferred_from_legacy,
        })
    }

    /// Apply all forward migrations up to the latest supported schema version.
    ///
    /// # Errors
    /// Returns an error when migration bootstrapping or any migration step fails.
    pub fn migrate(&mut self) -> Result<()> {
        self.conn
            .execute_batch(CREATE_SCHEMA_MIGRATIONS_SQL)
            .context("failed to apply schema_migrations table")?;

        let mut version = current_schema_version(&self.conn)?;

        if version == 0 {
            version = self.bootstrap_schema_version()?;
        }

        if version < 2 {
            self.apply_migration_2()?;
            version = current_schema_version(&self.conn)?;
        }

        if version != LATEST_SCHEMA_VERSION {
            return Err(anyhow!(
                "unsupported schema version {version}; expected {LATEST_SCHEMA_VERSION}"
            ));
        }

        Ok(())
    }

    fn bootstrap_schema_version(&self) -> Result<i64> {
        // Tables created outside the migration runner are adopted as-is.
        let adopted = table_exists(&self.conn, Organization::TABLE)?;

        self.conn.execute_batch(MIGRATION_001_SQL).context("failed to apply migration v1")?;
        record_schema_version(&self.conn, 1)?;

        if adopted && table_has_column(&self.conn, Organization::TABLE, "is_deleted")? {
            record_schema_version(&self.conn, 2)?;
            tracing::info!(version = 2, adopted, "recorded existing history schema");
            return Ok(2);
        }

        tracing::info!(version = 1, adopted, "applied history schema migration");
        Ok(1)
    }

    fn apply_migration_2(&mut self) -> Result<()> {
        let tx = self.conn.transaction().context("failed to start migration v2 transaction")?;

        if table_has_column(&tx, Organization::TABLE, "is_deleted")? {
            tracing::warn!(
                table = Organization::TABLE,
                "is_deleted column already present; recording migration v2 only"
            );
        } else {
            tx.execute_batch(MIGRATION_002_ADD_IS_DELETED_SQL)
                .context("failed to add organization_history.is_deleted")?;
        }

        record_schema_version(&tx, 2)?;
        tx.commit().context("failed to commit migration v2")?;
        tracing::info!(version = 2, "applied history schema migration");
        Ok(())
    }

    /// Persist one validated history row.
    ///
    /// # Errors
    /// Returns an error when validation fails, the content cannot be encoded,
    /// or the insert fails.
    pub fn insert_history<K: HistoryKind>(&mut self, record: &History<K>) -> Result<()> {
        record.validate().context("history validation failed")?;

        let (deleted_column, deleted_param) =
            if K::TRACKS_SOFT_DELETE { (", is_deleted", ", ?12") } else { ("", "") };
        let sql = format!(
            "INSERT INTO {table}(
                id, {subject}, operate_type, operate_time, content,
                operator_id, operator_name, created_at, updated_at, created_by, updated_by{deleted_column}
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11{deleted_param})",
            table = K::TABLE,
            subject = K::SUBJECT_COLUMN,
        );

        let tx = self.conn.transaction().context("failed to start transaction")?;
        {
            let mut stmt = tx.prepare(&sql)?;
            let id = record.id.to_string();
            let operate_time = rfc3339(record.operate_time)?;
            let created_at = rfc3339(record.audit.created_at)?;
            let updated_at = rfc3339(record.audit.updated_at)?;
            let operate_type = record.operate_type.as_str();
            let mut values: Vec<&dyn ToSql> = vec![
                &id,
                &record.subject_id,
                &operate_type,
                &operate_time,
                &record.content,
                &record.operator.id,
                &record.operator.name,
                &created_at,
                &updated_at,
                &record.audit.created_by,
                &record.audit.updated_by,
            ];
            if K::TRACKS_SOFT_DELETE {
                values.push(&record.is_deleted);
            }

            stmt.execute(values.as_slice())
                .with_context(|| format!("failed to insert {} row", K::TABLE))?;
        }
        tx.commit().context("failed to commit history insert")?;

        tracing::debug!(
            table = K::TABLE,
            id = %record.id,
            subject_id = record.subject_id,
            "inserted history row"
        );
        Ok(())
    }

    /// Load one history row by id, including soft-deleted rows.
    ///
    /// # Errors
    /// Returns an error when the query fails or the row cannot be decoded.
    pub fn get_history<K: HistoryKind>(&self, id: HistoryId) -> Result<Option<History<K>>> {
        let sql = format!("{} WHERE id = ?1", select_history_sql::<K>());
        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![id.to_string()])?;

        match rows.next()? {
            Some(row) => Ok(Some(read_history::<K>(row)?)),
            None => Ok(None),
        }
    }

    /// Load every history row for one subject, oldest operation first.
    ///
    /// Soft-deleted rows are skipped unless `include_deleted` is set.
    ///
    /// # Errors
    /// Returns an error when the query fails or any row cannot be decoded.
    pub fn list_history<K: HistoryKind>(
        &self,
        subject_id: i64,
        include_deleted: bool,
    ) -> Result<Vec<History<K>>> {
        let mut sql = format!("{} WHERE {} = ?1", select_history_sql::<K>(), K::SUBJECT_COLUMN);
        if K::TRACKS_SOFT_DELETE && !include_deleted {
            sql.push_str(" AND is_deleted = 0");
        }

        let mut stmt = self.conn.prepare(&sql)?;
        let mut rows = stmt.query(params![subject_id])?;
        let mut records = Vec::new();

        while let Some(row) = rows.next()? {
            records.push(read_history::<K>(row)?);
        }

        // RFC 3339 text with varying fractional digits does not sort lexically.
        records.sort_by(|a, b| a.operate_time.cmp(&b.operate_time).then(a.id.cmp(&b.id)));
        Ok(records)
    }

    /// Flag a history row as deleted without touching its operate type.
    ///
    /// Returns `false` when the row does not exist or was already deleted.
    ///
    /// # Errors
    /// Returns an error when the kind does not track soft deletion, `by` is
    /// empty, or the update fails.
    pub fn soft_delete_history<K: HistoryKind>(
        &mut self,
        id: HistoryId,
        by: &str,
        at: OffsetDateTime,
    ) -> Result<bool> {
        if !K::TRACKS_SOFT_DELETE {
            return Err(HistoryError::Validation(format!(
                "{} does not track soft deletion",
                K::TABLE
            ))
            .into());
        }

        let Some(mut record) = self.get_history::<K>(id)? else {
            tracing::warn!(table = K::TABLE, %id, "soft delete target not found");
            return Ok(false);
        };

        if record.is_deleted {
            tracing::warn!(table = K::TABLE, %id, "soft delete target already deleted");
            return Ok(false);
        }

        record.mark_deleted(by, at).context("soft delete rejected")?;

        let tx = self.conn.transaction().context("failed to start transaction")?;
        let changed = tx
            .execute(
                &format!(
                    "UPDATE {} SET is_deleted = 1, updated_at = ?2, updated_by = ?3
                     WHERE id = ?1 AND is_deleted = 0",
                    K::TABLE
                ),
                params![
                    id.to_string(),
                    rfc3339(record.audit.updated_at)?,
                    record.audit.updated_by
                ],
            )
            .with_context(|| format!("failed to soft delete {} row", K::TABLE))?;
        tx.commit().context("failed to commit soft delete")?;

        tracing::debug!(table = K::TABLE, %id, by, "soft deleted history row");
        Ok(changed == 1)
    }

    /// Run quick-check and schema status health probes.
    ///
    /// # Errors
    /// Returns an error when any integrity probe query fails.
    pub fn integrity_check(&self) -> Result<IntegrityReport> {
        let quick_check_message: String = self
            .conn
            .query_row("PRAGMA quick_check", [], |row| row.get::<_, String>(0))
            .context("failed to run PRAGMA quick_check")?;

        let schema_status = self.schema_status()?;
        Ok(IntegrityReport {
            quick_check_ok: quick_check_message == "ok",
            quick_check_message,
            schema_status,
        })
    }
}

fn select_history_sql<K: HistoryKind>() -> String {
    let deleted = if K::TRACKS_SOFT_DELETE { "is_deleted" } else { "0" };
    format!(
        "SELECT
            id, {subject}, operate_type, operate_time, content,
            operator_id, operator_name, {deleted},
            created_at, updated_at, created_by, updated_by
         FROM {table}",
        subject = K::SUBJECT_COLUMN,
        table = K::TABLE,
    )
}

fn read_history<K: HistoryKind>(row: &Row<'_>) -> Result<History<K>> {
    let id_raw: String = row.get(0)?;
    let operate_raw: String = row.get(2)?;
    let id = HistoryId::parse(&id_raw).ok_or_else(|| anyhow!("invalid ULID: {id_raw}"))?;

    Ok(History {
        id,
        subject_id: row.get(1)?,
        operate_type: <K::Operate as OperateTag>::parse(&operate_raw)
            .ok_or_else(|| anyhow!("unknown operate_type in {}: {operate_raw}", K::TABLE))?,
        operate_time: parse_rfc3339(&row.get::<_, String>(3)?)?,
        content: row
            .get(4)
            .with_context(|| format!("failed to decode content of {} row {id_raw}", K::TABLE))?,
        operator: Operator { id: row.get(5)?, name: row.get(6)? },
        is_deleted: row.get(7)?,
        audit: AuditColumns {
            created_at: parse_rfc3339(&row.get::<_, String>(8)?)?,
            updated_at: parse_rfc3339(&row.get::<_, String>(9)?)?,
            created_by: row.get(10)?,
            updated_by: row.get(11)?,
        },
    })
}

fn table_exists(conn: &Connection, table_name: &str) -> Result<bool> {
    let exists = conn
        .query_row(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type = 'table' AND name = ?1)",
            params![table_name],
            |row| row.get::<_, i64>(0),
        )
        .with_context(|| format!("failed to check if table exists: {table_name}"))?;
    Ok(exists == 1)
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> Result<bool> {
    if !table_exists(conn, table)? {
        return Ok(false);
    }

    let mut stmt = conn
        .prepare(&format!("PRAGMA table_info({table})"))
        .with_context(|| format!("failed to inspect table_info for {table}"))?;
    let mut rows = stmt.query([])?;

    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }

    Ok(false)
}

fn current_schema_version(conn: &Connection) -> Result<i64> {
    let version = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |row| {
            row.get::<_, i64>(0)
        })
        .context("failed to read current schema version")?;
    Ok(version)
}

fn detect_effective_schema_version(conn: &Connection) -> Result<(i64, bool)> {
    let recorded = current_schema_version(conn)?;
    if recorded > 0 {
        return Ok((recorded, false));
    }

    if !table_exists(conn, Organization::TABLE)? {
        return Ok((0, false));
    }

    if table_has_column(conn, Organization::TABLE, "is_deleted")? {
        return Ok((2, true));
    }

    Ok((1, true))
}

fn record_schema_version(conn: &Connection, version: i64) -> Result<()> {
    let now = rfc3339(OffsetDateTime::now_utc())?;
    conn.execute(
        "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
        params![version, now],
    )
    .with_context(|| format!("failed to record migration version {version}"))?;
    Ok(())
}

fn rfc3339(value: OffsetDateTime) -> Result<String> {
    value
        .format(&time::format_description::well_known::Rfc3339)
        .context("failed to format RFC3339 timestamp")
}

fn parse_rfc3339(value: &str) -> Result<OffsetDateTime> {
    OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .with_context(|| format!("invalid RFC3339 timestamp: {value}"))
}

#[cfg(test)]
mod tests {
    use marriage_history_core::{
        snapshot, AuthorizationOperateType, ChangeSet, ColumnError, CustomerAuthorization,
        CustomerAuthorizationHistory, JsonColumn, OperateType, OrganizationHistory,
        StoreCooperation, StoreCooperationHistory,
    };
    use serde_json::json;
    use time::Duration;

    use super::*;

    fn fixture_time() -> OffsetDateTime {
        OffsetDateTime::UNIX_EPOCH + Duration::seconds(1_700_000_000)
    }

    fn operator() -> Operator {
        Operator { id: 7, name: "admin".to_string() }
    }

    fn migrated_store() -> Result<SqliteHistoryStore> {
        let mut store = SqliteHistoryStore::open(Path::new(":memory:"))?;
        store.migrate()?;
        Ok(store)
    }

    fn status_change() -> JsonColumn {
        ChangeSet::new().field("status", "enabled", "disabled").into_content()
    }

    #[test]
    fn migrate_brings_fresh_database_to_latest_version() -> Result<()> {
        let mut store = SqliteHistoryStore::open(Path::new(":memory:"))?;

        let before = store.schema_status()?;
        assert_eq!(before.current_version, 0);
        assert_eq!(before.pending_versions, vec![1, 2]);

        store.migrate()?;
        store.migrate()?;

        let after = store.schema_status()?;
        assert_eq!(after.current_version, LATEST_SCHEMA_VERSION);
        assert!(after.pending_versions.is_empty());
        assert!(!after.inferred_from_legacy);
        assert!(table_has_column(&store.conn, Organization::TABLE, "is_deleted")?);
        assert!(!table_has_column(&store.conn, StoreCooperation::TABLE, "is_deleted")?);
        Ok(())
    }

    #[test]
    fn legacy_organization_table_gains_is_deleted_column() -> Result<()> {
        let mut store = SqliteHistoryStore::open(Path::new(":memory:"))?;
        store.conn.execute_batch(MIGRATION_001_SQL)?;
        let id = HistoryId::new();
        store.conn.execute(
            "INSERT INTO organization_history(
                id, organization_id, operate_type, operate_time, content,
                operator_id, operator_name, created_at, updated_at, created_by, updated_by
            ) VALUES (?1, 4, 'create', ?2, ?3, 7, 'admin', ?2, ?2, 'admin', 'admin')",
            params![id.to_string(), "2023-11-14T22:13:20Z", r#"{"name":"Lotus Hall"}"#],
        )?;

        let status = store.schema_status()?;
        assert_eq!(status.current_version, 1);
        assert!(status.inferred_from_legacy);
        assert_eq!(status.pending_versions, vec![2]);

        store.migrate()?;

        let loaded = store.get_history::<Organization>(id)?;
        let Some(loaded) = loaded else {
            panic!("legacy row must survive migration");
        };
        assert!(!loaded.is_deleted);
        assert_eq!(loaded.content.get("name"), Some(&json!("Lotus Hall")));
        assert_eq!(loaded.operate_time, fixture_time());
        Ok(())
    }

    #[test]
    fn each_history_kind_round_trips_its_content() -> Result<()> {
        let mut store = migrated_store()?;

        let cooperation = StoreCooperationHistory::record(
            11,
            OperateType::Modify,
            operator(),
            status_change(),
            fixture_time(),
        );
        let authorization = CustomerAuthorizationHistory::record(
            22,
            AuthorizationOperateType::Update,
            operator(),
            ChangeSet::new()
                .field("scopes", json!(["orders"]), json!(["orders", "refunds"]))
                .field("expires_at", json!(null), json!("2024-01-01"))
                .into_content(),
            fixture_time(),
        );
        let organization = OrganizationHistory::record(
            33,
            OperateType::Create,
            operator(),
            snapshot(&json!({"name": "Lotus Hall", "branches": [1, 2]}))?,
            fixture_time(),
        );

        store.insert_history(&cooperation)?;
        store.insert_history(&authorization)?;
        store.insert_history(&organization)?;

        assert_eq!(store.list_history::<StoreCooperation>(11, false)?, vec![cooperation]);
        assert_eq!(
            store.list_history::<CustomerAuthorization>(22, false)?,
            vec![authorization]
        );
        assert_eq!(store.list_history::<Organization>(33, false)?, vec![organization]);
        assert!(store.list_history::<Organization>(11, false)?.is_empty());
        Ok(())
    }

    #[test]
    fn status_change_content_is_stored_as_json_text() -> Result<()> {
        let mut store = migrated_store()?;
        let record = StoreCooperationHistory::record(
            11,
            OperateType::Modify,
            operator(),
            status_change(),
            fixture_time(),
        );
        store.insert_history(&record)?;

        let (kind, text): (String, String) = store.conn.query_row(
            "SELECT typeof(content), content FROM store_cooperation_history WHERE id = ?1",
            params![record.id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert_eq!(kind, "text");
        assert_eq!(text, r#"{"field":"status","old":"enabled","new":"disabled"}"#);
        Ok(())
    }

    #[test]
    fn absent_content_is_stored_as_null() -> Result<()> {
        let mut store = migrated_store()?;
        let record = OrganizationHistory::record(
            5,
            OperateType::Delete,
            operator(),
            JsonColumn::absent(),
            fixture_time(),
        );
        store.insert_history(&record)?;

        let kind: String = store.conn.query_row(
            "SELECT typeof(content) FROM organization_history WHERE id = ?1",
            params![record.id.to_string()],
            |row| row.get(0),
        )?;
        assert_eq!(kind, "null");

        let loaded = store.get_history::<Organization>(record.id)?;
        assert!(loaded.is_some_and(|row| row.content.is_absent()));
        Ok(())
    }

    #[test]
    fn malformed_content_fails_the_read() -> Result<()> {
        let store = migrated_store()?;
        store.conn.execute(
            "INSERT INTO store_cooperation_history(
                id, store_id, operate_type, operate_time, content,
                operator_id, operator_name, created_at, updated_at, created_by, updated_by
            ) VALUES (?1, 9, 'modify', ?2, '{not valid json', 7, 'admin', ?2, ?2, 'admin', 'admin')",
            params![HistoryId::new().to_string(), "2023-11-14T22:13:20Z"],
        )?;

        let Err(err) = store.list_history::<StoreCooperation>(9, false) else {
            panic!("malformed content must not load");
        };
        assert!(err.chain().any(|cause| matches!(
            cause.downcast_ref::<ColumnError>(),
            Some(ColumnError::Malformed(_))
        )));
        Ok(())
    }

    #[test]
    fn numeric_literal_in_text_column_is_malformed() -> Result<()> {
        let store = migrated_store()?;
        let id = HistoryId::new();
        store.conn.execute(
            "INSERT INTO customer_authorization_history(
                id, customer_id, operate_type, operate_time, content,
                operator_id, operator_name, created_at, updated_at, created_by, updated_by
            ) VALUES (?1, 9, 'create', ?2, 1, 7, 'admin', ?2, ?2, 'admin', 'admin')",
            params![id.to_string(), "2023-11-14T22:13:20Z"],
        )?;

        // TEXT affinity stores the literal as "1", which is not a JSON object.
        let Err(err) = store.get_history::<CustomerAuthorization>(id) else {
            panic!("numeric content must not load");
        };
        assert!(err
            .chain()
            .any(|cause| matches!(cause.downcast_ref::<ColumnError>(), Some(ColumnError::Malformed(_)))));
        Ok(())
    }

    #[test]
    fn check_constraints_reject_foreign_operate_types() -> Result<()> {
        let store = migrated_store()?;
        let result = store.conn.execute(
            "INSERT INTO store_cooperation_history(
                id, store_id, operate_type, operate_time, content,
                operator_id, operator_name, created_at, updated_at, created_by, updated_by
            ) VALUES (?1, 9, 'update', ?2, NULL, 7, 'admin', ?2, ?2, 'admin', 'admin')",
            params![HistoryId::new().to_string(), "2023-11-14T22:13:20Z"],
        );
        assert!(result.is_err());
        Ok(())
    }

    #[test]
    fn invalid_records_are_not_written() -> Result<()> {
        let mut store = migrated_store()?;
        let record = StoreCooperationHistory::record(
            0,
            OperateType::Create,
            operator(),
            JsonColumn::absent(),
            fixture_time(),
        );
        let Err(err) = store.insert_history(&record) else {
            panic!("a zero subject id must not be written");
        };
        assert!(matches!(err.downcast_ref::<HistoryError>(), Some(HistoryError::Validation(_))));

        let count: i64 = store.conn.query_row(
            "SELECT COUNT(*) FROM store_cooperation_history",
            [],
            |row| row.get(0),
        )?;
        assert_eq!(count, 0);
        Ok(())
    }

    #[test]
    fn soft_delete_hides_row_without_rewriting_operate_type() -> Result<()> {
        let mut store = migrated_store()?;
        let record = OrganizationHistory::record(
            8,
            OperateType::Modify,
            operator(),
            status_change(),
            fixture_time(),
        );
        store.insert_history(&record)?;

        let later = fixture_time() + Duration::hours(1);
        assert!(store.soft_delete_history::<Organization>(record.id, "auditor", later)?);
        assert!(!store.soft_delete_history::<Organization>(record.id, "auditor", later)?);
        assert!(!store.soft_delete_history::<Organization>(HistoryId::new(), "auditor", later)?);

        assert!(store.list_history::<Organization>(8, false)?.is_empty());

        let all = store.list_history::<Organization>(8, true)?;
        assert_eq!(all.len(), 1);
        let deleted = &all[0];
        assert!(deleted.is_deleted);
        assert_eq!(deleted.operate_type, OperateType::Modify);
        assert_eq!(deleted.audit.updated_by, "auditor");
        assert_eq!(deleted.audit.updated_at, later);
        assert_eq!(deleted.audit.created_at, fixture_time());
        assert_eq!(deleted.content, record.content);
        Ok(())
    }

    #[test]
    fn soft_delete_is_refused_for_kinds_without_the_flag() -> Result<()> {
        let mut store = migrated_store()?;
        let record = StoreCooperationHistory::record(
            8,
            OperateType::Delete,
            operator(),
            JsonColumn::absent(),
            fixture_time(),
        );
        store.insert_history(&record)?;

        let Err(err) =
            store.soft_delete_history::<StoreCooperation>(record.id, "auditor", fixture_time())
        else {
            panic!("store cooperation history has no soft-delete flag");
        };
        assert!(matches!(err.downcast_ref::<HistoryError>(), Some(HistoryError::Validation(_))));
        Ok(())
    }

    #[test]
    fn soft_delete_before_creation_leaves_row_untouched() -> Result<()> {
        let mut store = migrated_store()?;
        let record = OrganizationHistory::record(
            12,
            OperateType::Modify,
            operator(),
            JsonColumn::absent(),
            fixture_time(),
        );
        store.insert_history(&record)?;

        let earlier = fixture_time() - Duration::minutes(1);
        let Err(err) = store.soft_delete_history::<Organization>(record.id, "auditor", earlier) else {
            panic!("deletion cannot predate the row");
        };
        assert!(matches!(err.downcast_ref::<HistoryError>(), Some(HistoryError::Validation(_))));
        assert!(format!("{err:#}").starts_with("soft delete rejected: "));

        let (deleted, updated_by): (bool, String) = store.conn.query_row(
            "SELECT is_deleted, updated_by FROM organization_history WHERE id = ?1",
            params![record.id.to_string()],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        assert!(!deleted);
        assert_eq!(updated_by, "admin");
        Ok(())
    }

    #[test]
    fn list_orders_by_operate_time_across_fractional_seconds() -> Result<()> {
        let mut store = migrated_store()?;
        let whole = StoreCooperationHistory::record(
            3,
            OperateType::Modify,
            operator(),
            status_change(),
            fixture_time() + Duration::seconds(1),
        );
        let fractional = StoreCooperationHistory::record(
            3,
            OperateType::Create,
            operator(),
            JsonColumn::absent(),
            fixture_time() + Duration::milliseconds(500),
        );
        store.insert_history(&whole)?;
        store.insert_history(&fractional)?;

        let listed = store.list_history::<StoreCooperation>(3, false)?;
        let ids = listed.iter().map(|row| row.id).collect::<Vec<_>>();
        assert_eq!(ids, vec![fractional.id, whole.id]);
        Ok(())
    }

    #[test]
    fn store_options_fill_missing_fields_with_defaults() -> Result<()> {
        let options: StoreOptions = serde_json::from_value(json!({"busy_timeout_ms": 250}))?;
        assert_eq!(options, StoreOptions { busy_timeout_ms: 250, wal: true });

        let store = SqliteHistoryStore::open_with_options(Path::new(":memory:"), &options)?;
        let timeout: i64 = store.conn.query_row("PRAGMA busy_timeout", [], |row| row.get(0))?;
        assert_eq!(timeout, 250);
        Ok(())
    }

    #[test]
    fn integrity_check_reports_healthy_database() -> Result<()> {
        let store = migrated_store()?;
        let report = store.integrity_check()?;
        assert!(report.quick_check_ok);
        assert_eq!(report.quick_check_message, "ok");
        assert_eq!(report.schema_status.current_version, LATEST_SCHEMA_VERSION);
        Ok(())
    }
}
