//! Statement planning for table synchronization
//!
//! Identifiers are always double-quoted; values never appear in the SQL
//! text produced here, only in bound parameters.

use crate::error::{IngestError, Result};
use crate::metadata::{ColumnSpec, ExportMode, FileMetadata};

/// Suffix of the staging table used by incremental uploads
pub const STAGING_SUFFIX: &str = "_temp";

/// Postgres truncates identifiers longer than this many bytes
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Postgres caps one statement at this many bind parameters
pub const MAX_BIND_PARAMS: usize = 65_535;

const MAIN_ALIAS: &str = "main";
const STAGING_ALIAS: &str = "staging";

/// Quote an identifier, doubling embedded quotes
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

fn qualified(alias: &str, column: &str) -> String {
    format!("{}.{}", alias, quote_ident(column))
}

/// Everything needed to synchronize one file into its table
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncPlan {
    pub table: String,
    /// Set for incremental uploads only
    pub staging: Option<String>,
    pub mode: ExportMode,
    pub primary_keys: Vec<String>,
    pub columns: Vec<ColumnSpec>,
    /// Columns outside the primary key, in column order
    pub non_keys: Vec<String>,
}

impl SyncPlan {
    pub fn new(table: &str, metadata: &FileMetadata) -> Result<Self> {
        let staging = (!metadata.export_mode.is_full())
            .then(|| format!("{}{}", table, STAGING_SUFFIX));

        validate_identifier(table, staging.as_deref().unwrap_or(table))?;

        Ok(Self {
            table: table.to_string(),
            staging,
            mode: metadata.export_mode.clone(),
            primary_keys: metadata.primary_keys.clone(),
            columns: metadata.column_types.clone(),
            non_keys: metadata.non_key_columns().map(str::to_string).collect(),
        })
    }

    pub fn is_incremental(&self) -> bool {
        self.staging.is_some()
    }

    /// Table the rows are written to first
    pub fn landing_table(&self) -> &str {
        self.staging.as_deref().unwrap_or(&self.table)
    }

    /// Rows per INSERT, bounded by the bind parameter limit
    pub fn batch_size(&self, configured: usize) -> usize {
        let per_row = self.columns.len().max(1);
        configured.min(MAX_BIND_PARAMS / per_row).max(1)
    }

    fn column_list(&self) -> String {
        self.columns
            .iter()
            .map(|c| quote_ident(&c.name))
            .collect::<Vec<_>>()
            .join(", ")
    }

    pub fn drop_sql(&self, table: &str) -> String {
        format!("DROP TABLE IF EXISTS {}", quote_ident(table))
    }

    pub fn create_sql(&self, table: &str) -> String {
        let columns = self
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.ty.sql()))
            .collect::<Vec<_>>()
            .join(", ");
        format!("CREATE TABLE {} ({})", quote_ident(table), columns)
    }

    pub fn primary_key_sql(&self, table: &str) -> String {
        let keys = self
            .primary_keys
            .iter()
            .map(|k| quote_ident(k))
            .collect::<Vec<_>>()
            .join(", ");
        format!("ALTER TABLE {} ADD PRIMARY KEY ({})", quote_ident(table), keys)
    }

    /// `INSERT INTO ... (cols) ` prefix; the VALUES list is bound per batch
    pub fn insert_prefix(&self, table: &str) -> String {
        format!("INSERT INTO {} ({}) ", quote_ident(table), self.column_list())
    }

    /// `main.k1 = staging.k1 AND main.k2 = staging.k2 ...`
    pub fn key_join(&self) -> String {
        self.primary_keys
            .iter()
            .map(|k| format!("{} = {}", qualified(MAIN_ALIAS, k), qualified(STAGING_ALIAS, k)))
            .collect::<Vec<_>>()
            .join(" AND ")
    }

    /// Creates the main table from the staging table's shape if missing
    pub fn ensure_main_sql(&self) -> Option<String> {
        let staging = self.staging.as_ref()?;
        Some(format!(
            "CREATE TABLE IF NOT EXISTS {} (LIKE {} INCLUDING ALL)",
            quote_ident(&self.table),
            quote_ident(staging)
        ))
    }

    /// Rewrites non-key columns of matching rows whose values changed
    ///
    /// `None` when every column is part of the key, since a key match
    /// leaves nothing to update.
    pub fn update_sql(&self) -> Option<String> {
        let staging = self.staging.as_ref()?;
        if self.non_keys.is_empty() {
            return None;
        }

        let assignments = self
            .non_keys
            .iter()
            .map(|c| format!("{} = {}", quote_ident(c), qualified(STAGING_ALIAS, c)))
            .collect::<Vec<_>>()
            .join(", ");
        let tuple = |alias: &str| {
            self.non_keys
                .iter()
                .map(|c| qualified(alias, c))
                .collect::<Vec<_>>()
                .join(", ")
        };

        Some(format!(
            "UPDATE {} AS {} SET {} FROM {} AS {} WHERE {} AND ({}) IS DISTINCT FROM ({})",
            quote_ident(&self.table),
            MAIN_ALIAS,
            assignments,
            quote_ident(staging),
            STAGING_ALIAS,
            self.key_join(),
            tuple(MAIN_ALIAS),
            tuple(STAGING_ALIAS),
        ))
    }

    /// Copies staging rows whose key is absent from the main table
    pub fn merge_insert_sql(&self) -> Option<String> {
        let staging = self.staging.as_ref()?;
        let columns = self.column_list();
        let selected = self
            .columns
            .iter()
            .map(|c| qualified(STAGING_ALIAS, &c.name))
            .collect::<Vec<_>>()
            .join(", ");

        Some(format!(
            "INSERT INTO {table} ({columns}) SELECT {selected} FROM {staging} AS {s} \
             WHERE NOT EXISTS (SELECT 1 FROM {table} AS {m} WHERE {join})",
            table = quote_ident(&self.table),
            columns = columns,
            selected = selected,
            staging = quote_ident(staging),
            s = STAGING_ALIAS,
            m = MAIN_ALIAS,
            join = self.key_join(),
        ))
    }

    pub fn drop_staging_sql(&self) -> Option<String> {
        self.staging.as_ref().map(|s| format!("DROP TABLE {}", quote_ident(s)))
    }
}

fn validate_identifier(table: &str, longest: &str) -> Result<()> {
    let invalid = |reason: String| IngestError::InvalidTableName {
        table: table.to_string(),
        reason,
    };

    if table.is_empty() {
        return Err(invalid("name is empty".to_string()));
    }
    if table.contains('\0') {
        return Err(invalid("name contains a NUL byte".to_string()));
    }
    if table.contains(char::REPLACEMENT_CHARACTER) {
        return Err(invalid("file name is not valid UTF-8".to_string()));
    }
    if longest.len() > MAX_IDENTIFIER_BYTES {
        return Err(invalid(format!(
            "'{}' exceeds the {}-byte identifier limit",
            longest, MAX_IDENTIFIER_BYTES
        )));
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::types::ColumnType;

    fn metadata(columns: &[(&str, &str)], keys: &[&str], mode: &str) -> FileMetadata {
        FileMetadata {
            column_headers: columns.iter().map(|(n, _)| n.to_string()).collect(),
            primary_keys: keys.iter().map(|k| k.to_string()).collect(),
            column_types: columns
                .iter()
                .map(|(n, t)| ColumnSpec {
                    name: n.to_string(),
                    ty: ColumnType::parse(t).unwrap(),
                })
                .collect(),
            export_mode: ExportMode::parse(mode),
        }
    }

    fn artist(mode: &str) -> SyncPlan {
        let meta = metadata(&[("id", "INT"), ("name", "VARCHAR(255)")], &["id"], mode);
        SyncPlan::new("artist", &meta).unwrap()
    }

    #[test]
    fn test_full_plan_lands_in_main_table() {
        let plan = artist("FULL");
        assert!(!plan.is_incremental());
        assert_eq!(plan.landing_table(), "artist");
        assert_eq!(plan.create_sql("artist"), r#"CREATE TABLE "artist" ("id" INTEGER, "name" VARCHAR(255))"#);
        assert_eq!(plan.primary_key_sql("artist"), r#"ALTER TABLE "artist" ADD PRIMARY KEY ("id")"#);
        assert!(plan.update_sql().is_none());
        assert!(plan.merge_insert_sql().is_none());
        assert!(plan.drop_staging_sql().is_none());
        assert!(plan.ensure_main_sql().is_none());
    }

    #[test]
    fn test_incremental_plan_uses_staging() {
        let plan = artist("INCREMENTAL");
        assert_eq!(plan.landing_table(), "artist_temp");
        assert_eq!(plan.drop_sql("artist_temp"), r#"DROP TABLE IF EXISTS "artist_temp""#);
        assert_eq!(plan.drop_staging_sql().unwrap(), r#"DROP TABLE "artist_temp""#);
        assert_eq!(
            plan.insert_prefix("artist_temp"),
            r#"INSERT INTO "artist_temp" ("id", "name") "#
        );
    }

    #[test]
    fn test_update_compares_non_key_columns() {
        let plan = artist("INCREMENTAL");
        assert_eq!(plan.non_keys, vec!["name"]);
        assert_eq!(
            plan.update_sql().unwrap(),
            r#"UPDATE "artist" AS main SET "name" = staging."name" FROM "artist_temp" AS staging WHERE main."id" = staging."id" AND (main."name") IS DISTINCT FROM (staging."name")"#
        );
    }

    #[test]
    fn test_composite_key_join_and_anti_join() {
        let meta = metadata(
            &[("collection_id", "INT"), ("song_id", "INT"), ("track", "INT")],
            &["collection_id", "song_id"],
            "INCREMENTAL",
        );
        let plan = SyncPlan::new("collection_song", &meta).unwrap();
        assert_eq!(
            plan.key_join(),
            r#"main."collection_id" = staging."collection_id" AND main."song_id" = staging."song_id""#
        );
        let insert = plan.merge_insert_sql().unwrap();
        assert!(insert.starts_with(
            r#"INSERT INTO "collection_song" ("collection_id", "song_id", "track") SELECT staging."collection_id""#
        ));
        assert!(insert.ends_with(
            r#"WHERE NOT EXISTS (SELECT 1 FROM "collection_song" AS main WHERE main."collection_id" = staging."collection_id" AND main."song_id" = staging."song_id")"#
        ));
    }

    #[test]
    fn test_all_key_table_skips_update() {
        let meta = metadata(&[("a", "INT"), ("b", "INT")], &["a", "b"], "INCREMENTAL");
        let plan = SyncPlan::new("pairs", &meta).unwrap();
        assert!(plan.update_sql().is_none());
        assert!(plan.merge_insert_sql().is_some());
    }

    #[test]
    fn test_identifiers_are_quoted() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("bad\"; DROP TABLE x; --"), "\"bad\"\"; DROP TABLE x; --\"");
    }

    #[test]
    fn test_table_name_limits() {
        let meta = metadata(&[("id", "INT")], &["id"], "INCREMENTAL");
        let name = "a".repeat(60);
        // 60 bytes fits, but the 65-byte staging name does not
        assert!(matches!(
            SyncPlan::new(&name, &meta),
            Err(IngestError::InvalidTableName { .. })
        ));

        let full = metadata(&[("id", "INT")], &["id"], "FULL");
        assert!(SyncPlan::new(&name, &full).is_ok());
        assert!(SyncPlan::new("", &full).is_err());
        assert!(matches!(
            SyncPlan::new("art\u{FFFD}ist", &full),
            Err(IngestError::InvalidTableName { .. })
        ));
    }

    #[test]
    fn test_batch_size_respects_bind_limit() {
        let plan = artist("FULL");
        assert_eq!(plan.batch_size(1000), 1000);

        let wide: Vec<(String, &str)> = (0..100).map(|i| (format!("c{}", i), "TEXT")).collect();
        let columns: Vec<(&str, &str)> = wide.iter().map(|(n, t)| (n.as_str(), *t)).collect();
        let plan = SyncPlan::new("wide", &metadata(&columns, &["c0"], "FULL")).unwrap();
        assert_eq!(plan.batch_size(1000), 655);
    }
}
