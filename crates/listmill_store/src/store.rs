//! List store implementation.
//!
//! All persistence for lists, columns and cells goes through [`ListStore`].
//! Imports replace a list's dataset through `replace_data`, which reconciles
//! columns, truncates cells and bulk-inserts the new dataset in a single
//! transaction; readers see either the old dataset or the new one.

use std::collections::BTreeMap;
use std::net::IpAddr;
use std::str::FromStr;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, NaiveDate, Utc};
use rand::RngCore;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{Pool, Sqlite};
use tracing::{info, warn};

use crate::error::{Result, StoreError};
use crate::models::{ColumnDef, ColumnType, List, ListColumn, ListRow, NewList};
use crate::schema;

/// Access token length in bytes (256 bits, URL-safe base64 encoded).
const TOKEN_BYTES: usize = 32;

pub struct ListStore {
    pool: Pool<Sqlite>,
}

impl ListStore {
    /// Open a store from a `sqlite:<path>` URL (or `sqlite::memory:`).
    pub async fn open(url: &str) -> Result<Self> {
        let Some(path) = url.strip_prefix("sqlite:") else {
            return Err(StoreError::UnsupportedUrl(url.to_string()));
        };
        let options = if path == ":memory:" {
            SqliteConnectOptions::new().in_memory(true)
        } else {
            SqliteConnectOptions::new()
                .filename(path)
                .create_if_missing(true)
        }
        .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create tables if they do not exist yet.
    pub async fn init(&self) -> Result<()> {
        sqlx::query(schema::CREATE_LISTS).execute(&self.pool).await?;
        sqlx::query(schema::CREATE_LIST_COLUMNS)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_LIST_DATA)
            .execute(&self.pool)
            .await?;
        sqlx::query(schema::CREATE_DATA_INDEX)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    // ========================================================================
    // List CRUD
    // ========================================================================

    pub async fn create_list(&self, new: NewList) -> Result<List> {
        let now = Utc::now();
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO lists (name, description, update_type, update_schedule,
                               update_config, data_source_format, max_results,
                               created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id
            "#,
        )
        .bind(&new.name)
        .bind(&new.description)
        .bind(new.update_type.unwrap_or(crate::models::UpdateType::Manual))
        .bind(&new.update_schedule)
        .bind(&new.update_config)
        .bind(new.data_source_format.unwrap_or(crate::models::SourceFormat::Csv))
        .bind(new.max_results.unwrap_or(100))
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        info!("Created list {}: {}", id, new.name);
        self.get_list(id).await?.ok_or(StoreError::ListNotFound(id))
    }

    pub async fn get_list(&self, id: i64) -> Result<Option<List>> {
        let list = sqlx::query_as::<_, List>("SELECT * FROM lists WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(list)
    }

    pub async fn get_list_by_token(&self, token: &str) -> Result<Option<List>> {
        let list = sqlx::query_as::<_, List>(
            "SELECT * FROM lists WHERE public_access_token = ?",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(list)
    }

    pub async fn list_all(&self) -> Result<Vec<List>> {
        let lists = sqlx::query_as::<_, List>("SELECT * FROM lists ORDER BY id ASC")
            .fetch_all(&self.pool)
            .await?;
        Ok(lists)
    }

    /// Lists that the scheduler owns: active, with automatic updates.
    pub async fn list_scheduled(&self) -> Result<Vec<List>> {
        let lists = sqlx::query_as::<_, List>(
            r#"
            SELECT * FROM lists
            WHERE is_active = 1 AND update_type = 'automatic'
            ORDER BY id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(lists)
    }

    /// Persist every mutable field of `list`, then enforce the token
    /// invariant: a token exists iff some public format is enabled.
    pub async fn update_list(&self, list: &List) -> Result<List> {
        let now = Utc::now();
        let affected = sqlx::query(
            r#"
            UPDATE lists SET
                name = ?, description = ?, update_type = ?, update_schedule = ?,
                update_config = ?, data_source_format = ?, max_results = ?,
                filter_enabled = ?, filter_rules = ?,
                ip_restriction_enabled = ?, allowed_ips = ?,
                is_active = ?, is_published = ?,
                json_config_status = ?, json_data_path = ?,
                json_pagination_enabled = ?, json_next_page_path = ?,
                json_max_pages = ?, json_selected_columns = ?,
                auto_create_columns = ?,
                public_csv_enabled = ?, public_json_enabled = ?, public_txt_enabled = ?,
                public_txt_column = ?, public_csv_include_headers = ?,
                public_txt_include_headers = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(&list.name)
        .bind(&list.description)
        .bind(list.update_type)
        .bind(&list.update_schedule)
        .bind(&list.update_config)
        .bind(list.data_source_format)
        .bind(list.max_results)
        .bind(list.filter_enabled)
        .bind(&list.filter_rules)
        .bind(list.ip_restriction_enabled)
        .bind(&list.allowed_ips)
        .bind(list.is_active)
        .bind(list.is_published)
        .bind(list.json_config_status)
        .bind(&list.json_data_path)
        .bind(list.json_pagination_enabled)
        .bind(&list.json_next_page_path)
        .bind(list.json_max_pages)
        .bind(&list.json_selected_columns)
        .bind(list.auto_create_columns)
        .bind(list.public_csv_enabled)
        .bind(list.public_json_enabled)
        .bind(list.public_txt_enabled)
        .bind(&list.public_txt_column)
        .bind(list.public_csv_include_headers)
        .bind(list.public_txt_include_headers)
        .bind(now)
        .bind(list.id)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::ListNotFound(list.id));
        }

        self.ensure_token_state(list.id).await?;
        self.get_list(list.id)
            .await?
            .ok_or(StoreError::ListNotFound(list.id))
    }

    /// Delete a list; columns and cells go with it (synchronous cascade).
    pub async fn delete_list(&self, id: i64) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM list_data WHERE list_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM list_columns WHERE list_id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?;
        let affected = sqlx::query("DELETE FROM lists WHERE id = ?")
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if affected > 0 {
            info!("Deleted list {} with its columns and data", id);
        }
        Ok(affected > 0)
    }

    // ========================================================================
    // Columns and data
    // ========================================================================

    pub async fn columns(&self, list_id: i64) -> Result<Vec<ListColumn>> {
        let cols = sqlx::query_as::<_, ListColumn>(
            "SELECT * FROM list_columns WHERE list_id = ? ORDER BY position ASC",
        )
        .bind(list_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(cols)
    }

    /// Replace the entire dataset of a list in one transaction.
    ///
    /// Columns are rewritten to exactly `columns` (positions from slice
    /// order), all prior cells removed, new cells inserted, and
    /// `last_update` advanced to `now`. On any failure nothing changes.
    ///
    /// Each row must be aligned with `columns`; `None` cells are not stored.
    pub async fn replace_data(
        &self,
        list_id: i64,
        columns: &[ColumnDef],
        rows: &[Vec<Option<String>>],
        now: DateTime<Utc>,
    ) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM list_data WHERE list_id = ?")
            .bind(list_id)
            .execute(&mut *tx)
            .await?;
        sqlx::query("DELETE FROM list_columns WHERE list_id = ?")
            .bind(list_id)
            .execute(&mut *tx)
            .await?;

        for (position, col) in columns.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO list_columns (list_id, name, position, column_type)
                VALUES (?, ?, ?, ?)
                "#,
            )
            .bind(list_id)
            .bind(&col.name)
            .bind(position as i64)
            .bind(col.column_type)
            .execute(&mut *tx)
            .await?;
        }

        for (index, row) in rows.iter().enumerate() {
            let row_id = index as i64 + 1;
            for (position, value) in row.iter().enumerate() {
                let Some(value) = value else { continue };
                if position >= columns.len() {
                    break;
                }
                sqlx::query(
                    r#"
                    INSERT INTO list_data (list_id, row_id, column_position, value)
                    VALUES (?, ?, ?, ?)
                    "#,
                )
                .bind(list_id)
                .bind(row_id)
                .bind(position as i64)
                .bind(value)
                .execute(&mut *tx)
                .await?;
            }
        }

        let affected = sqlx::query(
            "UPDATE lists SET last_update = ?, updated_at = ? WHERE id = ?",
        )
        .bind(now)
        .bind(now)
        .bind(list_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::ListNotFound(list_id));
        }

        tx.commit().await?;
        info!(
            "List {}: replaced dataset ({} columns, {} rows)",
            list_id,
            columns.len(),
            rows.len()
        );
        Ok(rows.len() as u64)
    }

    /// Read all rows of a list in storage order, with the list's row filter
    /// applied when enabled.
    pub async fn read_rows(&self, list_id: i64) -> Result<(Vec<ListColumn>, Vec<ListRow>)> {
        let list = self
            .get_list(list_id)
            .await?
            .ok_or(StoreError::ListNotFound(list_id))?;
        let columns = self.columns(list_id).await?;

        let cells = sqlx::query_as::<_, (i64, i64, Option<String>)>(
            r#"
            SELECT row_id, column_position, value FROM list_data
            WHERE list_id = ?
            ORDER BY row_id ASC, column_position ASC
            "#,
        )
        .bind(list_id)
        .fetch_all(&self.pool)
        .await?;

        let mut by_row: BTreeMap<i64, Vec<Option<String>>> = BTreeMap::new();
        for (row_id, position, value) in cells {
            let row = by_row
                .entry(row_id)
                .or_insert_with(|| vec![None; columns.len()]);
            let position = position as usize;
            if position < row.len() {
                row[position] = value;
            } else {
                warn!(
                    "List {}: cell at position {} has no matching column",
                    list_id, position
                );
            }
        }

        let mut rows: Vec<ListRow> = by_row
            .into_iter()
            .map(|(row_id, values)| ListRow { row_id, values })
            .collect();

        if list.filter_enabled {
            let rules = list.filter_rule_list();
            if !rules.is_empty() {
                let before = rows.len();
                rows.retain(|row| row_matches_rules(row, &rules));
                info!(
                    "List {}: filter kept {} of {} rows",
                    list_id,
                    rows.len(),
                    before
                );
            }
        }

        Ok((columns, rows))
    }

    /// Update individual cells of an existing row. Values are validated
    /// against the column type before anything is written; an invalid value
    /// rejects the whole row.
    pub async fn update_row(
        &self,
        list_id: i64,
        row_id: i64,
        values: &[(String, String)],
    ) -> Result<()> {
        let columns = self.columns(list_id).await?;
        let exists: Option<i64> = sqlx::query_scalar(
            "SELECT row_id FROM list_data WHERE list_id = ? AND row_id = ? LIMIT 1",
        )
        .bind(list_id)
        .bind(row_id)
        .fetch_optional(&self.pool)
        .await?;
        if exists.is_none() {
            return Err(StoreError::RowNotFound { list_id, row_id });
        }

        let mut updates = Vec::new();
        for (name, value) in values {
            let Some(col) = columns.iter().find(|c| &c.name == name) else {
                continue;
            };
            validate_cell(col, value)?;
            updates.push((col.position, value));
        }

        let mut tx = self.pool.begin().await?;
        for (position, value) in updates {
            sqlx::query(
                r#"
                INSERT INTO list_data (list_id, row_id, column_position, value)
                VALUES (?, ?, ?, ?)
                ON CONFLICT (list_id, row_id, column_position)
                DO UPDATE SET value = excluded.value
                "#,
            )
            .bind(list_id)
            .bind(row_id)
            .bind(position)
            .bind(value)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    pub async fn delete_row(&self, list_id: i64, row_id: i64) -> Result<()> {
        let affected = sqlx::query(
            "DELETE FROM list_data WHERE list_id = ? AND row_id = ?",
        )
        .bind(list_id)
        .bind(row_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::RowNotFound { list_id, row_id });
        }
        Ok(())
    }

    // ========================================================================
    // Import bookkeeping
    // ========================================================================

    /// Persist a corrected update configuration (importer format forcing).
    pub async fn persist_update_config(
        &self,
        list_id: i64,
        config_json: &str,
        format: crate::models::SourceFormat,
    ) -> Result<()> {
        let affected = sqlx::query(
            r#"
            UPDATE lists SET update_config = ?, data_source_format = ?, updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(config_json)
        .bind(format)
        .bind(Utc::now())
        .bind(list_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::ListNotFound(list_id));
        }
        Ok(())
    }

    // ========================================================================
    // Access tokens
    // ========================================================================

    /// Replace the list's public access token with a fresh one.
    pub async fn regenerate_token(&self, list_id: i64) -> Result<String> {
        let token = generate_token();
        let affected = sqlx::query(
            "UPDATE lists SET public_access_token = ?, updated_at = ? WHERE id = ?",
        )
        .bind(&token)
        .bind(Utc::now())
        .bind(list_id)
        .execute(&self.pool)
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::ListNotFound(list_id));
        }
        info!("List {}: public access token regenerated", list_id);
        Ok(token)
    }

    pub async fn clear_token(&self, list_id: i64) -> Result<()> {
        sqlx::query(
            "UPDATE lists SET public_access_token = NULL, updated_at = ? WHERE id = ?",
        )
        .bind(Utc::now())
        .bind(list_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Token presence must follow the public flags: present iff any public
    /// format is enabled.
    async fn ensure_token_state(&self, list_id: i64) -> Result<()> {
        let Some(list) = self.get_list(list_id).await? else {
            return Ok(());
        };
        if list.any_public_enabled() && list.public_access_token.is_none() {
            self.regenerate_token(list_id).await?;
        } else if !list.any_public_enabled() && list.public_access_token.is_some() {
            self.clear_token(list_id).await?;
        }
        Ok(())
    }
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::rngs::OsRng.fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn row_matches_rules(row: &ListRow, rules: &[String]) -> bool {
    row.values.iter().flatten().any(|value| {
        let value = value.to_lowercase();
        rules.iter().any(|rule| value.contains(&rule.to_lowercase()))
    })
}

fn validate_cell(col: &ListColumn, value: &str) -> Result<()> {
    let ok = match col.column_type {
        ColumnType::Text => true,
        ColumnType::Number => value.is_empty() || value.parse::<f64>().is_ok(),
        ColumnType::Date => {
            value.is_empty() || NaiveDate::parse_from_str(value, "%Y-%m-%d").is_ok()
        }
        ColumnType::Ip => value.is_empty() || IpAddr::from_str(value).is_ok(),
        ColumnType::Boolean => {
            value.is_empty()
                || matches!(
                    value.to_ascii_lowercase().as_str(),
                    "true" | "false" | "1" | "0" | "yes" | "no"
                )
        }
    };
    if ok {
        Ok(())
    } else {
        Err(StoreError::Validation {
            column: col.name.clone(),
            column_type: col.column_type.as_str().to_string(),
            value: value.to_string(),
        })
    }
}
