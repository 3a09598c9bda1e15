//! Artifact generation: materializes a list's public CSV/JSON/TXT files on
//! disk after any row mutation, and on demand when a file is missing.
//!
//! Files are written to a `.tmp` sibling and renamed into place so readers
//! never observe a partial artifact.

use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use chrono_tz::Europe::Paris;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::info;

use listmill_ingest::ArtifactHook;
use listmill_store::{List, ListColumn, ListRow, ListStore, StoreError};

const PUBLIC_FILES_DIR: &str = "public_files";

#[derive(Debug, Error)]
pub enum PublishError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("I/O error writing artifact: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV artifact error: {0}")]
    Csv(#[from] csv::Error),

    #[error("List {0} not found")]
    ListNotFound(i64),

    #[error("List {list_id} has no column named '{column}' for the TXT artifact")]
    UnknownTxtColumn { list_id: i64, column: String },

    #[error("List {0} has no columns to publish as TXT")]
    NoColumns(i64),
}

pub type Result<T> = std::result::Result<T, PublishError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArtifactFormat {
    Csv,
    Json,
    Txt,
}

impl ArtifactFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Csv => "csv",
            Self::Json => "json",
            Self::Txt => "txt",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Csv => "text/csv; charset=utf-8",
            Self::Json => "application/json",
            Self::Txt => "text/plain; charset=utf-8",
        }
    }

    pub fn enabled_for(&self, list: &List) -> bool {
        match self {
            Self::Csv => list.public_csv_enabled,
            Self::Json => list.public_json_enabled,
            Self::Txt => list.public_txt_enabled,
        }
    }

    pub const ALL: [ArtifactFormat; 3] = [Self::Csv, Self::Json, Self::Txt];
}

pub struct Publisher {
    store: Arc<ListStore>,
    root: PathBuf,
}

impl Publisher {
    pub fn new(store: Arc<ListStore>, data_dir: &Path) -> Self {
        Self {
            store,
            root: data_dir.join(PUBLIC_FILES_DIR),
        }
    }

    pub fn artifact_path(&self, list_id: i64, format: ArtifactFormat) -> PathBuf {
        self.root
            .join(format!("list_{}.{}", list_id, format.extension()))
    }

    /// Regenerate every enabled artifact for a list and remove files for
    /// formats that are no longer enabled.
    pub async fn refresh(&self, list_id: i64) -> Result<()> {
        let list = self
            .store
            .get_list(list_id)
            .await?
            .ok_or(PublishError::ListNotFound(list_id))?;

        for format in ArtifactFormat::ALL {
            let path = self.artifact_path(list_id, format);
            if format.enabled_for(&list) {
                self.generate(&list, format).await?;
            } else if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Return the artifact path, generating the file if it does not exist
    /// yet (e.g., first request after a restart).
    pub async fn ensure_artifact(&self, list: &List, format: ArtifactFormat) -> Result<PathBuf> {
        let path = self.artifact_path(list.id, format);
        if !tokio::fs::try_exists(&path).await.unwrap_or(false) {
            self.generate(list, format).await?;
        }
        Ok(path)
    }

    /// Remove all artifacts of a deleted list.
    pub async fn remove_artifacts(&self, list_id: i64) -> Result<()> {
        for format in ArtifactFormat::ALL {
            let path = self.artifact_path(list_id, format);
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                tokio::fs::remove_file(&path).await?;
            }
        }
        Ok(())
    }

    /// Attachment filename for CSV downloads, stamped in Paris time.
    pub fn download_name(list: &List) -> String {
        let stamp = Utc::now().with_timezone(&Paris).format("%Y%m%d_%H%M%S");
        format!("{}_{}.csv", list.name, stamp)
    }

    async fn generate(&self, list: &List, format: ArtifactFormat) -> Result<PathBuf> {
        let (columns, rows) = self.store.read_rows(list.id).await?;
        let bytes = match format {
            ArtifactFormat::Csv => render_csv(&columns, &rows, list.public_csv_include_headers)?,
            ArtifactFormat::Json => render_json(&columns, &rows),
            ArtifactFormat::Txt => render_txt(list, &columns, &rows)?,
        };

        tokio::fs::create_dir_all(&self.root).await?;
        let path = self.artifact_path(list.id, format);
        let tmp = path.with_extension(format!("{}.tmp", format.extension()));
        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &path).await?;
        info!(
            "List {}: published {} artifact ({} bytes)",
            list.id,
            format.extension(),
            bytes.len()
        );
        Ok(path)
    }
}

impl ArtifactHook for Publisher {
    fn regenerate<'a>(
        &'a self,
        list_id: i64,
    ) -> Pin<Box<dyn std::future::Future<Output = anyhow::Result<()>> + Send + 'a>> {
        Box::pin(async move {
            self.refresh(list_id).await?;
            Ok(())
        })
    }
}

fn render_csv(columns: &[ListColumn], rows: &[ListRow], include_headers: bool) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if include_headers {
        writer.write_record(columns.iter().map(|c| c.name.as_str()))?;
    }
    for row in rows {
        let record: Vec<&str> = (0..columns.len())
            .map(|i| row.values.get(i).and_then(Option::as_deref).unwrap_or(""))
            .collect();
        writer.write_record(&record)?;
    }
    Ok(writer
        .into_inner()
        .map_err(|e| PublishError::Io(e.into_error()))?)
}

fn render_json(columns: &[ListColumn], rows: &[ListRow]) -> Vec<u8> {
    let records: Vec<Value> = rows
        .iter()
        .map(|row| {
            let mut object = Map::new();
            for (index, column) in columns.iter().enumerate() {
                let value = row
                    .values
                    .get(index)
                    .and_then(|v| v.as_ref())
                    .map(|v| Value::String(v.clone()))
                    .unwrap_or(Value::Null);
                object.insert(column.name.clone(), value);
            }
            Value::Object(object)
        })
        .collect();
    let mut bytes = serde_json::to_vec_pretty(&records).unwrap_or_else(|_| b"[]".to_vec());
    bytes.push(b'\n');
    bytes
}

fn render_txt(list: &List, columns: &[ListColumn], rows: &[ListRow]) -> Result<Vec<u8>> {
    let column = match &list.public_txt_column {
        Some(name) if !name.is_empty() => columns
            .iter()
            .position(|c| &c.name == name)
            .ok_or_else(|| PublishError::UnknownTxtColumn {
                list_id: list.id,
                column: name.clone(),
            })?,
        _ => {
            if columns.is_empty() {
                return Err(PublishError::NoColumns(list.id));
            }
            0
        }
    };

    let mut out = String::new();
    if list.public_txt_include_headers {
        out.push_str(&columns[column].name);
        out.push('\n');
    }
    for row in rows {
        let value = row
            .values
            .get(column)
            .and_then(Option::as_deref)
            .unwrap_or("");
        out.push_str(value);
        out.push('\n');
    }
    Ok(out.into_bytes())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn columns(names: &[&str]) -> Vec<ListColumn> {
        names
            .iter()
            .enumerate()
            .map(|(i, name)| ListColumn {
                list_id: 1,
                name: name.to_string(),
                position: i as i64,
                column_type: listmill_store::ColumnType::Text,
            })
            .collect()
    }

    fn row(id: i64, values: &[&str]) -> ListRow {
        ListRow {
            row_id: id,
            values: values.iter().map(|v| Some(v.to_string())).collect(),
        }
    }

    #[test]
    fn csv_render_quotes_per_rfc4180() {
        let cols = columns(&["name", "note"]);
        let rows = vec![row(1, &["smith, john", "says \"hi\""])];
        let bytes = render_csv(&cols, &rows, true).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(text, "name,note\n\"smith, john\",\"says \"\"hi\"\"\"\n");

        let bytes = render_csv(&cols, &rows, false).unwrap();
        assert!(!String::from_utf8(bytes).unwrap().starts_with("name"));
    }

    #[test]
    fn json_render_preserves_column_order_and_nulls() {
        let cols = columns(&["b", "a"]);
        let rows = vec![ListRow {
            row_id: 1,
            values: vec![Some("2".into()), None],
        }];
        let bytes = render_json(&cols, &rows);
        let parsed: Vec<Map<String, Value>> = serde_json::from_slice(&bytes).unwrap();
        let keys: Vec<&String> = parsed[0].keys().collect();
        assert_eq!(keys, ["b", "a"]);
        assert_eq!(parsed[0]["a"], Value::Null);
    }

    #[test]
    fn txt_render_uses_the_configured_column() {
        let cols = columns(&["ip", "name"]);
        let rows = vec![row(1, &["10.0.0.1", "alpha"]), row(2, &["10.0.0.2", "beta"])];

        let mut list = sample_list();
        list.public_txt_column = Some("name".into());
        let text = String::from_utf8(render_txt(&list, &cols, &rows).unwrap()).unwrap();
        assert_eq!(text, "alpha\nbeta\n");

        list.public_txt_include_headers = true;
        let text = String::from_utf8(render_txt(&list, &cols, &rows).unwrap()).unwrap();
        assert_eq!(text, "name\nalpha\nbeta\n");

        list.public_txt_column = Some("missing".into());
        assert!(matches!(
            render_txt(&list, &cols, &rows),
            Err(PublishError::UnknownTxtColumn { .. })
        ));
    }

    fn sample_list() -> List {
        List {
            id: 1,
            name: "sample".into(),
            description: None,
            update_type: listmill_store::UpdateType::Manual,
            update_schedule: None,
            update_config: None,
            data_source_format: listmill_store::SourceFormat::Csv,
            max_results: 0,
            last_update: None,
            filter_enabled: false,
            filter_rules: None,
            ip_restriction_enabled: false,
            allowed_ips: None,
            is_active: true,
            is_published: false,
            json_config_status: listmill_store::JsonConfigStatus::NotConfigured,
            json_data_path: None,
            json_pagination_enabled: false,
            json_next_page_path: None,
            json_max_pages: 10,
            json_selected_columns: None,
            auto_create_columns: true,
            public_csv_enabled: false,
            public_json_enabled: false,
            public_txt_enabled: false,
            public_txt_column: None,
            public_csv_include_headers: true,
            public_txt_include_headers: false,
            public_access_token: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }
}
