//! Database models for Listmill lists.
//!
//! Uses derive macros for FromRow to map database rows to structs. Enum
//! columns are stored as lowercase text.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum UpdateType {
    Manual,
    Automatic,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum SourceFormat {
    Csv,
    Json,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum JsonConfigStatus {
    NotConfigured,
    Configured,
    InProgress,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ColumnType {
    Text,
    Number,
    Date,
    Ip,
    Boolean,
}

impl ColumnType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Text => "text",
            Self::Number => "number",
            Self::Date => "date",
            Self::Ip => "ip",
            Self::Boolean => "boolean",
        }
    }
}

impl Default for ColumnType {
    fn default() -> Self {
        Self::Text
    }
}

// ============================================================================
// Core models
// ============================================================================

/// A tracked list: metadata, refresh configuration and publication flags.
///
/// `update_config`, `filter_rules`, `allowed_ips` and `json_selected_columns`
/// hold JSON blobs; accessors below decode them leniently (bad JSON reads as
/// empty, matching how the data arrived historically).
#[derive(Debug, Clone, FromRow)]
pub struct List {
    pub id: i64,
    pub name: String,
    pub description: Option<String>,
    pub update_type: UpdateType,
    pub update_schedule: Option<String>,
    pub update_config: Option<String>,
    pub data_source_format: SourceFormat,
    pub max_results: i64,
    pub last_update: Option<DateTime<Utc>>,
    pub filter_enabled: bool,
    pub filter_rules: Option<String>,
    pub ip_restriction_enabled: bool,
    pub allowed_ips: Option<String>,
    pub is_active: bool,
    pub is_published: bool,
    pub json_config_status: JsonConfigStatus,
    pub json_data_path: Option<String>,
    pub json_pagination_enabled: bool,
    pub json_next_page_path: Option<String>,
    pub json_max_pages: i64,
    pub json_selected_columns: Option<String>,
    pub auto_create_columns: bool,
    pub public_csv_enabled: bool,
    pub public_json_enabled: bool,
    pub public_txt_enabled: bool,
    pub public_txt_column: Option<String>,
    pub public_csv_include_headers: bool,
    pub public_txt_include_headers: bool,
    pub public_access_token: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A selected JSON column: name plus the declared type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectedColumn {
    pub name: String,
    #[serde(rename = "type", default)]
    pub column_type: ColumnType,
}

impl List {
    /// Parsed update configuration map (empty on missing or invalid JSON).
    pub fn update_config_map(&self) -> serde_json::Map<String, serde_json::Value> {
        parse_json_object(self.update_config.as_deref())
    }

    /// Ordered filter rules (case preserved; matching is case-insensitive).
    pub fn filter_rule_list(&self) -> Vec<String> {
        parse_json_strings(self.filter_rules.as_deref())
    }

    /// Ordered IP admission rules.
    pub fn allowed_ip_rules(&self) -> Vec<String> {
        parse_json_strings(self.allowed_ips.as_deref())
    }

    /// Allowed IP rules joined for display.
    pub fn formatted_allowed_ips(&self) -> String {
        self.allowed_ip_rules().join("; ")
    }

    /// Selected JSON columns, empty meaning "import everything".
    pub fn selected_columns(&self) -> Vec<SelectedColumn> {
        match self.json_selected_columns.as_deref() {
            Some(raw) if !raw.trim().is_empty() => {
                serde_json::from_str(raw).unwrap_or_default()
            }
            _ => Vec::new(),
        }
    }

    /// Whether any public artifact format is enabled.
    pub fn any_public_enabled(&self) -> bool {
        self.public_csv_enabled || self.public_json_enabled || self.public_txt_enabled
    }
}

fn parse_json_object(raw: Option<&str>) -> serde_json::Map<String, serde_json::Value> {
    match raw {
        Some(raw) if !raw.trim().is_empty() => {
            serde_json::from_str(raw).unwrap_or_default()
        }
        _ => serde_json::Map::new(),
    }
}

fn parse_json_strings(raw: Option<&str>) -> Vec<String> {
    let Some(raw) = raw else {
        return Vec::new();
    };
    let raw = raw.trim();
    if raw.is_empty() {
        return Vec::new();
    }
    if raw.starts_with('[') {
        if let Ok(values) = serde_json::from_str::<Vec<serde_json::Value>>(raw) {
            return values
                .into_iter()
                .map(|v| match v {
                    serde_json::Value::String(s) => s,
                    other => other.to_string(),
                })
                .collect();
        }
    }
    // Legacy format: semicolon-separated plain text
    raw.split(';')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(String::from)
        .collect()
}

/// An ordered, typed column of a list.
#[derive(Debug, Clone, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct ListColumn {
    pub list_id: i64,
    pub name: String,
    pub position: i64,
    pub column_type: ColumnType,
}

/// Desired column shape handed to `replace_data`; positions are assigned
/// from the slice order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ColumnDef {
    pub name: String,
    pub column_type: ColumnType,
}

impl ColumnDef {
    pub fn text(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            column_type: ColumnType::Text,
        }
    }
}

/// One materialized row: cell values aligned with the column positions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRow {
    pub row_id: i64,
    pub values: Vec<Option<String>>,
}

/// Fields accepted when creating a list. Everything else starts at its
/// schema default and is adjusted through `update_list`.
#[derive(Debug, Clone, Default)]
pub struct NewList {
    pub name: String,
    pub description: Option<String>,
    pub update_type: Option<UpdateType>,
    pub update_schedule: Option<String>,
    pub update_config: Option<String>,
    pub data_source_format: Option<SourceFormat>,
    pub max_results: Option<i64>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowed_ip_rules_accept_json_and_legacy_text() {
        let mut list = blank_list();
        list.allowed_ips = Some(r#"["10.0.0.1","192.168.0.0/24"]"#.to_string());
        assert_eq!(list.allowed_ip_rules(), vec!["10.0.0.1", "192.168.0.0/24"]);
        assert_eq!(list.formatted_allowed_ips(), "10.0.0.1; 192.168.0.0/24");

        list.allowed_ips = Some("10.0.0.1; 10.0.0.2".to_string());
        assert_eq!(list.allowed_ip_rules(), vec!["10.0.0.1", "10.0.0.2"]);
    }

    #[test]
    fn selected_columns_default_to_text_type() {
        let mut list = blank_list();
        list.json_selected_columns = Some(r#"[{"name":"n"},{"name":"age","type":"number"}]"#.into());
        let cols = list.selected_columns();
        assert_eq!(cols.len(), 2);
        assert_eq!(cols[0].column_type, ColumnType::Text);
        assert_eq!(cols[1].column_type, ColumnType::Number);
    }

    #[test]
    fn bad_json_reads_as_empty() {
        let mut list = blank_list();
        list.update_config = Some("{not json".to_string());
        assert!(list.update_config_map().is_empty());
        list.json_selected_columns = Some("{not json".to_string());
        assert!(list.selected_columns().is_empty());
    }

    fn blank_list() -> List {
        List {
            id: 1,
            name: "test".into(),
            description: None,
            update_type: UpdateType::Manual,
            update_schedule: None,
            update_config: None,
            data_source_format: SourceFormat::Csv,
            max_results: 0,
            last_update: None,
            filter_enabled: false,
            filter_rules: None,
            ip_restriction_enabled: false,
            allowed_ips: None,
            is_active: true,
            is_published: false,
            json_config_status: JsonConfigStatus::NotConfigured,
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
