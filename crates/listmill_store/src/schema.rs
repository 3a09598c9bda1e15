//! Schema DDL for the list store.

pub(crate) const CREATE_LISTS: &str = r#"
CREATE TABLE IF NOT EXISTS lists (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    description TEXT,
    update_type TEXT NOT NULL DEFAULT 'manual',
    update_schedule TEXT,
    update_config TEXT,
    data_source_format TEXT NOT NULL DEFAULT 'csv',
    max_results INTEGER NOT NULL DEFAULT 100,
    last_update TEXT,
    filter_enabled INTEGER NOT NULL DEFAULT 0,
    filter_rules TEXT,
    ip_restriction_enabled INTEGER NOT NULL DEFAULT 0,
    allowed_ips TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    is_published INTEGER NOT NULL DEFAULT 0,
    json_config_status TEXT NOT NULL DEFAULT 'not_configured',
    json_data_path TEXT,
    json_pagination_enabled INTEGER NOT NULL DEFAULT 0,
    json_next_page_path TEXT,
    json_max_pages INTEGER NOT NULL DEFAULT 10,
    json_selected_columns TEXT,
    auto_create_columns INTEGER NOT NULL DEFAULT 1,
    public_csv_enabled INTEGER NOT NULL DEFAULT 0,
    public_json_enabled INTEGER NOT NULL DEFAULT 0,
    public_txt_enabled INTEGER NOT NULL DEFAULT 0,
    public_txt_column TEXT,
    public_csv_include_headers INTEGER NOT NULL DEFAULT 1,
    public_txt_include_headers INTEGER NOT NULL DEFAULT 0,
    public_access_token TEXT UNIQUE,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
)
"#;

pub(crate) const CREATE_LIST_COLUMNS: &str = r#"
CREATE TABLE IF NOT EXISTS list_columns (
    list_id INTEGER NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    position INTEGER NOT NULL,
    column_type TEXT NOT NULL DEFAULT 'text',
    PRIMARY KEY (list_id, name),
    UNIQUE (list_id, position)
)
"#;

pub(crate) const CREATE_LIST_DATA: &str = r#"
CREATE TABLE IF NOT EXISTS list_data (
    list_id INTEGER NOT NULL REFERENCES lists(id) ON DELETE CASCADE,
    row_id INTEGER NOT NULL,
    column_position INTEGER NOT NULL,
    value TEXT,
    PRIMARY KEY (list_id, row_id, column_position)
)
"#;

pub(crate) const CREATE_DATA_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_list_data_order
    ON list_data (list_id, row_id, column_position)
"#;
