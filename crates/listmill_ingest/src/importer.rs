//! The importer: orchestrates adapter → decoder → schema resolver →
//! transactional replace, and reports a structured outcome.
//!
//! Failures never escape as panics or raw errors; every run folds into an
//! [`ImportOutcome`] carrying the status and the accumulated diagnostic log.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use chrono::Utc;
use serde_json::{Map, Value};
use tracing::info;

use crate::adapters::{fetch_url, run_command, run_script};
use crate::config::{NetPolicy, SourceSpec, UpdateConfig};
use crate::decode::{
    auto_descend_nested, decode_csv, navigate, next_page_link, normalize_records, parse_json,
    DecodedPayload,
};
use crate::error::{ImportError, Result};
use crate::internal::{fetch_internal_records, find_internal_token};
use crate::log::RunLog;
use crate::resolve::{project_record, resolve_schema, ResolveContext};
use listmill_store::{List, ListStore, SourceFormat};

/// Result of one import run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ImportStatus {
    Success { rows: u64 },
    /// The list was refreshed too recently; not an error.
    Skipped,
    Failed { kind: String, message: String },
}

#[derive(Debug)]
pub struct ImportOutcome {
    pub status: ImportStatus,
    pub log: Vec<String>,
}

impl ImportOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self.status, ImportStatus::Success { .. })
    }
}

/// Post-import hook: regenerate public artifacts after a successful run.
/// Hook failures are logged and never fail the import.
pub trait ArtifactHook: Send + Sync {
    fn regenerate<'a>(
        &'a self,
        list_id: i64,
    ) -> Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send + 'a>>;
}

pub struct Importer {
    store: Arc<ListStore>,
    policy: NetPolicy,
    artifact_hook: Option<Arc<dyn ArtifactHook>>,
    /// Per-list serialization: no two refreshes of the same list overlap,
    /// whatever mix of scheduled and manual callers is involved.
    locks: std::sync::Mutex<std::collections::HashMap<i64, Arc<tokio::sync::Mutex<()>>>>,
}

impl Importer {
    pub fn new(store: Arc<ListStore>, policy: NetPolicy) -> Self {
        Self {
            store,
            policy,
            artifact_hook: None,
            locks: std::sync::Mutex::new(std::collections::HashMap::new()),
        }
    }

    pub fn with_artifact_hook(mut self, hook: Arc<dyn ArtifactHook>) -> Self {
        self.artifact_hook = Some(hook);
        self
    }

    pub fn store(&self) -> &Arc<ListStore> {
        &self.store
    }

    /// Refresh a list from its configured source, replacing its dataset.
    ///
    /// `force_update` bypasses the minimum-interval suppression and is what
    /// manual refreshes use.
    pub async fn import(&self, list_id: i64, force_update: bool) -> ImportOutcome {
        let lock = self.lock_for(list_id);
        let _serialized = lock.lock().await;

        let mut log = RunLog::new();
        let status = match self.run(list_id, force_update, &mut log).await {
            Ok(Some(rows)) => {
                log.info(format!("Import finished: {rows} rows"));
                if let Some(hook) = &self.artifact_hook {
                    if let Err(e) = hook.regenerate(list_id).await {
                        log.warn(format!("Artifact regeneration failed: {e:#}"));
                    }
                }
                ImportStatus::Success { rows }
            }
            Ok(None) => {
                log.info("Update skipped: last refresh is too recent");
                ImportStatus::Skipped
            }
            Err(error) => {
                log.error(error.to_string());
                ImportStatus::Failed {
                    kind: error.kind().to_string(),
                    message: error.to_string(),
                }
            }
        };
        ImportOutcome {
            status,
            log: log.into_lines(),
        }
    }

    fn lock_for(&self, list_id: i64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.locks.lock().expect("lock map poisoned");
        Arc::clone(
            locks
                .entry(list_id)
                .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(()))),
        )
    }

    async fn run(&self, list_id: i64, force: bool, log: &mut RunLog) -> Result<Option<u64>> {
        let list = self
            .store
            .get_list(list_id)
            .await?
            .ok_or_else(|| ImportError::Configuration(format!("list {list_id} not found")))?;

        let config_map = list.update_config_map();
        if config_map.is_empty() {
            return Err(ImportError::Configuration(format!(
                "list {list_id} has no update configuration"
            )));
        }
        let config = UpdateConfig::parse(&config_map)?;
        log.info(format!(
            "List {}: starting import from {} source",
            list.id,
            config.source.kind()
        ));

        if !force && list.update_type == listmill_store::UpdateType::Automatic {
            if let Some(last) = list.last_update {
                let elapsed = (Utc::now() - last).num_seconds();
                if elapsed > 0 && elapsed < config.min_update_interval_secs {
                    info!(
                        "List {}: last update {}s ago, below the {}s interval",
                        list.id, elapsed, config.min_update_interval_secs
                    );
                    return Ok(None);
                }
            }
        }

        let json_path = effective_json_path(&list, &config);
        let format = self
            .effective_format(&list, &config, json_path.as_deref(), log)
            .await?;

        let payload = self
            .acquire_payload(&list, &config, format, json_path.as_deref(), log)
            .await?;
        log.info(format!(
            "Decoded {} records with fields {:?}",
            payload.records.len(),
            payload.fields
        ));

        let selected = list.selected_columns();
        let existing = self.store.columns(list.id).await?;
        let ctx = ResolveContext {
            format,
            auto_create_columns: list.auto_create_columns,
            selected_columns: &selected,
            csv: &config.csv,
        };
        let schema = resolve_schema(&existing, &payload, &ctx, log);

        let mut records = payload.records;
        if list.max_results > 0 && records.len() as i64 > list.max_results {
            log.info(format!(
                "Applying result limit: keeping {} of {} records",
                list.max_results,
                records.len()
            ));
            records.truncate(list.max_results as usize);
        }

        let rows: Vec<Vec<Option<String>>> = records
            .iter()
            .map(|record| project_record(record, &schema.columns))
            .collect();

        let count = self
            .store
            .replace_data(list.id, &schema.columns, &rows, Utc::now())
            .await?;
        Ok(Some(count))
    }

    /// Decide the payload format. A declared-CSV list carrying a JSON path
    /// is corrected to JSON and the fixed configuration is persisted.
    async fn effective_format(
        &self,
        list: &List,
        config: &UpdateConfig,
        json_path: Option<&str>,
        log: &mut RunLog,
    ) -> Result<SourceFormat> {
        let declared = config.format.unwrap_or(list.data_source_format);
        if declared == SourceFormat::Csv && json_path.is_some() {
            log.warn("Declared CSV but a JSON path is configured; forcing JSON");
            let mut corrected = list.update_config_map();
            corrected.insert("format".to_string(), Value::String("json".to_string()));
            corrected.insert("is_json".to_string(), Value::Bool(true));
            let raw = serde_json::to_string(&corrected)
                .map_err(|e| ImportError::Configuration(e.to_string()))?;
            self.store
                .persist_update_config(list.id, &raw, SourceFormat::Json)
                .await?;
            return Ok(SourceFormat::Json);
        }
        Ok(declared)
    }

    async fn acquire_payload(
        &self,
        list: &List,
        config: &UpdateConfig,
        format: SourceFormat,
        json_path: Option<&str>,
        log: &mut RunLog,
    ) -> Result<DecodedPayload> {
        match &config.source {
            SourceSpec::Url { url, headers } => {
                if let Some(token) = find_internal_token(url, &self.policy) {
                    let value = fetch_internal_records(&self.store, &token, log).await?;
                    return self.decode_json_value(list, value, json_path, log);
                }
                match format {
                    SourceFormat::Json => {
                        self.paginate_json(list, config, PageSource::Url { url, headers }, json_path, log)
                            .await
                    }
                    SourceFormat::Csv => {
                        let fetched =
                            fetch_url(&self.policy, url, headers, config.url_timeout(), log)
                                .await?;
                        decode_csv(&fetched.body, &config.csv, log)
                    }
                }
            }
            SourceSpec::Shell { command } => {
                if let Some(token) = find_internal_token(command, &self.policy) {
                    let value = fetch_internal_records(&self.store, &token, log).await?;
                    return self.decode_json_value(list, value, json_path, log);
                }
                match format {
                    SourceFormat::Json => {
                        self.paginate_json(list, config, PageSource::Shell { command }, json_path, log)
                            .await
                    }
                    SourceFormat::Csv => {
                        let output =
                            run_command(command, config.shell_timeout(), log).await?;
                        decode_csv(&output, &config.csv, log)
                    }
                }
            }
            SourceSpec::Script { code, .. } => {
                let value =
                    run_script(&self.policy, code, config.script_timeout(), log).await?;
                self.decode_json_value(list, value, json_path, log)
            }
        }
    }

    /// Fetch and decode JSON pages, following next-page links when
    /// pagination is enabled. The first page must succeed; later page
    /// failures end pagination with what was gathered.
    async fn paginate_json(
        &self,
        list: &List,
        config: &UpdateConfig,
        source: PageSource<'_>,
        json_path: Option<&str>,
        log: &mut RunLog,
    ) -> Result<DecodedPayload> {
        let next_path = list
            .json_next_page_path
            .as_deref()
            .filter(|p| !p.trim().is_empty());
        let paginated = list.json_pagination_enabled && next_path.is_some();
        let max_pages = if list.json_max_pages > 0 {
            list.json_max_pages as usize
        } else {
            1
        };

        let mut value = self.fetch_page(&source, None, config, log).await?;
        let mut records = self.page_records(list, &value, json_path, log)?;
        let mut pages = 1;

        while paginated && pages < max_pages {
            let Some(next_url) = next_path.and_then(|p| next_page_link(&value, p)) else {
                break;
            };
            log.info(format!("Following next page link: {next_url}"));
            value = match self.fetch_page(&source, Some(&next_url), config, log).await {
                Ok(value) => value,
                Err(error) => {
                    log.warn(format!("Pagination stopped after an error: {error}"));
                    break;
                }
            };
            match self.page_records(list, &value, json_path, log) {
                Ok(chunk) => records.extend(chunk),
                Err(error) => {
                    log.warn(format!("Pagination stopped after an error: {error}"));
                    break;
                }
            }
            pages += 1;
        }

        if pages > 1 {
            log.info(format!("Fetched {pages} pages, {} records", records.len()));
        }
        Ok(DecodedPayload::from_records(records))
    }

    async fn fetch_page(
        &self,
        source: &PageSource<'_>,
        override_url: Option<&str>,
        config: &UpdateConfig,
        log: &mut RunLog,
    ) -> Result<Value> {
        match source {
            PageSource::Url { url, headers } => {
                let target = override_url.unwrap_or(url);
                let fetched =
                    fetch_url(&self.policy, target, headers, config.url_timeout(), log).await?;
                parse_json(&fetched.body)
            }
            PageSource::Shell { command } => {
                let command = match override_url {
                    Some(next) => substitute_command_url(command, next).ok_or_else(|| {
                        ImportError::Configuration(
                            "cannot rewrite the command for pagination: no URL found".into(),
                        )
                    })?,
                    None => (*command).to_string(),
                };
                let output = run_command(&command, config.shell_timeout(), log).await?;
                parse_json(&output).or_else(|first_error| {
                    // Shell tools sometimes wrap JSON in banners; retry the
                    // first JSON-looking block before giving up.
                    match extract_json_block(&output) {
                        Some(block) => {
                            log.warn("Output was not clean JSON; using the embedded JSON block");
                            parse_json(block)
                        }
                        None => Err(first_error),
                    }
                })
            }
        }
    }

    fn page_records(
        &self,
        list: &List,
        value: &Value,
        json_path: Option<&str>,
        log: &mut RunLog,
    ) -> Result<Vec<Map<String, Value>>> {
        let navigated = match json_path {
            Some(path) => navigate(value, path)?,
            None => value,
        };
        let mut records = normalize_records(navigated);
        if json_path.is_none() && list.auto_create_columns {
            if let Some(nested) = auto_descend_nested(&records) {
                log.info("Descending into the nested record array");
                records = nested;
            }
        }
        Ok(records)
    }

    fn decode_json_value(
        &self,
        list: &List,
        value: Value,
        json_path: Option<&str>,
        log: &mut RunLog,
    ) -> Result<DecodedPayload> {
        let records = self.page_records(list, &value, json_path, log)?;
        Ok(DecodedPayload::from_records(records))
    }
}

enum PageSource<'a> {
    Url {
        url: &'a str,
        headers: &'a [(String, String)],
    },
    Shell {
        command: &'a str,
    },
}

fn effective_json_path(list: &List, config: &UpdateConfig) -> Option<String> {
    list.json_data_path
        .as_deref()
        .filter(|p| !p.trim().is_empty())
        .map(String::from)
        .or_else(|| config.json_data_path.clone())
}

/// Replace the first `http(s)://...` literal in a shell command with the
/// next page URL.
fn substitute_command_url(command: &str, next_url: &str) -> Option<String> {
    let start = command.find("http://").or_else(|| command.find("https://"))?;
    let rest = &command[start..];
    let end = rest
        .find(|c: char| c.is_whitespace() || c == '\'' || c == '"')
        .unwrap_or(rest.len());
    let mut replaced = String::with_capacity(command.len());
    replaced.push_str(&command[..start]);
    replaced.push_str(next_url);
    replaced.push_str(&command[start + end..]);
    Some(replaced)
}

/// First `{...}` or `[...]` block of a noisy payload.
fn extract_json_block(text: &str) -> Option<&str> {
    let start = text.find(['{', '['])?;
    let open = text.as_bytes()[start];
    let close = if open == b'{' { '}' } else { ']' };
    let end = text.rfind(close)?;
    if end <= start {
        return None;
    }
    Some(&text[start..=end])
}
