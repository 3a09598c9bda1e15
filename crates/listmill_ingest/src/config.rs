//! Typed update configuration.
//!
//! Lists persist their refresh settings as a JSON object. Historically this
//! was a free-form map; here it is parsed once into a discriminated
//! [`UpdateConfig`] keyed on `source`, and every missing or malformed field
//! is reported before any I/O starts.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use serde_json::{Map, Value};

use crate::error::{ImportError, Result};
use listmill_store::{ColumnType, SourceFormat};

/// Default per-request timeout for the URL adapter.
pub const DEFAULT_URL_TIMEOUT_SECS: u64 = 30;
/// Default per-run timeout for the shell adapter.
pub const DEFAULT_SHELL_TIMEOUT_SECS: u64 = 60;
/// Default wall-clock budget for the script adapter (the scheduler's
/// misfire grace window).
pub const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 3600;
/// Default suppression window for scheduled re-fetches.
pub const DEFAULT_MIN_UPDATE_INTERVAL_SECS: i64 = 300;

/// CSV decoding options from `csv_config`.
#[derive(Debug, Clone)]
pub struct CsvOptions {
    /// Explicitly configured separator. When set it is honored strictly;
    /// when absent the decoder sniffs.
    pub separator: Option<char>,
    pub has_header: bool,
    pub column_names: Vec<String>,
    /// Zero-based header indices to retain; empty keeps everything.
    pub columns_to_import: Vec<usize>,
    /// Declared types by header index.
    pub column_types: HashMap<usize, ColumnType>,
    pub remove_unused_columns: bool,
}

impl Default for CsvOptions {
    fn default() -> Self {
        Self {
            separator: None,
            has_header: true,
            column_names: Vec::new(),
            columns_to_import: Vec::new(),
            column_types: HashMap::new(),
            remove_unused_columns: true,
        }
    }
}

/// The configured payload source.
#[derive(Debug, Clone)]
pub enum SourceSpec {
    Url {
        url: String,
        headers: Vec<(String, String)>,
    },
    Shell {
        command: String,
    },
    Script {
        code: String,
        language: Option<String>,
    },
}

impl SourceSpec {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Url { .. } => "url",
            Self::Shell { .. } => "shell",
            Self::Script { .. } => "script",
        }
    }
}

/// Parsed, validated update configuration.
#[derive(Debug, Clone)]
pub struct UpdateConfig {
    pub source: SourceSpec,
    /// Format declared in the configuration, if any.
    pub format: Option<SourceFormat>,
    pub timeout_secs: Option<u64>,
    pub min_update_interval_secs: i64,
    pub csv: CsvOptions,
    /// Dotted path from the configuration map. The list-level field takes
    /// precedence when both are set.
    pub json_data_path: Option<String>,
}

impl UpdateConfig {
    /// Parse the stored configuration map.
    pub fn parse(map: &Map<String, Value>) -> Result<Self> {
        let source = parse_source(map)?;
        let format = parse_format(map);
        let timeout_secs = map.get("timeout").and_then(as_u64);
        let min_update_interval_secs = map
            .get("min_update_interval")
            .and_then(as_u64)
            .map(|v| v as i64)
            .unwrap_or(DEFAULT_MIN_UPDATE_INTERVAL_SECS);
        let csv = parse_csv_options(map)?;
        let json_data_path = map
            .get("json_data_path")
            .and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(String::from);

        Ok(Self {
            source,
            format,
            timeout_secs,
            min_update_interval_secs,
            csv,
            json_data_path,
        })
    }

    pub fn url_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_URL_TIMEOUT_SECS))
    }

    pub fn shell_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_SHELL_TIMEOUT_SECS))
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.unwrap_or(DEFAULT_SCRIPT_TIMEOUT_SECS))
    }
}

fn parse_source(map: &Map<String, Value>) -> Result<SourceSpec> {
    let source = map
        .get("source")
        .and_then(Value::as_str)
        .ok_or_else(|| ImportError::Configuration("missing 'source'".into()))?;

    // `api` is a historical alias discriminated by `api_type`.
    let effective = if source == "api" {
        map.get("api_type")
            .and_then(Value::as_str)
            .ok_or_else(|| {
                ImportError::Configuration("source 'api' requires 'api_type'".into())
            })?
    } else {
        source
    };

    match effective {
        "url" => {
            let url = map
                .get("url")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    ImportError::Configuration("no URL configured for the 'url' source".into())
                })?;
            let headers = map
                .get("headers")
                .and_then(Value::as_object)
                .map(|obj| {
                    obj.iter()
                        .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                        .collect()
                })
                .unwrap_or_default();
            Ok(SourceSpec::Url {
                url: url.to_string(),
                headers,
            })
        }
        "curl" => {
            let command = map
                .get("curl_command")
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    ImportError::Configuration("no command configured for the 'curl' source".into())
                })?;
            Ok(SourceSpec::Shell {
                command: command.to_string(),
            })
        }
        "script" => {
            // 'code' preferred, 'script_content' accepted.
            let code = map
                .get("code")
                .or_else(|| map.get("script_content"))
                .and_then(Value::as_str)
                .filter(|s| !s.trim().is_empty())
                .ok_or_else(|| {
                    ImportError::Configuration(
                        "no script body configured for the 'script' source".into(),
                    )
                })?;
            let language = map
                .get("language")
                .and_then(Value::as_str)
                .map(String::from);
            Ok(SourceSpec::Script {
                code: code.to_string(),
                language,
            })
        }
        other => Err(ImportError::Configuration(format!(
            "unsupported source '{other}'"
        ))),
    }
}

fn parse_format(map: &Map<String, Value>) -> Option<SourceFormat> {
    if let Some(format) = map.get("format").and_then(Value::as_str) {
        match format.to_ascii_lowercase().as_str() {
            "csv" => return Some(SourceFormat::Csv),
            "json" => return Some(SourceFormat::Json),
            _ => {}
        }
    }
    match map.get("is_json") {
        Some(Value::Bool(true)) => Some(SourceFormat::Json),
        Some(Value::Bool(false)) => Some(SourceFormat::Csv),
        _ => None,
    }
}

fn parse_csv_options(map: &Map<String, Value>) -> Result<CsvOptions> {
    let mut opts = CsvOptions::default();
    let Some(csv_config) = map.get("csv_config").and_then(Value::as_object) else {
        return Ok(opts);
    };

    if let Some(separator) = csv_config
        .get("separator")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
    {
        let mut chars = separator.chars();
        let first = chars.next();
        if chars.next().is_some() || !first.is_some_and(|c| c.is_ascii()) {
            return Err(ImportError::Configuration(format!(
                "csv separator must be a single ASCII character, got {separator:?}"
            )));
        }
        opts.separator = first;
    }

    if let Some(has_header) = csv_config
        .get("has_header")
        .or_else(|| csv_config.get("has_headers"))
        .and_then(Value::as_bool)
    {
        opts.has_header = has_header;
    }

    if let Some(names) = csv_config.get("column_names").and_then(Value::as_array) {
        opts.column_names = names
            .iter()
            .filter_map(Value::as_str)
            .map(String::from)
            .collect();
    }

    if let Some(indices) = csv_config
        .get("columns_to_import")
        .and_then(Value::as_array)
    {
        for idx in indices {
            let parsed = match idx {
                Value::Number(n) => n.as_u64().map(|n| n as usize),
                Value::String(s) => s.trim().parse::<usize>().ok(),
                _ => None,
            };
            match parsed {
                Some(i) => opts.columns_to_import.push(i),
                None => {
                    return Err(ImportError::Configuration(format!(
                        "invalid column index in columns_to_import: {idx}"
                    )))
                }
            }
        }
    }

    if let Some(types) = csv_config.get("column_types").and_then(Value::as_object) {
        for (key, value) in types {
            let Ok(index) = key.trim().parse::<usize>() else {
                continue;
            };
            if let Some(ty) = value.as_str().and_then(parse_column_type) {
                opts.column_types.insert(index, ty);
            }
        }
    }

    if let Some(remove) = csv_config
        .get("remove_unused_columns")
        .and_then(Value::as_bool)
    {
        opts.remove_unused_columns = remove;
    }

    Ok(opts)
}

fn parse_column_type(raw: &str) -> Option<ColumnType> {
    match raw.to_ascii_lowercase().as_str() {
        "text" => Some(ColumnType::Text),
        "number" => Some(ColumnType::Number),
        "date" => Some(ColumnType::Date),
        "ip" => Some(ColumnType::Ip),
        "boolean" | "bool" => Some(ColumnType::Boolean),
        _ => None,
    }
}

fn as_u64(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// ============================================================================
// Network policy
// ============================================================================

/// Outbound HTTP policy shared by the URL adapter and the script sandbox:
/// proxies and TLS behavior from the environment.
#[derive(Debug, Clone, Default)]
pub struct NetPolicy {
    pub http_proxy: Option<String>,
    pub https_proxy: Option<String>,
    pub no_proxy: Option<String>,
    pub verify_ssl: bool,
    pub ca_bundle: Option<PathBuf>,
    /// Hostname this service is reachable at; used to detect self-calls.
    pub server_name: Option<String>,
}

impl NetPolicy {
    /// Read proxy/TLS knobs from the environment (uppercase first, then
    /// lowercase variants).
    pub fn from_env() -> Self {
        let env = |upper: &str, lower: &str| {
            std::env::var(upper)
                .ok()
                .filter(|v| !v.is_empty())
                .or_else(|| std::env::var(lower).ok().filter(|v| !v.is_empty()))
        };
        let verify_ssl = std::env::var("VERIFY_SSL")
            .map(|v| v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        let ca_bundle = env("REQUESTS_CA_BUNDLE", "SSL_CERT_FILE").map(PathBuf::from);
        Self {
            http_proxy: env("HTTP_PROXY", "http_proxy"),
            https_proxy: env("HTTPS_PROXY", "https_proxy"),
            no_proxy: env("NO_PROXY", "no_proxy"),
            verify_ssl,
            ca_bundle,
            server_name: std::env::var("SERVER_NAME").ok().filter(|v| !v.is_empty()),
        }
    }

    pub fn has_proxy(&self) -> bool {
        self.http_proxy.is_some() || self.https_proxy.is_some()
    }

    /// Build an async client honoring this policy.
    pub fn build_client(&self, timeout: Duration) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder().timeout(timeout);
        builder = self.apply_tls(builder)?;
        builder = self.apply_proxies(builder, |b, p| b.proxy(p))?;
        builder
            .build()
            .map_err(|e| ImportError::Configuration(format!("HTTP client setup failed: {e}")))
    }

    /// Build a blocking client for the script sandbox's `http_get`.
    pub fn build_blocking_client(&self, timeout: Duration) -> Result<reqwest::blocking::Client> {
        let mut builder = reqwest::blocking::Client::builder().timeout(timeout);
        if !self.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(path) = &self.ca_bundle {
            let pem = std::fs::read(path).map_err(|e| {
                ImportError::Configuration(format!(
                    "cannot read CA bundle {}: {e}",
                    path.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ImportError::Configuration(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        for proxy in self.proxies()? {
            builder = builder.proxy(proxy);
        }
        builder
            .build()
            .map_err(|e| ImportError::Configuration(format!("HTTP client setup failed: {e}")))
    }

    fn apply_tls(&self, mut builder: reqwest::ClientBuilder) -> Result<reqwest::ClientBuilder> {
        if !self.verify_ssl {
            builder = builder.danger_accept_invalid_certs(true);
        }
        if let Some(path) = &self.ca_bundle {
            let pem = std::fs::read(path).map_err(|e| {
                ImportError::Configuration(format!(
                    "cannot read CA bundle {}: {e}",
                    path.display()
                ))
            })?;
            let cert = reqwest::Certificate::from_pem(&pem)
                .map_err(|e| ImportError::Configuration(format!("invalid CA bundle: {e}")))?;
            builder = builder.add_root_certificate(cert);
        }
        Ok(builder)
    }

    fn apply_proxies<B>(
        &self,
        mut builder: B,
        mut add: impl FnMut(B, reqwest::Proxy) -> B,
    ) -> Result<B> {
        for proxy in self.proxies()? {
            builder = add(builder, proxy);
        }
        Ok(builder)
    }

    fn proxies(&self) -> Result<Vec<reqwest::Proxy>> {
        let no_proxy = self
            .no_proxy
            .as_deref()
            .and_then(reqwest::NoProxy::from_string);
        let mut proxies = Vec::new();
        if let Some(url) = &self.http_proxy {
            let proxy = reqwest::Proxy::http(url)
                .map_err(|e| ImportError::Configuration(format!("invalid HTTP proxy: {e}")))?;
            proxies.push(proxy.no_proxy(no_proxy.clone()));
        }
        if let Some(url) = &self.https_proxy {
            let proxy = reqwest::Proxy::https(url)
                .map_err(|e| ImportError::Configuration(format!("invalid HTTPS proxy: {e}")))?;
            proxies.push(proxy.no_proxy(no_proxy));
        }
        Ok(proxies)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(raw: &str) -> Map<String, Value> {
        serde_json::from_str(raw).unwrap()
    }

    #[test]
    fn url_source_requires_url() {
        let err = UpdateConfig::parse(&map(r#"{"source":"url"}"#)).unwrap_err();
        assert_eq!(err.kind(), "configuration");

        let cfg =
            UpdateConfig::parse(&map(r#"{"source":"url","url":"https://example.com/x.csv"}"#))
                .unwrap();
        assert!(matches!(cfg.source, SourceSpec::Url { .. }));
        assert_eq!(cfg.min_update_interval_secs, 300);
    }

    #[test]
    fn api_aliases_resolve_by_api_type() {
        let cfg = UpdateConfig::parse(&map(
            r#"{"source":"api","api_type":"curl","curl_command":"curl -s https://h/x"}"#,
        ))
        .unwrap();
        assert!(matches!(cfg.source, SourceSpec::Shell { .. }));

        let cfg = UpdateConfig::parse(&map(
            r#"{"source":"api","api_type":"script","script_content":"function main() return {} end"}"#,
        ))
        .unwrap();
        assert!(matches!(cfg.source, SourceSpec::Script { .. }));
    }

    #[test]
    fn is_json_is_a_format_alias() {
        let cfg = UpdateConfig::parse(&map(
            r#"{"source":"url","url":"https://h/x","is_json":true}"#,
        ))
        .unwrap();
        assert_eq!(cfg.format, Some(SourceFormat::Json));

        let cfg = UpdateConfig::parse(&map(
            r#"{"source":"url","url":"https://h/x","format":"csv"}"#,
        ))
        .unwrap();
        assert_eq!(cfg.format, Some(SourceFormat::Csv));
    }

    #[test]
    fn multi_character_separator_is_rejected() {
        let err = UpdateConfig::parse(&map(
            r#"{"source":"url","url":"https://h/x","csv_config":{"separator":"||"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err.kind(), "configuration");
    }

    #[test]
    fn csv_options_parse_indices_and_types() {
        let cfg = UpdateConfig::parse(&map(
            r#"{"source":"url","url":"https://h/x","csv_config":{
                "separator":";","has_header":false,
                "column_names":["ip","host"],
                "columns_to_import":[0,"2"],
                "column_types":{"0":"ip","2":"number"},
                "remove_unused_columns":false}}"#,
        ))
        .unwrap();
        assert_eq!(cfg.csv.separator, Some(';'));
        assert!(!cfg.csv.has_header);
        assert_eq!(cfg.csv.columns_to_import, vec![0, 2]);
        assert_eq!(cfg.csv.column_types.get(&0), Some(&ColumnType::Ip));
        assert!(!cfg.csv.remove_unused_columns);
    }
}
