//! Internal-loop shortcut: when a source URL (or a URL embedded in a shell
//! command) targets this service's own public JSON endpoint, read the list
//! through storage instead of going over the network.

use serde_json::{Map, Value};

use crate::config::NetPolicy;
use crate::error::{ImportError, Result};
use crate::log::RunLog;
use listmill_store::ListStore;

const PUBLIC_JSON_MARKER: &str = "/public/json/";

/// Hostnames that always count as this service besides `SERVER_NAME`.
const LOCAL_NETLOCS: [&str; 3] = ["localhost:5000", "web:5000", "nginx"];
const LOCAL_HOSTS: [&str; 2] = ["localhost", "127.0.0.1"];

/// Scan `text` (a URL or a whole shell command) for a public-JSON URL on an
/// internal host and extract its access token.
pub fn find_internal_token(text: &str, policy: &NetPolicy) -> Option<String> {
    let mut search_from = 0;
    while let Some(offset) = text[search_from..].find("http") {
        let start = search_from + offset;
        let rest = &text[start..];
        let Some(after_scheme) = rest
            .strip_prefix("https://")
            .or_else(|| rest.strip_prefix("http://"))
        else {
            search_from = start + 4;
            continue;
        };
        let end = after_scheme
            .find(|c: char| c.is_whitespace() || c == '\'' || c == '"')
            .unwrap_or(after_scheme.len());
        let url = &after_scheme[..end];

        if let Some(token) = internal_token_of(url, policy) {
            return Some(token);
        }
        search_from = start + 4;
    }
    None
}

/// `url` here is scheme-stripped: `host[:port]/path...`.
fn internal_token_of(url: &str, policy: &NetPolicy) -> Option<String> {
    let (netloc, path) = match url.find('/') {
        Some(slash) => (&url[..slash], &url[slash..]),
        None => (url, ""),
    };
    if !is_internal_netloc(netloc, policy) {
        return None;
    }
    let token_start = path.find(PUBLIC_JSON_MARKER)? + PUBLIC_JSON_MARKER.len();
    let token = &path[token_start..];
    let token = token
        .split(|c: char| c == '?' || c == '/' || c.is_whitespace())
        .next()
        .unwrap_or("")
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

fn is_internal_netloc(netloc: &str, policy: &NetPolicy) -> bool {
    let netloc = netloc.to_ascii_lowercase();
    if let Some(server_name) = &policy.server_name {
        if netloc == server_name.to_ascii_lowercase() {
            return true;
        }
    }
    if LOCAL_NETLOCS.contains(&netloc.as_str()) {
        return true;
    }
    let host = netloc.split(':').next().unwrap_or(&netloc);
    LOCAL_HOSTS.contains(&host)
}

/// Materialize the target list's rows through the standard public-JSON
/// projection (business columns only), as if fetched from the endpoint.
pub async fn fetch_internal_records(
    store: &ListStore,
    token: &str,
    log: &mut RunLog,
) -> Result<Value> {
    let list = store
        .get_list_by_token(token)
        .await?
        .ok_or_else(|| {
            ImportError::Configuration(format!("no list found with public token {token}"))
        })?;
    log.info(format!(
        "Internal URL detected; reading list {} ({}) directly from storage",
        list.id, list.name
    ));

    let (columns, rows) = store.read_rows(list.id).await?;
    let records: Vec<Value> = rows
        .into_iter()
        .map(|row| {
            let mut object = Map::new();
            for (column, value) in columns.iter().zip(row.values) {
                object.insert(
                    column.name.clone(),
                    value.map(Value::String).unwrap_or(Value::Null),
                );
            }
            Value::Object(object)
        })
        .collect();
    Ok(Value::Array(records))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> NetPolicy {
        NetPolicy {
            server_name: Some("lists.example.com".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn extracts_token_from_internal_url() {
        let token = find_internal_token(
            "http://lists.example.com/public/json/abc123",
            &policy(),
        );
        assert_eq!(token.as_deref(), Some("abc123"));

        let token = find_internal_token(
            "https://LISTS.EXAMPLE.COM/public/json/tok?x=1",
            &policy(),
        );
        assert_eq!(token.as_deref(), Some("tok"));
    }

    #[test]
    fn extracts_token_embedded_in_shell_command() {
        let token = find_internal_token(
            "curl -s 'http://localhost:5000/public/json/tok-1' | head",
            &policy(),
        );
        assert_eq!(token.as_deref(), Some("tok-1"));
    }

    #[test]
    fn external_hosts_are_not_internal() {
        assert!(find_internal_token("https://other.example.com/public/json/t", &policy()).is_none());
        assert!(find_internal_token("https://lists.example.com/public/csv/t", &policy()).is_none());
        assert!(find_internal_token("no url here", &policy()).is_none());
    }

    #[test]
    fn localhost_is_always_internal() {
        let bare = NetPolicy::default();
        assert_eq!(
            find_internal_token("http://127.0.0.1:8080/public/json/t", &bare).as_deref(),
            Some("t")
        );
    }
}
