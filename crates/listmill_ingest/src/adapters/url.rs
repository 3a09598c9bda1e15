//! URL adapter: HTTP GET with the configured proxy and TLS policy.

use std::time::Duration;

use crate::config::NetPolicy;
use crate::error::{ImportError, Result};
use crate::log::RunLog;

/// Raw response body plus the declared content type.
#[derive(Debug)]
pub struct FetchedPayload {
    pub body: String,
    pub content_type: Option<String>,
}

pub async fn fetch_url(
    policy: &NetPolicy,
    url: &str,
    headers: &[(String, String)],
    timeout: Duration,
    log: &mut RunLog,
) -> Result<FetchedPayload> {
    let client = policy.build_client(timeout)?;
    if policy.has_proxy() {
        log.info(format!(
            "Using proxy (http: {}, https: {})",
            policy.http_proxy.as_deref().unwrap_or("-"),
            policy.https_proxy.as_deref().unwrap_or("-"),
        ));
    }
    if !policy.verify_ssl {
        log.info("TLS certificate verification disabled");
    }

    let mut request = client.get(url);
    for (name, value) in headers {
        request = request.header(name.as_str(), value.as_str());
    }

    log.info(format!("GET {url}"));
    let response = request
        .send()
        .await
        .map_err(|e| classify_request_error(policy, url, timeout, e))?;

    let status = response.status();
    let content_type = response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .map(String::from);
    log.info(format!(
        "Response: {} (content-type: {})",
        status,
        content_type.as_deref().unwrap_or("not specified")
    ));

    if !status.is_success() {
        return Err(ImportError::HttpStatus {
            status: status.as_u16(),
            url: url.to_string(),
        });
    }

    let body = response.text().await.map_err(|e| ImportError::Transport {
        url: url.to_string(),
        message: format!("reading body failed: {e}"),
    })?;

    Ok(FetchedPayload { body, content_type })
}

fn classify_request_error(
    policy: &NetPolicy,
    url: &str,
    timeout: Duration,
    error: reqwest::Error,
) -> ImportError {
    if error.is_timeout() {
        return ImportError::Timeout {
            url: url.to_string(),
            seconds: timeout.as_secs(),
        };
    }
    let chain = error_chain(&error);
    let lowered = chain.to_lowercase();
    if lowered.contains("certificate") || lowered.contains("tls") || lowered.contains("ssl") {
        return ImportError::Tls {
            url: url.to_string(),
            message: chain,
        };
    }
    if policy.has_proxy() && error.is_connect() {
        return ImportError::Proxy {
            url: url.to_string(),
            message: chain,
        };
    }
    ImportError::Transport {
        url: url.to_string(),
        message: chain,
    }
}

fn error_chain(error: &dyn std::error::Error) -> String {
    let mut message = error.to_string();
    let mut source = error.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
