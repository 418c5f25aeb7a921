//! `webfetch`: read a web page as markdown, plain text or raw HTML.

use std::net::IpAddr;
use std::time::Duration;

use agent_core::{
    AgentError,
    error::ToolError,
    tool::{ParameterSchema, Tool, ToolContext, ToolOutput, ToolSchema},
};
use async_trait::async_trait;
use reqwest::{Client, Url, redirect};
use serde_json::{Value, json};

use super::html;

const FETCH_TIMEOUT_SECS: u64 = 30;
const MAX_REDIRECTS: usize = 10;
const MAX_PAGE_BYTES: usize = 5 * 1024 * 1024;
pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (compatible; agent-server/0.1)";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Format {
    Markdown,
    Text,
    Html,
}

impl Format {
    fn parse(value: Option<&str>) -> Result<Self, ToolError> {
        match value.unwrap_or("markdown") {
            "markdown" => Ok(Self::Markdown),
            "text" => Ok(Self::Text),
            "html" => Ok(Self::Html),
            other => Err(ToolError::InvalidArguments(format!(
                "format must be text, markdown or html, got '{other}'"
            ))),
        }
    }

    const fn as_str(self) -> &'static str {
        match self {
            Self::Markdown => "markdown",
            Self::Text => "text",
            Self::Html => "html",
        }
    }
}

/// Loopback, private, link-local and unspecified addresses
fn is_private_host(host: &str) -> bool {
    let host = host.trim_start_matches('[').trim_end_matches(']');
    if host.eq_ignore_ascii_case("localhost") || host.ends_with(".localhost") || host.ends_with(".local") {
        return true;
    }
    match host.parse::<IpAddr>() {
        Ok(IpAddr::V4(ip)) => {
            ip.is_private() || ip.is_loopback() || ip.is_link_local() || ip.is_unspecified()
        }
        Ok(IpAddr::V6(ip)) => {
            let first = ip.segments()[0];
            // unique local fc00::/7 and link-local fe80::/10
            ip.is_loopback() || ip.is_unspecified() || first & 0xfe00 == 0xfc00 || first & 0xffc0 == 0xfe80
        }
        Err(_) => false,
    }
}

/// Parse a model-supplied URL, defaulting to https. Only public http(s) hosts pass.
fn normalize_url(raw: &str) -> Result<Url, ToolError> {
    let raw = raw.trim();
    let candidate = if raw.starts_with("http://") || raw.starts_with("https://") {
        raw.to_string()
    } else {
        format!("https://{raw}")
    };
    let url = Url::parse(&candidate)
        .map_err(|e| ToolError::InvalidArguments(format!("invalid URL '{raw}': {e}")))?;

    match url.host_str() {
        None => Err(ToolError::InvalidArguments(format!("URL '{raw}' has no host"))),
        Some(host) if is_private_host(host) => Err(ToolError::Execution(format!(
            "Access denied: '{host}' is a private address"
        ))),
        Some(_) => Ok(url),
    }
}

/// Fetch a page and render it for the model
pub struct WebFetchTool {
    client: Client,
}

impl WebFetchTool {
    pub fn new() -> Result<Self, AgentError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .redirect(redirect::Policy::limited(MAX_REDIRECTS))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| AgentError::Config(format!("webfetch client setup failed: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Tool for WebFetchTool {
    fn schema(&self) -> ToolSchema {
        ToolSchema {
            name: "webfetch".into(),
            description: "Fetch content from a URL and convert it to readable text or markdown. \
                          Use this when you need to read the content of a specific web page."
                .into(),
            parameters: vec![
                ParameterSchema::new("url", "string", "The URL to fetch").required(),
                ParameterSchema::new("format", "string", "Output format (default: markdown)")
                    .with_enum(&["text", "markdown", "html"]),
            ],
        }
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> Result<ToolOutput, ToolError> {
        let format = Format::parse(args.get("format").and_then(Value::as_str))?;
        let url = normalize_url(args["url"].as_str().unwrap_or_default())?;
        tracing::info!(url = %url, format = format.as_str(), "Fetching page");

        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ToolError::Execution(format!("Request error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ToolError::Execution(format!(
                "HTTP Error {}: {}",
                status.as_u16(),
                status.canonical_reason().unwrap_or("Unknown")
            )));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| ToolError::Execution(format!("Failed to read body: {e}")))?;
        if body.len() > MAX_PAGE_BYTES {
            return Err(ToolError::Execution(format!(
                "Page too large: {} bytes (max {MAX_PAGE_BYTES})",
                body.len()
            )));
        }
        let page = String::from_utf8_lossy(&body);

        let content = match format {
            Format::Html => page.into_owned(),
            Format::Text => html::render(&page, false),
            Format::Markdown => html::render(&page, true),
        };
        let length = content.chars().count();

        Ok(ToolOutput::new(format!("Fetched: {url}"), content).with_metadata(json!({
            "url": url.as_str(),
            "format": format.as_str(),
            "length": length,
        })))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scheme_is_added() {
        let url = normalize_url("example.com/docs").unwrap();
        assert_eq!(url.as_str(), "https://example.com/docs");
        let url = normalize_url(" http://example.com ").unwrap();
        assert_eq!(url.scheme(), "http");
    }

    #[test]
    fn test_private_hosts_are_refused() {
        for raw in [
            "http://localhost:8080",
            "127.0.0.1/admin",
            "http://10.1.2.3",
            "https://192.168.0.1",
            "http://[::1]/",
            "http://169.254.169.254/latest/meta-data",
        ] {
            assert!(
                matches!(normalize_url(raw), Err(ToolError::Execution(_))),
                "{raw} should be refused"
            );
        }
        assert!(!is_private_host("8.8.8.8"));
        assert!(!is_private_host("docs.rs"));
    }

    #[test]
    fn test_format_argument() {
        assert_eq!(Format::parse(None).unwrap(), Format::Markdown);
        assert_eq!(Format::parse(Some("html")).unwrap(), Format::Html);
        assert!(matches!(Format::parse(Some("pdf")), Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn test_bad_arguments_fail_before_any_request() {
        let tool = WebFetchTool::new().unwrap();
        let ctx = ToolContext::default();
        let err = tool
            .execute(json!({ "url": "http://localhost/secret" }), &ctx)
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Access denied: 'localhost' is a private address");

        let err = tool
            .execute(json!({ "url": "example.com", "format": "pdf" }), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
