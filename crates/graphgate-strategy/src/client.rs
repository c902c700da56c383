//! Client capability and preference detection from request headers.

use serde::Serialize;
use std::sync::LazyLock;

const TESTING_TOOLS: &[&str] = &["postman", "insomnia", "swagger", "openapi", "curl", "httpie"];
const BROWSERS: &[&str] = &["mozilla", "chrome", "safari", "firefox", "edge"];

static PREFER_WAIT: LazyLock<regex::Regex> =
    LazyLock::new(|| regex::Regex::new(r"wait=(\d+)").expect("valid pattern"));

/// The headers the detector reads, already extracted from the request.
#[derive(Debug, Clone, Default)]
pub struct ClientHeaders {
    pub accept: String,
    pub user_agent: String,
    pub prefer: String,
    pub referer: String,
}

/// Detected capabilities and preferences.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ClientCapabilities {
    pub supports_sse: bool,
    pub supports_ndjson: bool,
    pub is_testing_tool: bool,
    pub is_browser: bool,
    pub is_interactive: bool,
    pub prefer_stream: bool,
    pub prefer_async: bool,
    pub prefer_wait_seconds: Option<u64>,
}

impl ClientCapabilities {
    pub fn supports_streaming(&self) -> bool {
        self.supports_sse || self.supports_ndjson
    }
}

/// Header-based client detection.
pub struct ClientDetector;

impl ClientDetector {
    pub fn detect(headers: &ClientHeaders) -> ClientCapabilities {
        let accept = headers.accept.to_lowercase();
        let user_agent = headers.user_agent.to_lowercase();
        let prefer = headers.prefer.to_lowercase();
        let referer = headers.referer.to_lowercase();

        let supports_sse = accept.contains("text/event-stream");
        let supports_ndjson =
            accept.contains("application/x-ndjson") || accept.contains("application/stream+json");

        let is_testing_tool = TESTING_TOOLS.iter().any(|tool| user_agent.contains(tool));
        let is_browser = BROWSERS.iter().any(|browser| user_agent.contains(browser));
        let is_interactive = is_testing_tool || (is_browser && referer.contains("swagger"));

        let prefer_wait_seconds = PREFER_WAIT
            .captures(&prefer)
            .and_then(|c| c.get(1))
            .and_then(|m| m.as_str().parse().ok());

        ClientCapabilities {
            supports_sse,
            supports_ndjson,
            is_testing_tool,
            is_browser,
            is_interactive,
            prefer_stream: prefer.contains("stream"),
            prefer_async: prefer.contains("respond-async"),
            prefer_wait_seconds,
        }
    }
}
