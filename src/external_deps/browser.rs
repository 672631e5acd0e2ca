//! Browser pool contract.
//!
//! The browser engine and the live challenge detector drive a real browser
//! through this trait pair. Adapters (CDP, Hero-style automation servers)
//! live outside the crate; tests use scripted fakes.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

/// Errors surfaced by browser adapters.
#[derive(Debug, Error)]
pub enum BrowserError {
    #[error("browser unavailable: {0}")]
    Unavailable(String),
    #[error("navigation failed: {0}")]
    Navigation(String),
    #[error("script evaluation failed: {0}")]
    Evaluation(String),
    #[error("browser error: {0}")]
    Other(String),
}

/// One network exchange observed while a page loads, for API discovery.
#[derive(Debug, Clone)]
pub struct NetworkExchange {
    pub method: String,
    pub url: String,
    pub status: Option<u16>,
    pub resource_type: String,
    pub request_headers: HashMap<String, String>,
    pub response_headers: HashMap<String, String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
}

/// Callback receiving captured network exchanges.
pub type RequestSink = Arc<dyn Fn(NetworkExchange) + Send + Sync>;

/// A live page handle inside a pooled browser.
#[async_trait]
pub trait BrowserPage: Send + Sync {
    async fn goto(&self, url: &str) -> Result<(), BrowserError>;

    /// Wait until layout and painting settle.
    async fn wait_for_stable(&self) -> Result<(), BrowserError>;

    async fn current_url(&self) -> Result<String, BrowserError>;

    /// Full serialized DOM (`document.documentElement.outerHTML`).
    async fn html(&self) -> Result<String, BrowserError>;

    /// Whether any element matches the CSS selector.
    async fn query_selector_exists(&self, selector: &str) -> Result<bool, BrowserError>;

    /// Evaluate a script in page context; the result is JSON-serialised.
    async fn evaluate(&self, script: &str) -> Result<serde_json::Value, BrowserError>;

    /// Install (or clear) the sink that receives XHR/fetch traffic.
    fn set_request_sink(&self, sink: Option<RequestSink>);
}

/// Hands out page handles from a browser pool.
#[async_trait]
pub trait BrowserPool: Send + Sync {
    async fn page(&self) -> Result<Box<dyn BrowserPage>, BrowserError>;
}
