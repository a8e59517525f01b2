//! External collaborator contracts and their HTTP implementation.
//!
//! The engine consumes two boundary services: the catalog query service
//! (search + categories) and the script content service (source fetch, lint,
//! username availability). Both are traits so the pager, download manager and
//! validators can be driven by mocks in tests or by any transport in
//! production. `HttpMarketClient` implements both over HTTP/JSON.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::catalog::{CatalogItem, CatalogQuery};
use crate::config::MarketConfig;
use crate::error::{MarketError, Result};

/// One page of catalog search results plus the server's continuation signal.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CatalogPage {
    pub items: Vec<CatalogItem>,
    pub has_more: bool,
}

/// Outcome of a structural lint pass over script source.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LintReport {
    pub ok: bool,
    #[serde(default)]
    pub errors: Vec<String>,
}

/// Remote marketplace catalog queries.
pub trait CatalogService: Send + Sync {
    fn search(&self, query: &CatalogQuery) -> Result<CatalogPage>;
    fn list_categories(&self) -> Result<Vec<String>>;
}

/// Script content, lint and account checks.
pub trait ContentService: Send + Sync {
    /// Fetch the raw source text for a catalog item.
    fn fetch_source(&self, catalog_item_id: &str) -> Result<String>;
    /// Structural lint of script source.
    fn lint(&self, source: &str) -> Result<LintReport>;
    /// Whether a username is still free to register.
    fn check_username_available(&self, username: &str) -> Result<bool>;
}

/// HTTP/JSON implementation of both collaborator services.
pub struct HttpMarketClient {
    base_url: String,
}

#[derive(Serialize)]
struct LintRequest<'a> {
    source: &'a str,
}

#[derive(Deserialize)]
struct AvailabilityResponse {
    available: bool,
}

impl HttpMarketClient {
    pub fn new(config: &MarketConfig) -> Self {
        Self::with_base_url(config.api_base_url())
    }

    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        let mut base_url = base_url.into();
        while base_url.ends_with('/') {
            base_url.pop();
        }
        HttpMarketClient { base_url }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

impl CatalogService for HttpMarketClient {
    fn search(&self, query: &CatalogQuery) -> Result<CatalogPage> {
        let mut request = ureq::get(self.endpoint("/api/scripts/search"))
            .query("sortBy", query.sort_key.as_wire())
            .query("sortOrder", query.sort_direction.as_wire())
            .query("limit", query.page_size.to_string())
            .query("offset", query.page_offset.to_string());
        if let Some(text) = &query.text {
            request = request.query("q", text);
        }
        if let Some(category) = &query.category {
            request = request.query("category", category);
        }

        debug!(
            offset = query.page_offset,
            limit = query.page_size,
            "Searching marketplace catalog"
        );
        let response = request.call().map_err(classify_transport_error)?;
        response
            .into_body()
            .read_json::<CatalogPage>()
            .map_err(|e| MarketError::service(format!("malformed search response: {}", e)))
    }

    fn list_categories(&self) -> Result<Vec<String>> {
        let response = ureq::get(self.endpoint("/api/categories"))
            .call()
            .map_err(classify_transport_error)?;
        response
            .into_body()
            .read_json::<Vec<String>>()
            .map_err(|e| MarketError::service(format!("malformed categories response: {}", e)))
    }
}

impl ContentService for HttpMarketClient {
    fn fetch_source(&self, catalog_item_id: &str) -> Result<String> {
        debug!(catalog_item_id, "Fetching script source");
        let response = ureq::get(self.endpoint(&format!(
            "/api/scripts/{}/source",
            catalog_item_id
        )))
        .call()
        .map_err(classify_transport_error)?;
        response
            .into_body()
            .read_to_string()
            .map_err(|e| MarketError::service(format!("failed to read script source: {}", e)))
    }

    fn lint(&self, source: &str) -> Result<LintReport> {
        let response = ureq::post(self.endpoint("/api/lint"))
            .header("Content-Type", "application/json")
            .send_json(&LintRequest { source })
            .map_err(classify_transport_error)?;
        response
            .into_body()
            .read_json::<LintReport>()
            .map_err(|e| MarketError::service(format!("malformed lint response: {}", e)))
    }

    fn check_username_available(&self, username: &str) -> Result<bool> {
        let response = ureq::get(self.endpoint("/api/username-available"))
            .query("username", username)
            .call()
            .map_err(classify_transport_error)?;
        let parsed: AvailabilityResponse = response
            .into_body()
            .read_json()
            .map_err(|e| MarketError::service(format!("malformed availability response: {}", e)))?;
        Ok(parsed.available)
    }
}

/// Classify a transport-level failure into the crate taxonomy.
fn classify_transport_error(err: ureq::Error) -> MarketError {
    match err {
        ureq::Error::StatusCode(code) => classify_status(code),
        other => classify_message(other.to_string()),
    }
}

fn classify_status(code: u16) -> MarketError {
    MarketError::service(format!("server responded with status {}", code))
}

fn classify_message(message: String) -> MarketError {
    let lower = message.to_ascii_lowercase();
    if lower.contains("timed out") || lower.contains("timeout") {
        MarketError::timeout(message)
    } else {
        MarketError::network(message)
    }
}
