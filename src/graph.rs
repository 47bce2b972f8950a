//! Microsoft Graph document-service collaborator.
//!
//! [`DocumentService`] is the narrow interface the core calls through;
//! [`GraphClient`] is the production implementation. The opaque collection
//! and document ids it hands out encode the Graph addressing scheme
//! (`site:`/`drive:`/`item:` prefixes) so that callers never parse paths.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::auth::TokenStore;
use crate::catalog::CollectionRef;
use crate::error::{ApiError, ApiResult, Error, Result};
use crate::site::SiteAddress;

/// Default Graph API endpoint.
pub const GRAPH_BASE_URL: &str = "https://graph.microsoft.com/v1.0";

/// A child collection (document library or folder) returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedCollection {
    /// Opaque collection id.
    pub id: String,
    /// Display name, used as a path segment.
    pub name: String,
}

/// A leaf document returned by a listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListedDocument {
    /// Opaque document id.
    pub id: String,
    /// Document file name.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// MIME type reported by the service.
    pub mime_type: String,
    /// Content hash, when the service provides one.
    pub content_hash: Option<String>,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Short-lived pre-authorized download URL, when present.
    pub download_url: Option<String>,
}

/// One entry in a collection listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ListedItem {
    Collection(ListedCollection),
    Document(ListedDocument),
}

/// One page of a collection listing.
#[derive(Debug, Clone)]
pub struct Listing {
    pub items: Vec<ListedItem>,
    /// Token for the next page, or `None` on the last page.
    pub next_page_token: Option<String>,
}

/// The remote document service, as consumed by the core.
#[async_trait]
pub trait DocumentService: Send + Sync {
    /// Resolves a site URL to its root collection.
    async fn get_site_root(&self, site: &SiteAddress) -> ApiResult<CollectionRef>;

    /// Lists one page of a collection's children.
    async fn list_children(
        &self,
        collection_id: &str,
        page_token: Option<&str>,
    ) -> ApiResult<Listing>;

    /// Resolves a fresh download URL for a document.
    async fn get_download_url(&self, document_id: &str) -> ApiResult<String>;

    /// Fetches a payload from a download URL.
    async fn fetch(&self, url: &str) -> ApiResult<bytes::Bytes>;
}

// ---------------------------------------------------------------------------
// Opaque id encoding
// ---------------------------------------------------------------------------

fn site_collection_id(site_id: &str) -> String {
    format!("site:{site_id}")
}

fn drive_collection_id(drive_id: &str) -> String {
    format!("drive:{drive_id}")
}

fn item_collection_id(drive_id: &str, item_id: &str) -> String {
    format!("item:{drive_id}:{item_id}")
}

fn document_id(drive_id: &str, item_id: &str) -> String {
    format!("{drive_id}:{item_id}")
}

fn split_document_id(id: &str) -> ApiResult<(&str, &str)> {
    id.split_once(':')
        .filter(|(drive, item)| !drive.is_empty() && !item.is_empty())
        .ok_or_else(|| ApiError::NotFound(format!("malformed document id: {id:?}")))
}

// ---------------------------------------------------------------------------
// Wire types
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct SiteResponse {
    id: String,
    #[serde(rename = "displayName")]
    display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DriveEntry {
    id: String,
    name: String,
}

#[derive(Debug, Deserialize)]
struct DriveListResponse {
    value: Vec<DriveEntry>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileHashes {
    #[serde(rename = "quickXorHash")]
    quick_xor_hash: Option<String>,
}

#[derive(Debug, Deserialize)]
struct FileFacet {
    #[serde(rename = "mimeType")]
    mime_type: Option<String>,
    hashes: Option<FileHashes>,
}

#[derive(Debug, Deserialize)]
struct FolderFacet {}

#[derive(Debug, Deserialize)]
struct DriveItem {
    id: String,
    name: String,
    size: Option<u64>,
    #[serde(rename = "lastModifiedDateTime")]
    last_modified: Option<DateTime<Utc>>,
    file: Option<FileFacet>,
    folder: Option<FolderFacet>,
    #[serde(rename = "@microsoft.graph.downloadUrl")]
    download_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemListResponse {
    value: Vec<DriveItem>,
    #[serde(rename = "@odata.nextLink")]
    next_link: Option<String>,
}

fn listed_item_from(drive_id: &str, item: DriveItem) -> Option<ListedItem> {
    if item.folder.is_some() {
        return Some(ListedItem::Collection(ListedCollection {
            id: item_collection_id(drive_id, &item.id),
            name: item.name,
        }));
    }
    let file = item.file?;
    Some(ListedItem::Document(ListedDocument {
        id: document_id(drive_id, &item.id),
        name: item.name,
        size_bytes: item.size.unwrap_or(0),
        mime_type: file
            .mime_type
            .unwrap_or_else(|| "application/octet-stream".to_string()),
        content_hash: file.hashes.and_then(|h| h.quick_xor_hash),
        last_modified: item.last_modified.unwrap_or_else(Utc::now),
        download_url: item.download_url,
    }))
}

// ---------------------------------------------------------------------------
// Production client
// ---------------------------------------------------------------------------

/// Graph API client authenticating through a shared [`TokenStore`].
pub struct GraphClient {
    http: reqwest::Client,
    tokens: Arc<TokenStore>,
    base_url: String,
}

impl GraphClient {
    /// Creates a client with a pooled HTTP connection configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the underlying HTTP client cannot be built.
    pub fn new(tokens: Arc<TokenStore>) -> Result<Self> {
        let http = reqwest::Client::builder()
            .pool_idle_timeout(Duration::from_secs(60))
            .pool_max_idle_per_host(8)
            .tcp_keepalive(Duration::from_secs(30))
            .timeout(Duration::from_secs(60))
            .build()?;
        Ok(Self {
            http,
            tokens,
            base_url: GRAPH_BASE_URL.to_string(),
        })
    }

    /// Overrides the service base URL.
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn auth_headers(&self) -> ApiResult<reqwest::header::HeaderMap> {
        self.tokens.get_auth_headers().await.map_err(|e| match e {
            Error::Authentication(msg) => ApiError::Unauthorized(msg),
            other => ApiError::Transient(other.to_string()),
        })
    }

    /// Sends an authenticated GET and classifies non-success statuses.
    async fn get_checked(&self, url: &str) -> ApiResult<reqwest::Response> {
        let headers = self.auth_headers().await?;
        let response = self.http.get(url).headers(headers).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let retry_after = response
            .headers()
            .get(reqwest::header::RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<u64>().ok())
            .map(Duration::from_secs);
        let message = truncated_body(&response.text().await.unwrap_or_default());
        let err = ApiError::from_status(status.as_u16(), message);
        if let (ApiError::RateLimited { .. }, Some(after)) = (&err, retry_after) {
            return Err(ApiError::RateLimited {
                retry_after: Some(after),
            });
        }
        Err(err)
    }

    async fn list_site_drives(&self, site_id: &str, page_url: Option<&str>) -> ApiResult<Listing> {
        let url = page_url.map_or_else(
            || format!("{}/sites/{site_id}/drives", self.base_url),
            ToString::to_string,
        );
        let response: DriveListResponse = self.get_checked(&url).await?.json().await?;
        let items = response
            .value
            .into_iter()
            .map(|drive| {
                ListedItem::Collection(ListedCollection {
                    id: drive_collection_id(&drive.id),
                    name: drive.name,
                })
            })
            .collect();
        Ok(Listing {
            items,
            next_page_token: response.next_link,
        })
    }

    async fn list_drive_items(
        &self,
        drive_id: &str,
        item_id: Option<&str>,
        page_url: Option<&str>,
    ) -> ApiResult<Listing> {
        let url = match (page_url, item_id) {
            (Some(page), _) => page.to_string(),
            (None, Some(item)) => {
                format!("{}/drives/{drive_id}/items/{item}/children", self.base_url)
            }
            (None, None) => format!("{}/drives/{drive_id}/root/children", self.base_url),
        };
        let response: ItemListResponse = self.get_checked(&url).await?.json().await?;
        let items = response
            .value
            .into_iter()
            .filter_map(|item| listed_item_from(drive_id, item))
            .collect();
        Ok(Listing {
            items,
            next_page_token: response.next_link,
        })
    }
}

#[async_trait]
impl DocumentService for GraphClient {
    async fn get_site_root(&self, site: &SiteAddress) -> ApiResult<CollectionRef> {
        let url = format!("{}/sites/{}", self.base_url, site.graph_identifier());
        let response: SiteResponse = self.get_checked(&url).await?.json().await?;
        log::info!(
            "connected to SharePoint site: {}",
            response.display_name.as_deref().unwrap_or("Unknown")
        );
        Ok(CollectionRef::root(site_collection_id(&response.id)))
    }

    async fn list_children(
        &self,
        collection_id: &str,
        page_token: Option<&str>,
    ) -> ApiResult<Listing> {
        if let Some(site_id) = collection_id.strip_prefix("site:") {
            self.list_site_drives(site_id, page_token).await
        } else if let Some(drive_id) = collection_id.strip_prefix("drive:") {
            self.list_drive_items(drive_id, None, page_token).await
        } else if let Some(rest) = collection_id.strip_prefix("item:") {
            let (drive_id, item_id) = rest.split_once(':').ok_or_else(|| {
                ApiError::NotFound(format!("malformed collection id: {collection_id:?}"))
            })?;
            self.list_drive_items(drive_id, Some(item_id), page_token)
                .await
        } else {
            Err(ApiError::NotFound(format!(
                "unknown collection id: {collection_id:?}"
            )))
        }
    }

    async fn get_download_url(&self, document_id: &str) -> ApiResult<String> {
        let (drive_id, item_id) = split_document_id(document_id)?;
        let url = format!("{}/drives/{drive_id}/items/{item_id}", self.base_url);
        let item: DriveItem = self.get_checked(&url).await?.json().await?;
        // Fall back to the authenticated content endpoint when the service
        // does not hand out a pre-authorized URL.
        Ok(item.download_url.unwrap_or_else(|| {
            format!(
                "{}/drives/{drive_id}/items/{item_id}/content",
                self.base_url
            )
        }))
    }

    async fn fetch(&self, url: &str) -> ApiResult<bytes::Bytes> {
        // Graph-hosted URLs need the bearer header; pre-authorized download
        // URLs must be fetched bare.
        let response = if url.starts_with(&self.base_url) {
            let mut headers = self.auth_headers().await?;
            headers.insert(
                reqwest::header::ACCEPT,
                reqwest::header::HeaderValue::from_static("application/octet-stream"),
            );
            self.http.get(url).headers(headers).send().await?
        } else {
            self.http.get(url).send().await?
        };

        let status = response.status();
        if !status.is_success() {
            let message = truncated_body(&response.text().await.unwrap_or_default());
            return Err(ApiError::from_status(status.as_u16(), message));
        }
        Ok(response.bytes().await?)
    }
}

/// Clips an error body to a loggable length.
fn truncated_body(body: &str) -> String {
    body.chars().take(200).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn document_id_round_trips() {
        let id = document_id("drive-1", "item-9");
        let (drive, item) = split_document_id(&id).unwrap();
        assert_eq!(drive, "drive-1");
        assert_eq!(item, "item-9");
    }

    #[test]
    fn malformed_document_id_is_rejected() {
        assert!(split_document_id("no-separator").is_err());
        assert!(split_document_id(":item").is_err());
        assert!(split_document_id("drive:").is_err());
    }

    #[test]
    fn folder_item_becomes_collection() {
        let raw = serde_json::json!({
            "id": "item-1",
            "name": "Reports",
            "folder": { "childCount": 3 },
        });
        let item: DriveItem = serde_json::from_value(raw).unwrap();
        let listed = listed_item_from("drive-1", item).unwrap();
        assert_eq!(
            listed,
            ListedItem::Collection(ListedCollection {
                id: "item:drive-1:item-1".to_string(),
                name: "Reports".to_string(),
            })
        );
    }

    #[test]
    fn file_item_becomes_document() {
        let raw = serde_json::json!({
            "id": "item-2",
            "name": "Budget.xlsx",
            "size": 4096,
            "lastModifiedDateTime": "2024-03-01T12:00:00Z",
            "file": {
                "mimeType": "application/vnd.ms-excel",
                "hashes": { "quickXorHash": "aGFzaA==" },
            },
            "@microsoft.graph.downloadUrl": "https://download.example/doc",
        });
        let item: DriveItem = serde_json::from_value(raw).unwrap();
        let ListedItem::Document(doc) = listed_item_from("drive-1", item).unwrap() else {
            panic!("expected a document");
        };
        assert_eq!(doc.id, "drive-1:item-2");
        assert_eq!(doc.size_bytes, 4096);
        assert_eq!(doc.mime_type, "application/vnd.ms-excel");
        assert_eq!(doc.content_hash.as_deref(), Some("aGFzaA=="));
        assert_eq!(doc.download_url.as_deref(), Some("https://download.example/doc"));
    }

    #[test]
    fn item_without_facets_is_dropped() {
        let raw = serde_json::json!({ "id": "item-3", "name": "weird" });
        let item: DriveItem = serde_json::from_value(raw).unwrap();
        assert!(listed_item_from("drive-1", item).is_none());
    }

    #[test]
    fn pagination_fields_deserialize() {
        let raw = serde_json::json!({
            "value": [],
            "@odata.nextLink": "https://graph.microsoft.com/v1.0/next-page",
        });
        let parsed: ItemListResponse = serde_json::from_value(raw).unwrap();
        assert_eq!(
            parsed.next_link.as_deref(),
            Some("https://graph.microsoft.com/v1.0/next-page")
        );
    }
}
