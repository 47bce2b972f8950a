//! Catalog discovery over the remote collection hierarchy.
//!
//! A scan produces a frozen [`Catalog`] snapshot: the flat set of documents
//! reachable from a root collection, plus discovery statistics. The walk is
//! breadth-first, listing sibling collections concurrently under a global
//! cap, and keyed by opaque collection id so that back-references and
//! renames cannot send it into a loop.

use std::collections::HashSet;
use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use futures::{StreamExt, stream};

use crate::error::{ApiError, ApiResult, Error, Result};
use crate::graph::{DocumentService, ListedDocument, ListedItem};
use crate::site::SiteAddress;

/// A folder/site node in the remote hierarchy. Immutable once discovered.
#[derive(Debug, Clone)]
pub struct CollectionRef {
    /// Opaque collection id; the identity used for cycle detection.
    pub id: String,
    /// Path segments from the root (display names).
    pub path: Vec<String>,
    /// The discovering parent, if any.
    pub parent: Option<Weak<CollectionRef>>,
}

impl CollectionRef {
    /// Creates a root collection with an empty path.
    #[must_use]
    pub const fn root(id: String) -> Self {
        Self {
            id,
            path: Vec::new(),
            parent: None,
        }
    }

    /// Creates a child of `parent` named `name`.
    #[must_use]
    pub fn child_of(parent: &Arc<Self>, id: String, name: &str) -> Self {
        let mut path = parent.path.clone();
        path.push(name.to_string());
        Self {
            id,
            path,
            parent: Some(Arc::downgrade(parent)),
        }
    }

    /// The path joined with `/`, for logs and summaries.
    #[must_use]
    pub fn path_display(&self) -> String {
        self.path.join("/")
    }
}

impl PartialEq for CollectionRef {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for CollectionRef {}

/// Metadata for one discovered document. Read-only after discovery.
#[derive(Debug, Clone)]
pub struct DocumentRecord {
    /// Opaque document id, unique within one catalog snapshot.
    pub id: String,
    /// File name; may collide across collections but not within one.
    pub name: String,
    /// Size in bytes.
    pub size_bytes: u64,
    /// Content hash, when the service provides one.
    pub content_hash: Option<String>,
    /// MIME type.
    pub mime_type: String,
    /// The collection this document lives in.
    pub remote_path: Arc<CollectionRef>,
    /// Last modification time.
    pub last_modified: DateTime<Utc>,
    /// Cached download URL; may require re-resolution before use.
    pub download_url: Option<String>,
}

impl DocumentRecord {
    fn from_listed(listed: ListedDocument, collection: Arc<CollectionRef>) -> Self {
        Self {
            id: listed.id,
            name: listed.name,
            size_bytes: listed.size_bytes,
            content_hash: listed.content_hash,
            mime_type: listed.mime_type,
            remote_path: collection,
            last_modified: listed.last_modified,
            download_url: listed.download_url,
        }
    }
}

/// A subtree listing failure recorded during a scan.
#[derive(Debug, Clone)]
pub struct ScanError {
    pub collection_id: String,
    pub path: String,
    pub message: String,
}

/// Discovery statistics for one scan.
#[derive(Debug, Clone, Default)]
pub struct ScanStats {
    /// Collections successfully listed, including the root.
    pub collections_visited: usize,
    /// Subtrees that failed to list and were skipped.
    pub errors: Vec<ScanError>,
}

/// A frozen snapshot of discovered documents.
#[derive(Debug, Clone)]
pub struct Catalog {
    documents: Vec<DocumentRecord>,
    stats: ScanStats,
}

impl Catalog {
    /// Assembles a catalog from already-discovered parts (e.g. a metadata
    /// file).
    #[must_use]
    pub const fn from_parts(documents: Vec<DocumentRecord>, stats: ScanStats) -> Self {
        Self { documents, stats }
    }

    /// Number of documents in the snapshot.
    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    /// Whether the snapshot is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// The documents in this snapshot.
    #[must_use]
    pub fn documents(&self) -> &[DocumentRecord] {
        &self.documents
    }

    /// Discovery statistics.
    #[must_use]
    pub const fn stats(&self) -> &ScanStats {
        &self.stats
    }

    /// Total payload size across all documents.
    #[must_use]
    pub fn total_size_bytes(&self) -> u64 {
        self.documents.iter().map(|d| d.size_bytes).sum()
    }
}

/// Recursively enumerates collections and documents from a root.
pub struct CatalogWalker<S> {
    service: Arc<S>,
    concurrency: usize,
}

impl<S: DocumentService> CatalogWalker<S> {
    /// Creates a walker over the given document service.
    #[must_use]
    pub fn new(service: Arc<S>) -> Self {
        Self {
            service,
            concurrency: 4,
        }
    }

    /// Sets the global cap on concurrent listing calls.
    #[must_use]
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Resolves a site to its root collection and scans it.
    ///
    /// # Errors
    ///
    /// Returns `Error::SharePoint` if the site cannot be resolved or its
    /// root cannot be listed.
    pub async fn scan_site(&self, site: &SiteAddress) -> Result<Catalog> {
        let root = self
            .service
            .get_site_root(site)
            .await
            .map_err(|e| Error::SharePoint(format!("cannot resolve site {site}: {e}")))?;
        self.scan(root).await
    }

    /// Scans all documents reachable from `root` into a frozen catalog.
    ///
    /// Subtree failures are recorded in the scan statistics and do not
    /// abort the walk; only a failure listing the root itself is fatal.
    ///
    /// # Errors
    ///
    /// Returns `Error::SharePoint` when the root listing fails.
    pub async fn scan(&self, root: CollectionRef) -> Result<Catalog> {
        let root = Arc::new(root);
        let mut seen: HashSet<String> = HashSet::from([root.id.clone()]);
        let mut documents: Vec<DocumentRecord> = Vec::new();
        let mut stats = ScanStats::default();

        log::info!("scanning for documents under collection {}", root.id);

        let root_items = self
            .list_all_pages(&root.id)
            .await
            .map_err(|e| Error::SharePoint(format!("cannot list root collection: {e}")))?;
        stats.collections_visited += 1;

        let mut frontier: Vec<Arc<CollectionRef>> = Vec::new();
        self.absorb(&root, root_items, &mut seen, &mut documents, &mut frontier);

        while !frontier.is_empty() {
            let batch: Vec<Arc<CollectionRef>> = std::mem::take(&mut frontier);
            let results: Vec<(Arc<CollectionRef>, ApiResult<Vec<ListedItem>>)> =
                stream::iter(batch)
                    .map(|collection| async move {
                        let listing = self.list_all_pages(&collection.id).await;
                        (collection, listing)
                    })
                    .buffer_unordered(self.concurrency)
                    .collect()
                    .await;

            for (collection, listing) in results {
                match listing {
                    Ok(items) => {
                        stats.collections_visited += 1;
                        self.absorb(&collection, items, &mut seen, &mut documents, &mut frontier);
                    }
                    Err(e) => {
                        log::warn!(
                            "skipping subtree {:?} ({}): {e}",
                            collection.path_display(),
                            collection.id
                        );
                        stats.errors.push(ScanError {
                            collection_id: collection.id.clone(),
                            path: collection.path_display(),
                            message: e.to_string(),
                        });
                    }
                }
            }
        }

        log::info!(
            "scan complete: {} documents across {} collections ({} subtree errors)",
            documents.len(),
            stats.collections_visited,
            stats.errors.len()
        );
        Ok(Catalog { documents, stats })
    }

    /// Follows pagination until a collection is fully listed.
    async fn list_all_pages(&self, collection_id: &str) -> ApiResult<Vec<ListedItem>> {
        let mut items = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let listing = self
                .service
                .list_children(collection_id, page_token.as_deref())
                .await?;
            items.extend(listing.items);
            match listing.next_page_token {
                Some(token) => page_token = Some(token),
                None => return Ok(items),
            }
        }
    }

    /// Files documents and enqueues unseen child collections.
    fn absorb(
        &self,
        collection: &Arc<CollectionRef>,
        items: Vec<ListedItem>,
        seen: &mut HashSet<String>,
        documents: &mut Vec<DocumentRecord>,
        frontier: &mut Vec<Arc<CollectionRef>>,
    ) {
        for item in items {
            match item {
                ListedItem::Document(doc) => {
                    documents.push(DocumentRecord::from_listed(doc, Arc::clone(collection)));
                }
                ListedItem::Collection(child) => {
                    if seen.insert(child.id.clone()) {
                        frontier.push(Arc::new(CollectionRef::child_of(
                            collection, child.id, &child.name,
                        )));
                    } else {
                        log::debug!("collection {} already visited, skipping", child.id);
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{ListedCollection, Listing};
    use async_trait::async_trait;
    use std::collections::HashMap;

    fn doc(id: &str, name: &str, size: u64) -> ListedItem {
        ListedItem::Document(ListedDocument {
            id: id.to_string(),
            name: name.to_string(),
            size_bytes: size,
            mime_type: "application/pdf".to_string(),
            content_hash: None,
            last_modified: Utc::now(),
            download_url: Some(format!("https://dl.example/{id}")),
        })
    }

    fn col(id: &str, name: &str) -> ListedItem {
        ListedItem::Collection(ListedCollection {
            id: id.to_string(),
            name: name.to_string(),
        })
    }

    struct MockService {
        children: HashMap<String, Vec<ListedItem>>,
        fail: HashSet<String>,
        page_size: usize,
    }

    impl MockService {
        fn new(children: HashMap<String, Vec<ListedItem>>) -> Self {
            Self {
                children,
                fail: HashSet::new(),
                page_size: usize::MAX,
            }
        }

        fn failing(mut self, collection_id: &str) -> Self {
            self.fail.insert(collection_id.to_string());
            self
        }

        const fn with_page_size(mut self, page_size: usize) -> Self {
            self.page_size = page_size;
            self
        }
    }

    #[async_trait]
    impl DocumentService for MockService {
        async fn get_site_root(&self, _site: &SiteAddress) -> ApiResult<CollectionRef> {
            Ok(CollectionRef::root("site:root".to_string()))
        }

        async fn list_children(
            &self,
            collection_id: &str,
            page_token: Option<&str>,
        ) -> ApiResult<Listing> {
            if self.fail.contains(collection_id) {
                return Err(ApiError::Unauthorized("access denied".to_string()));
            }
            let all = self.children.get(collection_id).cloned().unwrap_or_default();
            let start: usize = page_token.map_or(0, |t| t.parse().unwrap());
            let end = start.saturating_add(self.page_size).min(all.len());
            let next_page_token = (end < all.len()).then(|| end.to_string());
            Ok(Listing {
                items: all[start..end].to_vec(),
                next_page_token,
            })
        }

        async fn get_download_url(&self, document_id: &str) -> ApiResult<String> {
            Ok(format!("https://dl.example/{document_id}"))
        }

        async fn fetch(&self, _url: &str) -> ApiResult<bytes::Bytes> {
            Ok(bytes::Bytes::new())
        }
    }

    fn site_tree() -> HashMap<String, Vec<ListedItem>> {
        HashMap::from([
            (
                "site:root".to_string(),
                vec![col("drive:a", "Documents"), col("drive:b", "Archive")],
            ),
            (
                "drive:a".to_string(),
                vec![doc("a:1", "one.pdf", 100), col("item:a:f1", "Reports")],
            ),
            (
                "item:a:f1".to_string(),
                vec![doc("a:2", "two.pdf", 200)],
            ),
            ("drive:b".to_string(), vec![doc("b:1", "three.pdf", 300)]),
        ])
    }

    fn ids(catalog: &Catalog) -> HashSet<String> {
        catalog.documents().iter().map(|d| d.id.clone()).collect()
    }

    #[tokio::test]
    async fn scan_finds_all_documents() {
        let walker = CatalogWalker::new(Arc::new(MockService::new(site_tree())));
        let catalog = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await
            .unwrap();

        assert_eq!(
            ids(&catalog),
            HashSet::from(["a:1".to_string(), "a:2".to_string(), "b:1".to_string()])
        );
        assert_eq!(catalog.stats().collections_visited, 4);
        assert!(catalog.stats().errors.is_empty());
        assert_eq!(catalog.total_size_bytes(), 600);
    }

    #[tokio::test]
    async fn records_carry_collection_paths() {
        let walker = CatalogWalker::new(Arc::new(MockService::new(site_tree())));
        let catalog = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await
            .unwrap();

        let nested = catalog
            .documents()
            .iter()
            .find(|d| d.id == "a:2")
            .unwrap();
        assert_eq!(nested.remote_path.path, vec!["Documents", "Reports"]);
        assert_eq!(nested.remote_path.path_display(), "Documents/Reports");
    }

    #[tokio::test]
    async fn back_reference_does_not_recurse_forever() {
        let mut tree = site_tree();
        // The nested folder points back at its own drive.
        tree.get_mut("item:a:f1")
            .unwrap()
            .push(col("drive:a", "Documents"));

        let walker = CatalogWalker::new(Arc::new(MockService::new(tree)));
        let catalog = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await
            .unwrap();

        assert_eq!(catalog.len(), 3);
        assert_eq!(catalog.stats().collections_visited, 4);
    }

    #[tokio::test]
    async fn failed_subtree_does_not_abort_siblings() {
        let service = MockService::new(site_tree()).failing("drive:b");
        let walker = CatalogWalker::new(Arc::new(service));
        let catalog = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await
            .unwrap();

        assert_eq!(
            ids(&catalog),
            HashSet::from(["a:1".to_string(), "a:2".to_string()])
        );
        assert_eq!(catalog.stats().errors.len(), 1);
        assert_eq!(catalog.stats().errors[0].collection_id, "drive:b");
    }

    #[tokio::test]
    async fn root_failure_is_fatal() {
        let service = MockService::new(site_tree()).failing("site:root");
        let walker = CatalogWalker::new(Arc::new(service));
        let result = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await;
        assert!(matches!(result, Err(Error::SharePoint(_))));
    }

    #[tokio::test]
    async fn pagination_is_followed() {
        let tree = HashMap::from([(
            "site:root".to_string(),
            (0..5).map(|i| doc(&format!("d:{i}"), "n.pdf", 1)).collect(),
        )]);
        let service = MockService::new(tree).with_page_size(2);
        let walker = CatalogWalker::new(Arc::new(service));
        let catalog = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await
            .unwrap();
        assert_eq!(catalog.len(), 5);
    }

    #[tokio::test]
    async fn repeated_scans_yield_the_same_document_set() {
        let service = Arc::new(MockService::new(site_tree()));
        let walker = CatalogWalker::new(Arc::clone(&service)).with_concurrency(3);

        let first = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await
            .unwrap();
        let second = walker
            .scan(CollectionRef::root("site:root".to_string()))
            .await
            .unwrap();
        // Ordering may differ between scans; compare as sets.
        assert_eq!(ids(&first), ids(&second));
    }

    #[tokio::test]
    async fn scan_site_resolves_the_root() {
        let walker = CatalogWalker::new(Arc::new(MockService::new(site_tree())));
        let site = SiteAddress::parse("https://contoso.sharepoint.com/sites/x").unwrap();
        let catalog = walker.scan_site(&site).await.unwrap();
        assert_eq!(catalog.len(), 3);
    }
}
