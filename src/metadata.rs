//! Catalog snapshot persistence.
//!
//! A `scan` writes the discovered catalog to a timestamped JSON file so a
//! later `download --metadata-file` run can consume it without re-scanning.
//! Download URLs in a snapshot are treated as stale and re-resolved at
//! transfer time.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::catalog::{Catalog, CollectionRef, DocumentRecord, ScanStats};
use crate::error::Result;

/// Serialized form of one document record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentMeta {
    pub id: String,
    pub name: String,
    pub size_bytes: u64,
    pub mime_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_hash: Option<String>,
    pub collection_id: String,
    pub path: Vec<String>,
    pub last_modified: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_url: Option<String>,
}

/// A saved catalog: the document set plus scan provenance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogSnapshot {
    pub timestamp: DateTime<Utc>,
    pub site_url: String,
    pub total_documents: usize,
    pub collections_visited: usize,
    pub documents: Vec<DocumentMeta>,
}

impl CatalogSnapshot {
    /// Captures a catalog into its serializable form.
    #[must_use]
    pub fn from_catalog(catalog: &Catalog, site_url: &str) -> Self {
        let documents = catalog
            .documents()
            .iter()
            .map(|doc| DocumentMeta {
                id: doc.id.clone(),
                name: doc.name.clone(),
                size_bytes: doc.size_bytes,
                mime_type: doc.mime_type.clone(),
                content_hash: doc.content_hash.clone(),
                collection_id: doc.remote_path.id.clone(),
                path: doc.remote_path.path.clone(),
                last_modified: doc.last_modified,
                download_url: doc.download_url.clone(),
            })
            .collect();
        Self {
            timestamp: Utc::now(),
            site_url: site_url.to_string(),
            total_documents: catalog.len(),
            collections_visited: catalog.stats().collections_visited,
            documents,
        }
    }

    /// Rebuilds a catalog from the snapshot. Documents from the same
    /// collection share one `CollectionRef`; parent links are not restored.
    #[must_use]
    pub fn into_catalog(self) -> Catalog {
        let mut collections: HashMap<String, Arc<CollectionRef>> = HashMap::new();
        let documents: Vec<DocumentRecord> = self
            .documents
            .into_iter()
            .map(|meta| {
                let collection = collections
                    .entry(meta.collection_id.clone())
                    .or_insert_with(|| {
                        Arc::new(CollectionRef {
                            id: meta.collection_id.clone(),
                            path: meta.path.clone(),
                            parent: None,
                        })
                    });
                DocumentRecord {
                    id: meta.id,
                    name: meta.name,
                    size_bytes: meta.size_bytes,
                    content_hash: meta.content_hash,
                    mime_type: meta.mime_type,
                    remote_path: Arc::clone(collection),
                    last_modified: meta.last_modified,
                    download_url: meta.download_url,
                }
            })
            .collect();

        Catalog::from_parts(
            documents,
            ScanStats {
                collections_visited: self.collections_visited,
                errors: Vec::new(),
            },
        )
    }

    /// Saves the snapshot as pretty JSON, atomically (write tmp + rename).
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be serialized or written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let json = serde_json::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;

        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, json)?;
        std::fs::rename(&tmp_path, path)?;
        log::info!("catalog metadata saved to {}", path.display());
        Ok(())
    }

    /// Loads a snapshot from a JSON file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let snapshot = serde_json::from_str(&contents)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
        Ok(snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_catalog() -> Catalog {
        let documents_col = Arc::new(CollectionRef {
            id: "drive:a".to_string(),
            path: vec!["Documents".to_string()],
            parent: None,
        });
        let archive_col = Arc::new(CollectionRef {
            id: "drive:b".to_string(),
            path: vec!["Archive".to_string()],
            parent: None,
        });
        let doc = |id: &str, name: &str, col: &Arc<CollectionRef>| DocumentRecord {
            id: id.to_string(),
            name: name.to_string(),
            size_bytes: 42,
            content_hash: Some("hash".to_string()),
            mime_type: "application/pdf".to_string(),
            remote_path: Arc::clone(col),
            last_modified: Utc::now(),
            download_url: Some("https://dl.example/x".to_string()),
        };
        Catalog::from_parts(
            vec![
                doc("a:1", "one.pdf", &documents_col),
                doc("a:2", "two.pdf", &documents_col),
                doc("b:1", "three.pdf", &archive_col),
            ],
            ScanStats {
                collections_visited: 3,
                errors: Vec::new(),
            },
        )
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.json");

        let snapshot =
            CatalogSnapshot::from_catalog(&sample_catalog(), "https://contoso.sharepoint.com/x");
        snapshot.save(&path).unwrap();

        let loaded = CatalogSnapshot::load(&path).unwrap();
        assert_eq!(loaded.total_documents, 3);
        assert_eq!(loaded.collections_visited, 3);
        assert_eq!(loaded.site_url, "https://contoso.sharepoint.com/x");
        assert_eq!(loaded.documents.len(), 3);
        assert_eq!(loaded.documents[0].path, vec!["Documents"]);
    }

    #[test]
    fn save_leaves_no_temp_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("documents.json");

        CatalogSnapshot::from_catalog(&sample_catalog(), "https://x.sharepoint.com")
            .save(&path)
            .unwrap();

        let names: Vec<String> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["documents.json"]);
    }

    #[test]
    fn into_catalog_shares_collection_refs() {
        let snapshot =
            CatalogSnapshot::from_catalog(&sample_catalog(), "https://x.sharepoint.com");
        let catalog = snapshot.into_catalog();

        assert_eq!(catalog.len(), 3);
        let docs = catalog.documents();
        let same_collection: Vec<_> = docs
            .iter()
            .filter(|d| d.remote_path.id == "drive:a")
            .collect();
        assert_eq!(same_collection.len(), 2);
        assert!(Arc::ptr_eq(
            &same_collection[0].remote_path,
            &same_collection[1].remote_path
        ));
    }

    #[test]
    fn load_missing_file_fails() {
        assert!(CatalogSnapshot::load(Path::new("/nonexistent/documents.json")).is_err());
    }

    #[test]
    fn load_rejects_malformed_json() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.json");
        std::fs::write(&path, "{ not json").unwrap();
        assert!(CatalogSnapshot::load(&path).is_err());
    }
}
