use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use moka::future::Cache;
use serde::Deserialize;
use tracing::{debug, warn};

use super::{DocumentError, DocumentResult, DocumentSource};

#[derive(Deserialize)]
struct DocumentBody {
    blocks: Vec<String>,
}

/// Fetches documents from `GET {base_url}/documents/{id}` and memoizes them.
///
/// The upstream is expected to answer with `{"blocks": ["...", ...]}`.
pub struct HttpDocumentSource {
    client: reqwest::Client,
    base_url: url::Url,
    cache: Cache<String, Arc<Vec<String>>>,
}

impl HttpDocumentSource {
    pub fn new(base_url: &str, ttl: Duration, timeout: Duration) -> DocumentResult<Self> {
        let mut base_url = url::Url::parse(base_url)
            .map_err(|e| DocumentError::Invalid(format!("document source url: {e}")))?;
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| DocumentError::Unavailable(e.to_string()))?;

        Ok(Self {
            client,
            base_url,
            cache: Cache::builder()
                .max_capacity(1_000)
                .time_to_live(ttl)
                .build(),
        })
    }

    async fn fetch(&self, document_id: &str) -> DocumentResult<Arc<Vec<String>>> {
        let mut url = self
            .base_url
            .join("documents/")
            .map_err(|e| DocumentError::Invalid(e.to_string()))?;
        url.path_segments_mut()
            .map_err(|_| DocumentError::Invalid("base url cannot be a base".to_string()))?
            .pop_if_empty()
            .push(document_id);

        debug!(url = %url, "Fetching document");
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| DocumentError::Unavailable(e.to_string()))?;

        match response.status() {
            status if status.is_success() => {
                let body: DocumentBody = response
                    .json()
                    .await
                    .map_err(|e| DocumentError::Invalid(e.to_string()))?;
                Ok(Arc::new(body.blocks))
            }
            reqwest::StatusCode::NOT_FOUND => Err(DocumentError::NotFound(document_id.to_string())),
            status => {
                warn!(document_id, %status, "Document source returned an error");
                Err(DocumentError::Unavailable(format!("upstream returned {status}")))
            }
        }
    }
}

#[async_trait]
impl DocumentSource for HttpDocumentSource {
    async fn blocks(&self, document_id: &str) -> DocumentResult<Arc<Vec<String>>> {
        if let Some(doc) = self.cache.get(document_id).await {
            return Ok(doc);
        }
        let doc = self.fetch(document_id).await?;
        self.cache.insert(document_id.to_string(), doc.clone()).await;
        Ok(doc)
    }
}
