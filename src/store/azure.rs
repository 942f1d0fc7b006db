//! Hosted search index backed by Azure AI Search.
//!
//! Implements both index roles over the service's REST API. The write side
//! mirrors the local schema into an index definition with a vector field;
//! the read side issues a single hybrid request (text + vector query) and
//! lets the service's native RRF produce the fused ranking, so the
//! orchestrator sees the same `SearchHit` shape from either provider.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use crate::models::{Chunk, SearchHit};
use crate::store::{ReadIndex, WriteIndex};

const API_VERSION: &str = "2024-07-01";
/// Page size used when collecting ids for a per-file delete.
const DELETE_PAGE: usize = 1000;

pub struct AzureSearchIndex {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    index_name: String,
    dims: usize,
}

impl AzureSearchIndex {
    pub fn new(endpoint: &str, api_key: &str, index_name: &str, dims: usize) -> Result<Self> {
        if endpoint.trim().is_empty() || api_key.trim().is_empty() {
            bail!("Azure Search endpoint and key are required for the azure provider");
        }
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            index_name: index_name.to_string(),
            dims,
        })
    }

    fn docs_url(&self, suffix: &str) -> String {
        format!(
            "{}/indexes/{}/docs/{}?api-version={}",
            self.endpoint, self.index_name, suffix, API_VERSION
        )
    }

    async fn post_json(&self, url: &str, body: &Value) -> Result<Value> {
        let resp = self
            .client
            .post(url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(body)
            .send()
            .await
            .with_context(|| format!("Azure Search request failed: {}", url))?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Azure Search error {}: {}", status, text);
        }
        Ok(resp.json().await?)
    }

    /// Collect document ids for `source_file`, one filter page at a time.
    async fn ids_for_file(&self, source_file: &str) -> Result<Vec<String>> {
        let escaped = source_file.replace('\'', "''");
        let body = json!({
            "filter": format!("sourceFile eq '{}'", escaped),
            "select": "id",
            "top": DELETE_PAGE,
        });
        let response = self.post_json(&self.docs_url("search"), &body).await?;

        Ok(response["value"]
            .as_array()
            .map(|docs| {
                docs.iter()
                    .filter_map(|d| d["id"].as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[async_trait]
impl WriteIndex for AzureSearchIndex {
    async fn ensure_index(&self) -> Result<()> {
        let definition = json!({
            "name": self.index_name,
            "fields": [
                { "name": "id", "type": "Edm.String", "key": true, "filterable": true },
                { "name": "content", "type": "Edm.String", "searchable": true },
                { "name": "sourceFile", "type": "Edm.String", "filterable": true },
                { "name": "headingPath", "type": "Edm.String", "searchable": true },
                { "name": "domain", "type": "Edm.String", "searchable": true, "filterable": true },
                { "name": "tags", "type": "Collection(Edm.String)", "searchable": true },
                { "name": "relatedFiles", "type": "Collection(Edm.String)", "filterable": true },
                { "name": "isInstruction", "type": "Edm.Boolean", "filterable": true },
                { "name": "chunkIndex", "type": "Edm.Int64", "filterable": true },
                { "name": "lastUpdated", "type": "Edm.DateTimeOffset", "filterable": true, "sortable": true },
                {
                    "name": "embedding",
                    "type": "Collection(Edm.Single)",
                    "searchable": true,
                    "dimensions": self.dims,
                    "vectorSearchProfile": "vector-profile"
                }
            ],
            "vectorSearch": {
                "algorithms": [ { "name": "hnsw-config", "kind": "hnsw" } ],
                "profiles": [ { "name": "vector-profile", "algorithm": "hnsw-config" } ]
            }
        });

        // PUT is create-or-update, so this is idempotent like the local DDL.
        let url = format!(
            "{}/indexes/{}?api-version={}",
            self.endpoint, self.index_name, API_VERSION
        );
        let resp = self
            .client
            .put(&url)
            .header("api-key", &self.api_key)
            .header("Content-Type", "application/json")
            .json(&definition)
            .send()
            .await
            .context("Azure Search index creation request failed")?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            bail!("Azure Search index creation error {}: {}", status, text);
        }
        Ok(())
    }

    async fn upsert_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }

        let actions: Vec<Value> = chunks
            .iter()
            .map(|c| {
                json!({
                    "@search.action": "mergeOrUpload",
                    "id": c.id,
                    "content": c.content,
                    "sourceFile": c.source_file,
                    "headingPath": c.heading_path,
                    "domain": c.domain,
                    "tags": c.tags,
                    "relatedFiles": c.related_files,
                    "isInstruction": c.is_instruction,
                    "chunkIndex": c.chunk_index,
                    "lastUpdated": c.last_updated.to_rfc3339(),
                    "embedding": c.embedding,
                })
            })
            .collect();

        let response = self
            .post_json(&self.docs_url("index"), &json!({ "value": actions }))
            .await?;

        // The batch endpoint can partially fail with a 200; treat any
        // per-document failure as a failed batch so the caller retries.
        if let Some(results) = response["value"].as_array() {
            for item in results {
                if item["status"] == json!(false) {
                    bail!(
                        "Azure Search upsert failed for {}: {}",
                        item["key"].as_str().unwrap_or("?"),
                        item["errorMessage"].as_str().unwrap_or("unknown error")
                    );
                }
            }
        }
        Ok(())
    }

    async fn delete_chunks_for_file(&self, source_file: &str) -> Result<()> {
        loop {
            let ids = self.ids_for_file(source_file).await?;
            if ids.is_empty() {
                return Ok(());
            }
            let full_page = ids.len() == DELETE_PAGE;

            let actions: Vec<Value> = ids
                .into_iter()
                .map(|id| json!({ "@search.action": "delete", "id": id }))
                .collect();
            self.post_json(&self.docs_url("index"), &json!({ "value": actions }))
                .await?;

            if !full_page {
                return Ok(());
            }
        }
    }
}

#[async_trait]
impl ReadIndex for AzureSearchIndex {
    async fn search(
        &self,
        query: &str,
        query_vec: &[f32],
        top_k: usize,
    ) -> Result<Vec<SearchHit>> {
        let mut body = json!({
            "search": query,
            "top": top_k,
            "select": "id,content,sourceFile,headingPath,domain,tags,relatedFiles,isInstruction,chunkIndex,lastUpdated",
        });
        if !query_vec.is_empty() {
            body["vectorQueries"] = json!([{
                "kind": "vector",
                "vector": query_vec,
                "fields": "embedding",
                "k": top_k,
            }]);
        }

        let response = self.post_json(&self.docs_url("search"), &body).await?;

        let mut hits = Vec::new();
        if let Some(docs) = response["value"].as_array() {
            for doc in docs {
                let score = doc["@search.score"].as_f64().unwrap_or(0.0);
                hits.push(SearchHit {
                    chunk: chunk_from_doc(doc),
                    score,
                });
            }
        }
        Ok(hits)
    }

    async fn chunk_count(&self) -> i64 {
        let url = self.docs_url("$count");
        let resp = match self
            .client
            .get(&url)
            .header("api-key", &self.api_key)
            .send()
            .await
        {
            Ok(resp) => resp,
            Err(_) => return 0,
        };
        resp.text()
            .await
            .ok()
            .and_then(|t| t.trim().trim_start_matches('\u{feff}').parse().ok())
            .unwrap_or(0)
    }

    async fn source_file_count(&self) -> i64 {
        let body = json!({
            "search": "*",
            "top": 0,
            "facets": ["sourceFile,count:100000"],
        });
        match self.post_json(&self.docs_url("search"), &body).await {
            Ok(response) => response["@search.facets"]["sourceFile"]
                .as_array()
                .map(|buckets| buckets.len() as i64)
                .unwrap_or(0),
            Err(_) => 0,
        }
    }

    async fn last_indexed_time(&self) -> Option<DateTime<Utc>> {
        let body = json!({
            "search": "*",
            "top": 1,
            "orderby": "lastUpdated desc",
            "select": "lastUpdated",
        });
        let response = self.post_json(&self.docs_url("search"), &body).await.ok()?;
        let raw = response["value"].as_array()?.first()?["lastUpdated"].as_str()?;
        DateTime::parse_from_rfc3339(raw)
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }
}

fn chunk_from_doc(doc: &Value) -> Chunk {
    let strings = |v: &Value| -> Vec<String> {
        v.as_array()
            .map(|a| {
                a.iter()
                    .filter_map(|s| s.as_str().map(String::from))
                    .collect()
            })
            .unwrap_or_default()
    };

    Chunk {
        id: doc["id"].as_str().unwrap_or_default().to_string(),
        content: doc["content"].as_str().unwrap_or_default().to_string(),
        source_file: doc["sourceFile"].as_str().unwrap_or_default().to_string(),
        heading_path: doc["headingPath"].as_str().unwrap_or_default().to_string(),
        domain: doc["domain"].as_str().unwrap_or("root").to_string(),
        tags: strings(&doc["tags"]),
        related_files: strings(&doc["relatedFiles"]),
        is_instruction: doc["isInstruction"].as_bool().unwrap_or(false),
        embedding: None,
        last_updated: doc["lastUpdated"]
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(Utc::now),
        chunk_index: doc["chunkIndex"].as_i64().unwrap_or(0),
    }
}
