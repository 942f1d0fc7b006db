//! Hosted embedding via the Azure OpenAI embeddings API.
//!
//! Calls `POST {endpoint}/openai/deployments/{deployment}/embeddings` with
//! batched inputs. Transient failures (HTTP 429 and 5xx, network errors)
//! retry with exponential backoff; other client errors fail immediately.

use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use serde_json::Value;

use crate::embedding::{normalize_l2, Embedder};

const API_VERSION: &str = "2023-05-15";
const MAX_RETRIES: u32 = 5;

pub struct AzureEmbedder {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    deployment: String,
    dims: usize,
}

impl AzureEmbedder {
    pub fn new(endpoint: &str, api_key: &str, deployment: &str, dims: usize) -> Result<Self> {
        if endpoint.trim().is_empty() || api_key.trim().is_empty() || deployment.trim().is_empty()
        {
            bail!("Azure OpenAI endpoint, key, and deployment are required for the azure provider");
        }
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
            deployment: deployment.to_string(),
            dims,
        })
    }

    fn url(&self) -> String {
        format!(
            "{}/openai/deployments/{}/embeddings?api-version={}",
            self.endpoint, self.deployment, API_VERSION
        )
    }
}

#[async_trait]
impl Embedder for AzureEmbedder {
    fn model_name(&self) -> &str {
        &self.deployment
    }

    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        let body = serde_json::json!({ "input": texts });
        let mut last_err = None;

        for attempt in 0..=MAX_RETRIES {
            if attempt > 0 {
                let delay = Duration::from_secs(1 << (attempt - 1).min(5));
                tokio::time::sleep(delay).await;
            }

            let resp = self
                .client
                .post(self.url())
                .header("api-key", &self.api_key)
                .header("Content-Type", "application/json")
                .json(&body)
                .send()
                .await;

            match resp {
                Ok(response) => {
                    let status = response.status();

                    if status.is_success() {
                        let json: Value = response.json().await?;
                        return parse_embeddings_response(&json, texts.len());
                    }

                    if status.as_u16() == 429 || status.is_server_error() {
                        let text = response.text().await.unwrap_or_default();
                        last_err =
                            Some(anyhow!("Azure OpenAI error {}: {}", status, text));
                        continue;
                    }

                    let text = response.text().await.unwrap_or_default();
                    bail!("Azure OpenAI error {}: {}", status, text);
                }
                Err(e) => {
                    last_err = Some(e.into());
                    continue;
                }
            }
        }

        Err(last_err.unwrap_or_else(|| anyhow!("embedding failed after retries")))
    }
}

/// Extract `data[].embedding` arrays, reordered by `data[].index` so the
/// output matches the input order, and normalized to unit length.
fn parse_embeddings_response(json: &Value, expected: usize) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow!("invalid embeddings response: missing data array"))?;

    if data.len() != expected {
        bail!(
            "invalid embeddings response: expected {} vectors, got {}",
            expected,
            data.len()
        );
    }

    let mut ordered: Vec<Vec<f32>> = vec![Vec::new(); expected];
    for (position, item) in data.iter().enumerate() {
        let embedding = item
            .get("embedding")
            .and_then(|e| e.as_array())
            .ok_or_else(|| anyhow!("invalid embeddings response: missing embedding"))?;
        let vector: Vec<f32> = embedding
            .iter()
            .map(|v| v.as_f64().unwrap_or(0.0) as f32)
            .collect();

        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        if index >= expected {
            bail!("invalid embeddings response: index {} out of range", index);
        }
        ordered[index] = normalize_l2(vector);
    }

    Ok(ordered)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_all_connection_fields() {
        assert!(AzureEmbedder::new("", "k", "d", 1536).is_err());
        assert!(AzureEmbedder::new("https://x.openai.azure.com", "", "d", 1536).is_err());
        assert!(AzureEmbedder::new("https://x.openai.azure.com", "k", "", 1536).is_err());
        assert!(AzureEmbedder::new("https://x.openai.azure.com/", "k", "d", 1536).is_ok());
    }

    #[test]
    fn test_url_shape() {
        let embedder =
            AzureEmbedder::new("https://x.openai.azure.com/", "k", "embed-3", 1536).unwrap();
        assert_eq!(
            embedder.url(),
            format!(
                "https://x.openai.azure.com/openai/deployments/embed-3/embeddings?api-version={}",
                API_VERSION
            )
        );
    }

    #[test]
    fn test_parse_reorders_by_index() {
        let json = serde_json::json!({
            "data": [
                { "index": 1, "embedding": [0.0, 1.0] },
                { "index": 0, "embedding": [1.0, 0.0] },
            ]
        });
        let vectors = parse_embeddings_response(&json, 2).unwrap();
        assert_eq!(vectors[0], vec![1.0, 0.0]);
        assert_eq!(vectors[1], vec![0.0, 1.0]);
    }

    #[test]
    fn test_parse_normalizes() {
        let json = serde_json::json!({
            "data": [ { "index": 0, "embedding": [3.0, 4.0] } ]
        });
        let vectors = parse_embeddings_response(&json, 1).unwrap();
        let norm: f32 = vectors[0].iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_parse_count_mismatch_fails() {
        let json = serde_json::json!({ "data": [] });
        assert!(parse_embeddings_response(&json, 1).is_err());
    }
}
