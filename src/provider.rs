//! Remote embedding and rerank provider client.
//!
//! Two operations against an OpenAI-style HTTP API:
//! `embed(texts, model) -> vectors` and
//! `rerank(query, docs, model, k, instruction) -> (index, score)*`.
//! Failures surface as [`Error::Provider`]; callers decide whether to retry
//! or degrade (search falls back to vector-only ordering when rerank fails).

use serde::{Deserialize, Serialize};

use crate::config::ProviderConfig;
use crate::error::{Error, Result};

pub struct ProviderClient {
    http: reqwest::Client,
    config: ProviderConfig,
}

#[derive(Serialize)]
struct EmbedRequest<'a> {
    input: &'a [String],
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbedResponse {
    data: Vec<EmbedDatum>,
}

#[derive(Deserialize)]
struct EmbedDatum {
    embedding: Vec<f32>,
    index: usize,
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    query: &'a str,
    documents: &'a [String],
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    top_k: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instruction: Option<&'a str>,
}

#[derive(Deserialize)]
struct RerankResponse {
    data: Vec<RerankDatum>,
}

#[derive(Deserialize)]
struct RerankDatum {
    index: usize,
    relevance_score: f32,
}

/// One reranked document: position in the input list plus relevance.
#[derive(Debug, Clone, Copy)]
pub struct RerankResult {
    pub original_index: usize,
    pub relevance_score: f32,
}

impl ProviderClient {
    pub fn new(config: ProviderConfig) -> Self {
        let http = reqwest::Client::builder()
            .connect_timeout(std::time::Duration::from_secs(10))
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .expect("building provider HTTP client");
        Self { http, config }
    }

    pub fn model(&self) -> &str {
        &self.config.model
    }

    pub fn rerank_model(&self) -> &str {
        &self.config.rerank_model
    }

    fn auth(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.config.api_key {
            Some(key) => req.bearer_auth(key),
            None => req,
        }
    }

    /// Embeds a batch of texts, returning vectors in input order.
    pub async fn embed(&self, texts: &[String], model: &str) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::InvalidInput("no texts provided".to_string()));
        }

        let url = format!("{}/embeddings", self.config.base_url);
        let response = self
            .auth(self.http.post(&url))
            .json(&EmbedRequest { input: texts, model })
            .send()
            .await
            .map_err(|e| Error::Provider(format!("embed request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("embed API returned {status}: {body}")));
        }

        let parsed: EmbedResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("embed response: {e}")))?;

        let mut embeddings = vec![Vec::new(); texts.len()];
        for datum in parsed.data {
            if datum.index >= embeddings.len() {
                return Err(Error::Provider(format!(
                    "embed API returned invalid index {}",
                    datum.index
                )));
            }
            embeddings[datum.index] = datum.embedding;
        }
        Ok(embeddings)
    }

    /// Embeds a single text with the configured model.
    pub async fn embed_single(&self, text: &str, model: &str) -> Result<Vec<f32>> {
        let mut results = self.embed(&[text.to_string()], model).await?;
        if results.is_empty() {
            return Err(Error::Provider("no embeddings returned".to_string()));
        }
        Ok(results.remove(0))
    }

    /// Reranks documents against a query; results reference input positions.
    pub async fn rerank(
        &self,
        query: &str,
        documents: &[String],
        model: &str,
        top_k: usize,
        instruction: Option<&str>,
    ) -> Result<Vec<RerankResult>> {
        if documents.is_empty() {
            return Err(Error::InvalidInput("no documents provided".to_string()));
        }

        let url = format!("{}/rerank", self.config.base_url);
        let response = self
            .auth(self.http.post(&url))
            .json(&RerankRequest {
                query,
                documents,
                model,
                top_k: (top_k > 0).then_some(top_k),
                instruction: instruction.filter(|s| !s.is_empty()),
            })
            .send()
            .await
            .map_err(|e| Error::Provider(format!("rerank request: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::Provider(format!("rerank API returned {status}: {body}")));
        }

        let parsed: RerankResponse = response
            .json()
            .await
            .map_err(|e| Error::Provider(format!("rerank response: {e}")))?;

        Ok(parsed
            .data
            .into_iter()
            .map(|d| RerankResult {
                original_index: d.index,
                relevance_score: d.relevance_score,
            })
            .collect())
    }

    /// Embeds all texts in batches with a delay between requests, reporting
    /// progress after each batch. Any batch failure aborts the whole call.
    pub async fn embed_all(
        &self,
        texts: &[String],
        model: &str,
        mut progress: impl FnMut(usize, usize),
    ) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Err(Error::InvalidInput("no texts provided".to_string()));
        }

        let batch_size = self.config.batch_size.max(1);
        let delay = std::time::Duration::from_millis(self.config.batch_delay_ms);

        let mut all = Vec::with_capacity(texts.len());
        let mut offset = 0;
        while offset < texts.len() {
            let end = (offset + batch_size).min(texts.len());
            let embeddings = self
                .embed(&texts[offset..end], model)
                .await
                .map_err(|e| Error::Provider(format!("embedding batch at offset {offset}: {e}")))?;
            all.extend(embeddings);
            progress(end, texts.len());

            offset = end;
            if offset < texts.len() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
        }
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn batch_boundaries_cover_all_texts() {
        // Pure arithmetic check of the batching loop shape.
        let texts: Vec<String> = (0..103).map(|i| format!("text {i}")).collect();
        let batch_size = 50;
        let mut seen = 0;
        let mut offset = 0;
        while offset < texts.len() {
            let end = (offset + batch_size).min(texts.len());
            seen += end - offset;
            offset = end;
        }
        assert_eq!(seen, texts.len());
    }

    #[tokio::test]
    async fn embed_rejects_empty_input() {
        let client = ProviderClient::new(ProviderConfig::default());
        assert!(client.embed(&[], "m").await.is_err());
        assert!(client.rerank("q", &[], "m", 5, None).await.is_err());
    }
}
