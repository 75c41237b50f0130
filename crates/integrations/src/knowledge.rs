//! Knowledge retrieval
//!
//! Best effort: call start never waits longer than the configured timeout,
//! and any failure yields zero snippets.

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use voice_qualifier_core::KnowledgeSnippet;

use crate::{check_response, IntegrationError};

#[async_trait]
pub trait KnowledgeRetriever: Send + Sync {
    /// Up to `top_k` ranked snippets about `topic` for `tenant`
    async fn search(
        &self,
        topic: &str,
        tenant: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<KnowledgeSnippet>, IntegrationError>;
}

/// Search bounded by `timeout`; errors and timeouts give an empty list
pub async fn retrieve_or_empty(
    retriever: &dyn KnowledgeRetriever,
    topic: &str,
    tenant: Option<&str>,
    top_k: usize,
    timeout: Duration,
) -> Vec<KnowledgeSnippet> {
    if topic.trim().is_empty() {
        return Vec::new();
    }
    match tokio::time::timeout(timeout, retriever.search(topic, tenant, top_k)).await {
        Ok(Ok(mut snippets)) => {
            snippets.truncate(top_k);
            tracing::debug!(topic = %topic, count = snippets.len(), "Knowledge loaded");
            snippets
        }
        Ok(Err(e)) => {
            tracing::warn!(topic = %topic, error = %e, "Knowledge retrieval failed, continuing without");
            Vec::new()
        }
        Err(_) => {
            tracing::warn!(topic = %topic, timeout_ms = timeout.as_millis() as u64, "Knowledge retrieval timed out");
            Vec::new()
        }
    }
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<KnowledgeSnippet>,
}

/// Retrieval service speaking `POST {query, tenant, top_k}`
pub struct HttpKnowledgeRetriever {
    client: Client,
    endpoint: String,
}

impl HttpKnowledgeRetriever {
    pub fn new(endpoint: impl Into<String>) -> Result<Self, IntegrationError> {
        let client = Client::builder()
            .build()
            .map_err(|e| IntegrationError::Internal(e.to_string()))?;
        Ok(Self {
            client,
            endpoint: endpoint.into(),
        })
    }
}

#[async_trait]
impl KnowledgeRetriever for HttpKnowledgeRetriever {
    async fn search(
        &self,
        topic: &str,
        tenant: Option<&str>,
        top_k: usize,
    ) -> Result<Vec<KnowledgeSnippet>, IntegrationError> {
        let response = self
            .client
            .post(&self.endpoint)
            .json(&json!({ "query": topic, "tenant": tenant, "top_k": top_k }))
            .send()
            .await?;
        let body: SearchResponse = check_response(response)
            .await?
            .json()
            .await
            .map_err(|e| IntegrationError::Internal(format!("invalid search response: {}", e)))?;
        Ok(body.results)
    }
}

/// Retrieval disabled
#[derive(Debug, Default)]
pub struct NoKnowledge;

#[async_trait]
impl KnowledgeRetriever for NoKnowledge {
    async fn search(
        &self,
        _topic: &str,
        _tenant: Option<&str>,
        _top_k: usize,
    ) -> Result<Vec<KnowledgeSnippet>, IntegrationError> {
        Ok(Vec::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Fixed(Vec<KnowledgeSnippet>);

    #[async_trait]
    impl KnowledgeRetriever for Fixed {
        async fn search(
            &self,
            _topic: &str,
            _tenant: Option<&str>,
            _top_k: usize,
        ) -> Result<Vec<KnowledgeSnippet>, IntegrationError> {
            Ok(self.0.clone())
        }
    }

    struct Slow;

    #[async_trait]
    impl KnowledgeRetriever for Slow {
        async fn search(
            &self,
            _topic: &str,
            _tenant: Option<&str>,
            _top_k: usize,
        ) -> Result<Vec<KnowledgeSnippet>, IntegrationError> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(vec![KnowledgeSnippet::new("late", "late")])
        }
    }

    struct Broken;

    #[async_trait]
    impl KnowledgeRetriever for Broken {
        async fn search(
            &self,
            _topic: &str,
            _tenant: Option<&str>,
            _top_k: usize,
        ) -> Result<Vec<KnowledgeSnippet>, IntegrationError> {
            Err(IntegrationError::ConnectionFailed("refused".into()))
        }
    }

    #[tokio::test]
    async fn test_truncates_to_top_k() {
        let retriever = Fixed(
            (0..5)
                .map(|i| KnowledgeSnippet::new(format!("t{}", i), "c"))
                .collect(),
        );
        let snippets =
            retrieve_or_empty(&retriever, "MBA", None, 3, Duration::from_secs(1)).await;
        assert_eq!(snippets.len(), 3);
        assert_eq!(snippets[0].title, "t0");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_yields_empty() {
        let snippets =
            retrieve_or_empty(&Slow, "MBA", Some("1"), 3, Duration::from_millis(3000)).await;
        assert!(snippets.is_empty());
    }

    #[tokio::test]
    async fn test_error_or_blank_topic_yields_empty() {
        assert!(retrieve_or_empty(&Broken, "MBA", None, 3, Duration::from_secs(1))
            .await
            .is_empty());
        let retriever = Fixed(vec![KnowledgeSnippet::new("t", "c")]);
        assert!(retrieve_or_empty(&retriever, "  ", None, 3, Duration::from_secs(1))
            .await
            .is_empty());
        assert!(NoKnowledge.search("MBA", None, 3).await.unwrap().is_empty());
    }
}
