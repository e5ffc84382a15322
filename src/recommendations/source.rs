use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use tracing::debug;

use super::types::RecommendationResponse;
use crate::error::{MeetError, Result};

/// Where recommendation lists come from
#[async_trait]
pub trait RecommendationSource: Send + Sync {
    async fn fetch(&self, session_id: &str) -> Result<RecommendationResponse>;
}

/// Fetches `GET {server_url}/recommendations/{session_id}`
pub struct HttpRecommendationSource {
    client: reqwest::Client,
    server_url: String,
}

impl HttpRecommendationSource {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), server_url)
    }

    pub fn with_client(client: reqwest::Client, server_url: impl Into<String>) -> Self {
        Self {
            client,
            server_url: server_url.into(),
        }
    }

    pub fn url_for(&self, session_id: &str) -> String {
        format!(
            "{}/recommendations/{}",
            self.server_url.trim_end_matches('/'),
            session_id
        )
    }
}

#[async_trait]
impl RecommendationSource for HttpRecommendationSource {
    async fn fetch(&self, session_id: &str) -> Result<RecommendationResponse> {
        let url = self.url_for(session_id);
        debug!("Fetching recommendations from {}", url);

        let response = self
            .client
            .get(&url)
            .header(CONTENT_TYPE, "application/json")
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(MeetError::Poll(format!(
                "HTTP error! Status: {}",
                status.as_u16()
            )));
        }

        Ok(response.json::<RecommendationResponse>().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_for_session() {
        let source = HttpRecommendationSource::new("http://localhost:8000/");
        assert_eq!(
            source.url_for("abc-123"),
            "http://localhost:8000/recommendations/abc-123"
        );
    }
}
