use async_trait::async_trait;
use url::Url;

use lagoon_sync::{Post, ResourceFetcher, ResourceId, SyncError};

/// Authoritative post reads over the REST API.
pub struct HttpFetcher {
    base: Url,
    token: String,
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(base_url: &str, token: &str) -> Result<Self, SyncError> {
        let base = Url::parse(base_url).map_err(|_| SyncError::InvalidUrl(base_url.into()))?;
        Ok(Self {
            base,
            token: token.to_string(),
            client: reqwest::Client::new(),
        })
    }
}

#[async_trait]
impl ResourceFetcher for HttpFetcher {
    async fn get_by_code(&self, id: &ResourceId) -> Result<Post, SyncError> {
        let url = self
            .base
            .join(&format!("api/social/posts/{id}"))
            .map_err(|err| SyncError::fetch(id, err))?;
        let mut request = self.client.get(url);
        if !self.token.is_empty() {
            request = request.bearer_auth(&self.token);
        }
        let response = request
            .send()
            .await
            .map_err(|err| SyncError::fetch(id, err))?;
        if !response.status().is_success() {
            return Err(SyncError::fetch(id, response.status()));
        }
        response
            .json::<Post>()
            .await
            .map_err(|err| SyncError::fetch(id, err))
    }
}
