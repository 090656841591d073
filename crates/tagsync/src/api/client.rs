use std::sync::Arc;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde_json::json;

use crate::error::{SyncError, SyncResult};
use crate::query::CompiledQuery;
use crate::types::{
    select_param, ApiImage, ApiTag, ApiTagMappings, ApiUser, ImageId, SearchSelect, TagId,
};

use super::transport::{ApiRequest, RawResponse, Transport};

/// Typed endpoints over a [`Transport`].
///
/// Status handling: 2xx succeeds, 401 is [`SyncError::NotAuthenticated`],
/// 502 is [`SyncError::ServiceDown`], anything else is
/// [`SyncError::Http`] with the response text.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
}

impl ApiClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    async fn send(&self, request: ApiRequest) -> SyncResult<RawResponse> {
        let response = self.transport.fetch(request).await?;
        check_status(response)
    }

    async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> SyncResult<T> {
        let response = self.send(request).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    /// Like `send_json`, but a 404 means the entity does not exist.
    async fn send_optional<T: DeserializeOwned>(&self, request: ApiRequest) -> SyncResult<Option<T>> {
        match self.send_json(request).await {
            Ok(value) => Ok(Some(value)),
            Err(SyncError::Http { status: 404, .. }) => Ok(None),
            Err(error) => Err(error),
        }
    }

    /// Runs a search and returns the undecoded binary response body.
    pub async fn search(&self, query: &CompiledQuery, select: &[SearchSelect]) -> SyncResult<Bytes> {
        let mut request = ApiRequest::get("/search")
            .with_query("query", query.to_query_text())
            .with_query("select", select_param(select));
        if let Some(order_by) = query.order_by {
            request = request.with_query("order_by", order_by.as_str());
        }
        Ok(self.send(request).await?.body)
    }

    pub async fn image_by_id(&self, id: ImageId) -> SyncResult<Option<ApiImage>> {
        self.send_optional(ApiRequest::get(format!("/images/{id}/metadata")))
            .await
    }

    pub async fn image_by_hash(&self, hash: &str) -> SyncResult<Option<ApiImage>> {
        let path = format!("/images/hash/{}/metadata", urlencoding::encode(hash));
        self.send_optional(ApiRequest::get(path)).await
    }

    pub async fn add_tag(&self, image_id: ImageId, tag_id: TagId) -> SyncResult<()> {
        self.send(ApiRequest::post(format!("/images/{image_id}/tags/{tag_id}")))
            .await
            .map(drop)
    }

    pub async fn remove_tag(&self, image_id: ImageId, tag_id: TagId) -> SyncResult<()> {
        self.send(ApiRequest::delete(format!("/images/{image_id}/tags/{tag_id}")))
            .await
            .map(drop)
    }

    pub async fn add_attribute(
        &self,
        image_id: ImageId,
        key: &str,
        value: &str,
        singular: bool,
    ) -> SyncResult<()> {
        let request = ApiRequest::post(format!("/images/{image_id}/attributes"))
            .with_json(json!({ "key": key, "value": value, "singular": singular }));
        self.send(request).await.map(drop)
    }

    pub async fn remove_attribute(&self, image_id: ImageId, key: &str, value: &str) -> SyncResult<()> {
        let request = ApiRequest::delete(format!("/images/{image_id}/attributes"))
            .with_json(json!({ "key": key, "value": value }));
        self.send(request).await.map(drop)
    }

    pub async fn tags(&self) -> SyncResult<Vec<ApiTag>> {
        self.send_json(ApiRequest::get("/tags")).await
    }

    pub async fn create_tag(&self, name: &str) -> SyncResult<()> {
        let request = ApiRequest::post("/tags").with_json(json!({ "name": name }));
        self.send(request).await.map(drop)
    }

    pub async fn tag_by_name(&self, name: &str) -> SyncResult<Option<ApiTag>> {
        let path = format!("/tags/by-name/{}", urlencoding::encode(name));
        self.send_optional(ApiRequest::get(path)).await
    }

    pub async fn tag_mappings(&self) -> SyncResult<ApiTagMappings> {
        self.send_json(ApiRequest::get("/tag_mappings")).await
    }

    pub async fn current_user(&self) -> SyncResult<ApiUser> {
        self.send_json(ApiRequest::get("/users/me")).await
    }
}

fn check_status(response: RawResponse) -> SyncResult<RawResponse> {
    match response.status {
        _ if response.is_success() => Ok(response),
        401 => Err(SyncError::NotAuthenticated),
        502 => Err(SyncError::ServiceDown),
        status => Err(SyncError::Http {
            status,
            body: response.text(),
        }),
    }
}
