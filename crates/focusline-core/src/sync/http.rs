//! REST implementation of [`RemoteCollection`].
//!
//! Endpoints, relative to the configured base URL:
//!
//! | Operation | Request |
//! |-----------|---------|
//! | list      | `GET {base}/{collection}?owner_id={owner}` |
//! | create    | `POST {base}/{collection}` |
//! | update    | `PATCH {base}/{collection}/{id}` |
//! | delete    | `DELETE {base}/{collection}/{id}` |
//!
//! Records travel flat, with `id` as a plain string.

use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response, StatusCode};
use serde::Deserialize;
use url::Url;

use super::remote::RemoteCollection;
use crate::error::RemoteError;
use crate::principal::PrincipalId;
use crate::record::{Entity, NewRecord, Record, RecordId, RemoteId};

/// Default per-request timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// A record as the remote store sends it.
#[derive(Deserialize)]
#[serde(bound = "E: Entity")]
struct WireRecord<E> {
    id: String,
    #[serde(default)]
    owner_id: Option<PrincipalId>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    #[serde(flatten)]
    fields: E,
}

impl<E: Entity> From<WireRecord<E>> for Record<E> {
    fn from(wire: WireRecord<E>) -> Self {
        Record {
            id: RecordId::Remote(RemoteId::new(wire.id)),
            owner_id: wire.owner_id,
            created_at: wire.created_at,
            updated_at: wire.updated_at,
            fields: wire.fields,
        }
    }
}

/// HTTP client for one remote collection.
pub struct HttpRemote<E> {
    client: reqwest::Client,
    base: Url,
    token: Option<String>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> HttpRemote<E> {
    /// Client for `E::COLLECTION` under `base_url`.
    ///
    /// # Errors
    /// Fails on a malformed base URL or if the HTTP client cannot be built.
    pub fn new(base_url: &str, timeout: Duration, token: Option<String>) -> Result<Self, RemoteError> {
        let base = Url::parse(base_url)?;
        if base.cannot_be_a_base() {
            return Err(RemoteError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase));
        }
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base,
            token,
            _entity: PhantomData,
        })
    }

    fn url(&self, id: Option<&RemoteId>) -> Result<Url, RemoteError> {
        let mut url = self.base.clone();
        {
            let mut segments = url
                .path_segments_mut()
                .map_err(|()| RemoteError::Url(url::ParseError::RelativeUrlWithCannotBeABaseBase))?;
            segments.pop_if_empty().push(E::COLLECTION);
            if let Some(id) = id {
                segments.push(id.as_str());
            }
        }
        Ok(url)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => request.bearer_auth(token),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await?;
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        tracing::debug!(collection = E::COLLECTION, %status, "remote request rejected");
        Err(match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => RemoteError::NotAuthenticated,
            StatusCode::NOT_FOUND => RemoteError::NotFound(body),
            StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => RemoteError::Validation(body),
            other => RemoteError::Status {
                status: other.as_u16(),
                body,
            },
        })
    }

    async fn decode_record(response: Response) -> Result<Record<E>, RemoteError> {
        let body = response.text().await?;
        let wire: WireRecord<E> = serde_json::from_str(&body)?;
        Ok(wire.into())
    }
}

#[async_trait]
impl<E: Entity> RemoteCollection<E> for HttpRemote<E> {
    async fn list(&self, owner: &PrincipalId) -> Result<Vec<Record<E>>, RemoteError> {
        let mut url = self.url(None)?;
        url.query_pairs_mut().append_pair("owner_id", owner.as_str());
        let response = self.send(self.client.get(url)).await?;
        let body = response.text().await?;
        let wire: Vec<WireRecord<E>> = serde_json::from_str(&body)?;
        Ok(wire.into_iter().map(Record::from).collect())
    }

    async fn create(&self, record: NewRecord<E>) -> Result<Record<E>, RemoteError> {
        let url = self.url(None)?;
        let response = self.send(self.client.post(url).json(&record)).await?;
        Self::decode_record(response).await
    }

    async fn update(&self, id: &RemoteId, patch: &E::Patch) -> Result<Record<E>, RemoteError> {
        let url = self.url(Some(id))?;
        let response = self.send(self.client.patch(url).json(patch)).await?;
        Self::decode_record(response).await
    }

    async fn delete(&self, id: &RemoteId) -> Result<(), RemoteError> {
        let url = self.url(Some(id))?;
        self.send(self.client.delete(url)).await?;
        Ok(())
    }
}
