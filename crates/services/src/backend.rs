//! Hosted backend-as-a-service gateway (PostgREST-style REST + object storage).

use std::env;

use async_trait::async_trait;
use habit_core::model::{
    ChallengeId, ChallengeRecord, CompletedChallengeRecord, MediaRef, PhotoSlot,
};
use reqwest::{Client, RequestBuilder, StatusCode, Url};
use serde::Serialize;
use serde::de::DeserializeOwned;
use storage::gateway::{ChallengeGateway, GatewayError, PhotoStore, PhotoUpload};

use crate::error::BackendConfigError;

const PHOTO_BUCKET: &str = "challenge-photos";

#[derive(Clone, Debug)]
pub struct BackendConfig {
    pub base_url: Url,
    pub api_key: String,
    /// Signed-in user's session token. Falls back to the anon key.
    pub access_token: Option<String>,
}

impl BackendConfig {
    /// Read `CHALLENGES_BACKEND_URL`, `CHALLENGES_BACKEND_KEY` and the
    /// optional `CHALLENGES_ACCESS_TOKEN`.
    ///
    /// # Errors
    ///
    /// Returns `BackendConfigError` if a required variable is missing or the
    /// URL does not parse.
    pub fn from_env() -> Result<Self, BackendConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Same as [`BackendConfig::from_env`] with an injectable variable source.
    ///
    /// # Errors
    ///
    /// Returns `BackendConfigError` if a required variable is missing or the
    /// URL does not parse.
    pub fn from_lookup(
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, BackendConfigError> {
        let non_blank = |key: &'static str| lookup(key).filter(|v| !v.trim().is_empty());

        let raw_url = non_blank("CHALLENGES_BACKEND_URL")
            .ok_or(BackendConfigError::MissingVar("CHALLENGES_BACKEND_URL"))?;
        let api_key = non_blank("CHALLENGES_BACKEND_KEY")
            .ok_or(BackendConfigError::MissingVar("CHALLENGES_BACKEND_KEY"))?;
        let access_token = non_blank("CHALLENGES_ACCESS_TOKEN");

        Ok(Self {
            base_url: parse_base_url(&raw_url)?,
            api_key,
            access_token,
        })
    }
}

fn parse_base_url(raw: &str) -> Result<Url, BackendConfigError> {
    let mut normalized = raw.trim().to_string();
    if !normalized.ends_with('/') {
        normalized.push('/');
    }
    let url = Url::parse(&normalized).map_err(|_| BackendConfigError::InvalidUrl(raw.into()))?;
    if url.cannot_be_a_base() {
        return Err(BackendConfigError::InvalidUrl(raw.into()));
    }
    Ok(url)
}

/// `ChallengeGateway` over the hosted backend's HTTP API.
///
/// Tables/views: `challenges`, `completed_challenges`; RPC:
/// `skip_after_photo`; object storage bucket `challenge-photos`.
#[derive(Clone)]
pub struct RestGateway {
    client: Client,
    config: BackendConfig,
}

impl RestGateway {
    #[must_use]
    pub fn new(config: BackendConfig) -> Self {
        Self {
            client: Client::new(),
            config,
        }
    }

    /// Build from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `BackendConfigError` if configuration is incomplete.
    pub fn from_env() -> Result<Self, BackendConfigError> {
        Ok(Self::new(BackendConfig::from_env()?))
    }

    fn endpoint(&self, segments: &[&str]) -> Result<Url, GatewayError> {
        build_url(&self.config.base_url, segments)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        let token = self
            .config
            .access_token
            .as_deref()
            .unwrap_or(&self.config.api_key);
        request.header("apikey", &self.config.api_key).bearer_auth(token)
    }

    async fn get_rows<T: DeserializeOwned>(&self, table: &str) -> Result<Vec<T>, GatewayError> {
        let url = self.endpoint(&["rest", "v1", table])?;
        let response = self
            .authorized(self.client.get(url).query(&[("select", "*")]))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response.status())?;
        response.json().await.map_err(transport_error)
    }

    async fn patch_challenge<B: Serialize + Sync>(
        &self,
        id: &ChallengeId,
        body: &B,
    ) -> Result<(), GatewayError> {
        let url = self.endpoint(&["rest", "v1", "challenges"])?;
        let response = self
            .authorized(
                self.client
                    .patch(url)
                    .query(&[("id", format!("eq.{id}"))])
                    .header("Prefer", "return=representation")
                    .json(body),
            )
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response.status())?;

        let updated: Vec<serde_json::Value> = response.json().await.map_err(transport_error)?;
        if updated.is_empty() {
            return Err(GatewayError::NotFound);
        }
        Ok(())
    }
}

#[derive(Serialize)]
struct SkipAfterPhotoArgs<'a> {
    challenge_id: &'a str,
}

#[derive(Serialize)]
struct BeforePhotoPatch<'a> {
    before_photo: &'a str,
}

#[derive(Serialize)]
struct AfterPhotoPatch<'a> {
    after_photo: &'a str,
}

#[async_trait]
impl ChallengeGateway for RestGateway {
    async fn fetch_challenges(&self) -> Result<Vec<ChallengeRecord>, GatewayError> {
        self.get_rows("challenges").await
    }

    async fn fetch_completed_challenges(
        &self,
    ) -> Result<Vec<CompletedChallengeRecord>, GatewayError> {
        self.get_rows("completed_challenges").await
    }

    async fn skip_after_photo(&self, id: &ChallengeId) -> Result<(), GatewayError> {
        let url = self.endpoint(&["rest", "v1", "rpc", "skip_after_photo"])?;
        let response = self
            .authorized(self.client.post(url).json(&SkipAfterPhotoArgs {
                challenge_id: id.as_str(),
            }))
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response.status())
    }

    async fn record_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        media: &MediaRef,
    ) -> Result<(), GatewayError> {
        match slot {
            PhotoSlot::Before => {
                self.patch_challenge(
                    id,
                    &BeforePhotoPatch {
                        before_photo: media.as_str(),
                    },
                )
                .await
            }
            PhotoSlot::After => {
                self.patch_challenge(
                    id,
                    &AfterPhotoPatch {
                        after_photo: media.as_str(),
                    },
                )
                .await
            }
        }
    }
}

#[async_trait]
impl PhotoStore for RestGateway {
    async fn upload_photo(
        &self,
        id: &ChallengeId,
        slot: PhotoSlot,
        photo: &PhotoUpload,
    ) -> Result<MediaRef, GatewayError> {
        let key = photo_object_key(id, slot, photo);
        let mut segments = vec!["storage", "v1", "object", PHOTO_BUCKET];
        segments.extend(key.split('/'));
        let url = self.endpoint(&segments)?;

        let response = self
            .authorized(
                self.client
                    .post(url)
                    .header(reqwest::header::CONTENT_TYPE, photo.content_type.as_str())
                    .body(photo.bytes.clone()),
            )
            .send()
            .await
            .map_err(transport_error)?;
        check_status(response.status())?;

        MediaRef::new(key).map_err(|e| GatewayError::Serialization(e.to_string()))
    }
}

fn photo_object_key(id: &ChallengeId, slot: PhotoSlot, photo: &PhotoUpload) -> String {
    format!(
        "{id}/{slot}-{}.{}",
        ChallengeId::generate(),
        photo.extension()
    )
}

fn build_url(base: &Url, segments: &[&str]) -> Result<Url, GatewayError> {
    let mut url = base.clone();
    {
        let mut path = url
            .path_segments_mut()
            .map_err(|()| GatewayError::Network(format!("invalid backend url: {base}")))?;
        path.pop_if_empty();
        path.extend(segments);
    }
    Ok(url)
}

fn transport_error(err: reqwest::Error) -> GatewayError {
    if err.is_decode() {
        GatewayError::Serialization(err.to_string())
    } else {
        GatewayError::Network(err.to_string())
    }
}

/// Map an HTTP status onto the gateway error taxonomy.
fn check_status(status: StatusCode) -> Result<(), GatewayError> {
    if status.is_success() {
        return Ok(());
    }
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
            Err(GatewayError::Auth(format!("backend rejected session ({status})")))
        }
        StatusCode::NOT_FOUND => Err(GatewayError::NotFound),
        _ => Err(GatewayError::Network(format!("backend returned {status}"))),
    }
}
