use crate::error::RegistryError;
use crate::reference::ImageReference;
use crate::types::*;
use reqwest::header::{ACCEPT, AUTHORIZATION, HeaderMap, HeaderValue};
use reqwest::{Response, StatusCode};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::Mutex;

/// Minimal pull-only client for Docker/OCI registries. Handles the
/// anonymous bearer-token dance transparently and caches tokens per
/// repository.
pub struct RegistryClient {
    http: reqwest::Client,
    tokens: Mutex<HashMap<String, String>>,
}

impl RegistryClient {
    pub fn new() -> Result<Self, RegistryError> {
        let http = reqwest::Client::builder()
            .user_agent("cinder/0.1")
            .build()?;

        Ok(Self {
            http,
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Resolves a reference to its single-platform manifest for linux on the
    /// current architecture, following one level of manifest index.
    pub async fn resolve_manifest(
        &self,
        reference: &ImageReference,
    ) -> Result<ImageManifest, RegistryError> {
        let body = self.fetch_manifest_body(reference).await?;

        if let Ok(manifest) = serde_json::from_str::<ImageManifest>(&body)
            && !manifest.layers.is_empty()
        {
            return Ok(manifest);
        }

        let index: ManifestIndex = serde_json::from_str(&body)?;
        let arch = platform_arch();
        let entry = index
            .manifests
            .iter()
            .find(|m| {
                m.platform
                    .as_ref()
                    .is_some_and(|p| p.os == "linux" && p.architecture == arch)
            })
            .ok_or_else(|| {
                RegistryError::NotFound(format!("{}: no manifest for linux/{}", reference, arch))
            })?;

        let pinned = reference.with_digest(&entry.digest);
        let body = self.fetch_manifest_body(&pinned).await?;
        serde_json::from_str::<ImageManifest>(&body).map_err(|_| {
            RegistryError::UnsupportedMediaType("nested manifest index".to_string())
        })
    }

    /// Fetches the config blob and extracts the image's declared runtime
    /// metadata.
    pub async fn fetch_runtime_config(
        &self,
        reference: &ImageReference,
        config: &LayerDescriptor,
    ) -> Result<RuntimeConfig, RegistryError> {
        let bytes = self.fetch_blob(reference, &config.digest).await?;
        let blob: ConfigBlob = serde_json::from_slice(&bytes)?;
        Ok(blob.config.unwrap_or_default())
    }

    /// Downloads a layer blob and verifies its sha256 digest against the
    /// manifest's declared digest.
    pub async fn fetch_layer(
        &self,
        reference: &ImageReference,
        layer: &LayerDescriptor,
    ) -> Result<Vec<u8>, RegistryError> {
        let bytes = self.fetch_blob(reference, &layer.digest).await?;

        let actual = format!("sha256:{}", hex::encode(Sha256::digest(&bytes)));
        if layer.digest != actual {
            return Err(RegistryError::DigestMismatch {
                expected: layer.digest.clone(),
                actual,
            });
        }

        Ok(bytes)
    }

    async fn fetch_manifest_body(
        &self,
        reference: &ImageReference,
    ) -> Result<String, RegistryError> {
        let url = format!(
            "{}/v2/{}/manifests/{}",
            base_url(&reference.registry),
            reference.repository,
            reference.version()
        );
        tracing::debug!(%url, "fetching manifest");

        let accept = [
            MEDIA_TYPE_MANIFEST_V2,
            MEDIA_TYPE_MANIFEST_LIST,
            MEDIA_TYPE_OCI_MANIFEST,
            MEDIA_TYPE_OCI_INDEX,
        ]
        .join(", ");

        let response = self.get_authorized(&url, reference, &accept).await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(reference.to_string()));
        }
        let response = response.error_for_status()?;

        Ok(response.text().await?)
    }

    async fn fetch_blob(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = format!(
            "{}/v2/{}/blobs/{}",
            base_url(&reference.registry),
            reference.repository,
            digest
        );
        tracing::debug!(%digest, "fetching blob");

        let response = self
            .get_authorized(&url, reference, "application/octet-stream")
            .await?;
        if response.status() == StatusCode::NOT_FOUND {
            return Err(RegistryError::NotFound(digest.to_string()));
        }
        let response = response.error_for_status()?;

        Ok(response.bytes().await?.to_vec())
    }

    async fn get_authorized(
        &self,
        url: &str,
        reference: &ImageReference,
        accept: &str,
    ) -> Result<Response, RegistryError> {
        let response = self
            .get_with_headers(url, accept, self.cached_token(reference))
            .await?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = response
            .headers()
            .get("www-authenticate")
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        let token = self.acquire_token(reference, &challenge).await?;
        let response = self.get_with_headers(url, accept, Some(token)).await?;
        Ok(response)
    }

    async fn get_with_headers(
        &self,
        url: &str,
        accept: &str,
        token: Option<String>,
    ) -> Result<Response, RegistryError> {
        let mut headers = HeaderMap::new();
        if let Ok(value) = HeaderValue::from_str(accept) {
            headers.insert(ACCEPT, value);
        }
        if let Some(token) = token
            && let Ok(value) = HeaderValue::from_str(&format!("Bearer {}", token))
        {
            headers.insert(AUTHORIZATION, value);
        }

        Ok(self.http.get(url).headers(headers).send().await?)
    }

    fn cached_token(&self, reference: &ImageReference) -> Option<String> {
        self.tokens
            .lock()
            .ok()?
            .get(&reference.repository)
            .cloned()
    }

    async fn acquire_token(
        &self,
        reference: &ImageReference,
        challenge: &str,
    ) -> Result<String, RegistryError> {
        let realm = challenge_param(challenge, "realm").ok_or_else(|| {
            RegistryError::AuthFailed("www-authenticate without realm".to_string())
        })?;
        let scope = challenge_param(challenge, "scope")
            .unwrap_or_else(|| format!("repository:{}:pull", reference.repository));

        let mut request = self.http.get(&realm).query(&[("scope", scope)]);
        if let Some(service) = challenge_param(challenge, "service") {
            request = request.query(&[("service", service)]);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::AuthFailed(format!(
                "token endpoint returned {}",
                response.status()
            )));
        }

        let token_response: TokenResponse = response.json().await?;
        let token = token_response
            .bearer()
            .ok_or_else(|| RegistryError::AuthFailed("token endpoint returned no token".to_string()))?
            .to_string();

        if let Ok(mut tokens) = self.tokens.lock() {
            tokens.insert(reference.repository.clone(), token.clone());
        }

        Ok(token)
    }
}

fn base_url(registry: &str) -> String {
    if registry.starts_with("localhost") || registry.starts_with("127.0.0.1") {
        format!("http://{}", registry)
    } else {
        format!("https://{}", registry)
    }
}

fn platform_arch() -> &'static str {
    match std::env::consts::ARCH {
        "x86_64" => "amd64",
        "aarch64" => "arm64",
        other => other,
    }
}

fn challenge_param(challenge: &str, name: &str) -> Option<String> {
    let marker = format!("{}=\"", name);
    let start = challenge.find(&marker)? + marker.len();
    let end = challenge[start..].find('"')?;
    Some(challenge[start..start + end].to_string())
}
