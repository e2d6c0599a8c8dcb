//! Docker Registry v2 client
//!
//! Implements the pull side of the distribution API: manifest lookup
//! (following manifest lists to the linux/amd64 image) and blob download.
//! Anonymous access, basic auth from a pull secret and the bearer token
//! exchange advertised by `WWW-Authenticate` are supported.

use crate::error::RegistryError;
use crate::layer;
use crate::models::{DockerConfig, ImageReference, Manifest};
use crate::registry_trait::RegistryClientTrait;
use base64::Engine;
use regex::Regex;
use reqwest::header::{ACCEPT, AUTHORIZATION, WWW_AUTHENTICATE};
use reqwest::{Client, Response, StatusCode};
use std::collections::HashMap;
use std::sync::LazyLock;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

const MANIFEST_ACCEPT: &str = "application/vnd.docker.distribution.manifest.v2+json, \
application/vnd.docker.distribution.manifest.list.v2+json, \
application/vnd.oci.image.manifest.v1+json, \
application/vnd.oci.image.index.v1+json";

static AUTH_PARAM: LazyLock<Option<Regex>> =
    LazyLock::new(|| Regex::new(r#"(\w+)="([^"]*)""#).ok());

/// Container registry client
pub struct RegistryClient {
    client: Client,
    insecure: bool,
    credentials: HashMap<String, String>,
    tokens: Mutex<HashMap<String, String>>,
}

impl std::fmt::Debug for RegistryClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RegistryClient")
            .field("insecure", &self.insecure)
            .field("registries", &self.credentials.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Challenge parameters of a `WWW-Authenticate` header
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthChallenge {
    /// `Bearer` or `Basic`
    pub scheme: String,
    /// Token endpoint
    pub realm: String,
    /// Service name passed to the token endpoint
    pub service: Option<String>,
    /// Requested scope
    pub scope: Option<String>,
}

impl AuthChallenge {
    /// Parses `Bearer realm="...",service="...",scope="..."`
    pub fn parse(header: &str) -> Option<Self> {
        let (scheme, params) = header.trim().split_once(' ').unwrap_or((header.trim(), ""));
        let mut values: HashMap<String, String> = HashMap::new();
        if let Some(re) = AUTH_PARAM.as_ref() {
            for cap in re.captures_iter(params) {
                values.insert(cap[1].to_lowercase(), cap[2].to_string());
            }
        }
        Some(Self {
            scheme: scheme.to_string(),
            realm: values.remove("realm").unwrap_or_default(),
            service: values.remove("service"),
            scope: values.remove("scope"),
        })
    }
}

impl RegistryClient {
    /// Create a new registry client
    ///
    /// # Arguments
    /// * `insecure` - talk plain HTTP and skip TLS verification
    pub fn new(insecure: bool) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(300))
            .danger_accept_invalid_certs(insecure)
            .build()?;

        Ok(Self {
            client,
            insecure,
            credentials: HashMap::new(),
            tokens: Mutex::new(HashMap::new()),
        })
    }

    /// Adds the registry credentials of a `.dockerconfigjson` pull secret
    pub fn with_pull_secret(mut self, docker_config_json: &[u8]) -> Result<Self, RegistryError> {
        let config: DockerConfig = serde_json::from_slice(docker_config_json)?;
        for (host, auth) in config.auths {
            if !auth.auth.is_empty() {
                let host = host
                    .trim_start_matches("https://")
                    .trim_start_matches("http://")
                    .trim_end_matches('/')
                    .to_string();
                self.credentials.insert(host, auth.auth);
            }
        }
        Ok(self)
    }

    fn base_url(&self, reference: &ImageReference) -> String {
        let scheme = if self.insecure { "http" } else { "https" };
        format!("{}://{}/v2/{}", scheme, reference.registry, reference.repository)
    }

    async fn fetch_token(
        &self,
        registry: &str,
        challenge: &AuthChallenge,
    ) -> Result<String, RegistryError> {
        let mut request = self.client.get(&challenge.realm);
        let mut query = Vec::new();
        if let Some(service) = &challenge.service {
            query.push(("service", service.as_str()));
        }
        if let Some(scope) = &challenge.scope {
            query.push(("scope", scope.as_str()));
        }
        request = request.query(&query);
        if let Some(basic) = self.credentials.get(registry) {
            request = request.header(AUTHORIZATION, format!("Basic {}", basic));
        }

        debug!("Requesting registry token from {}", challenge.realm);
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(RegistryError::Authentication(format!(
                "token request to {} failed: {}",
                challenge.realm,
                response.status()
            )));
        }
        let body: serde_json::Value = response.json().await?;
        body.get("token")
            .or_else(|| body.get("access_token"))
            .and_then(|t| t.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                RegistryError::Authentication(format!("no token returned by {}", challenge.realm))
            })
    }

    /// GET with the registry's auth flow; retries once after a 401 challenge
    async fn get(
        &self,
        reference: &ImageReference,
        url: &str,
        accept: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let cached = self.tokens.lock().await.get(&reference.registry).cloned();
        let response = self.send(url, accept, cached.as_deref()).await?;
        if response.status() != StatusCode::UNAUTHORIZED {
            return check(response, url);
        }

        let challenge = response
            .headers()
            .get(WWW_AUTHENTICATE)
            .and_then(|h| h.to_str().ok())
            .and_then(AuthChallenge::parse)
            .ok_or_else(|| {
                RegistryError::Authentication(format!("{} rejected the request", reference.registry))
            })?;

        let authorization = if challenge.scheme.eq_ignore_ascii_case("bearer") {
            let token = self.fetch_token(&reference.registry, &challenge).await?;
            self.tokens
                .lock()
                .await
                .insert(reference.registry.clone(), token.clone());
            format!("Bearer {}", token)
        } else {
            let basic = self.credentials.get(&reference.registry).ok_or_else(|| {
                RegistryError::Authentication(format!(
                    "no credentials for {}",
                    reference.registry
                ))
            })?;
            format!("Basic {}", basic)
        };

        let mut request = self.client.get(url).header(AUTHORIZATION, authorization);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        check(request.send().await?, url)
    }

    async fn send(
        &self,
        url: &str,
        accept: Option<&str>,
        token: Option<&str>,
    ) -> Result<Response, RegistryError> {
        let mut request = self.client.get(url);
        if let Some(accept) = accept {
            request = request.header(ACCEPT, accept);
        }
        if let Some(token) = token {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token));
        }
        Ok(request.send().await?)
    }

    /// Image manifest, resolving manifest lists to the linux/amd64 image
    pub async fn manifest(&self, reference: &ImageReference) -> Result<Manifest, RegistryError> {
        let url = format!("{}/manifests/{}", self.base_url(reference), reference.reference);
        let manifest: Manifest = self.get(reference, &url, Some(MANIFEST_ACCEPT)).await?.json().await?;
        if !manifest.is_index() {
            return Ok(manifest);
        }

        let entry = manifest.platform_manifest().ok_or_else(|| {
            RegistryError::NotFound(format!("{} lists no platform manifests", reference))
        })?;
        debug!("Following manifest list of {} to {}", reference, entry.digest);
        let url = format!("{}/manifests/{}", self.base_url(reference), entry.digest);
        Ok(self.get(reference, &url, Some(MANIFEST_ACCEPT)).await?.json().await?)
    }

    /// Downloads a blob
    pub async fn blob(
        &self,
        reference: &ImageReference,
        digest: &str,
    ) -> Result<Vec<u8>, RegistryError> {
        let url = format!("{}/blobs/{}", self.base_url(reference), digest);
        debug!("Downloading blob {} of {}", digest, reference);
        Ok(self.get(reference, &url, None).await?.bytes().await?.to_vec())
    }
}

fn check(response: Response, url: &str) -> Result<Response, RegistryError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else if status == StatusCode::NOT_FOUND {
        Err(RegistryError::NotFound(url.to_string()))
    } else if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
        Err(RegistryError::Authentication(format!("{}: {}", url, status)))
    } else {
        Err(RegistryError::Api(format!("{}: {}", url, status)))
    }
}

/// base64 `user:password` as stored in pull secrets
pub fn basic_auth(user: &str, password: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", user, password))
}

#[async_trait::async_trait]
impl RegistryClientTrait for RegistryClient {
    async fn layers(&self, image: &str) -> Result<Vec<String>, RegistryError> {
        let reference = ImageReference::parse(image)?;
        let manifest = self.manifest(&reference).await?;
        Ok(manifest.layers.into_iter().map(|l| l.digest).collect())
    }

    async fn extract_file(
        &self,
        image: &str,
        layer_digest: &str,
        path: &str,
    ) -> Result<Option<Vec<u8>>, RegistryError> {
        let reference = ImageReference::parse(image)?;
        let blob = self.blob(&reference, layer_digest).await?;
        layer::find_file(&blob, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bearer_challenge() {
        let challenge = AuthChallenge::parse(
            r#"Bearer realm="https://quay.io/v2/auth",service="quay.io",scope="repository:openshift/release:pull""#,
        )
        .expect("parsable");
        assert_eq!(challenge.scheme, "Bearer");
        assert_eq!(challenge.realm, "https://quay.io/v2/auth");
        assert_eq!(challenge.service.as_deref(), Some("quay.io"));
        assert_eq!(challenge.scope.as_deref(), Some("repository:openshift/release:pull"));
    }

    #[test]
    fn test_pull_secret_credentials() {
        let secret = serde_json::json!({
            "auths": {"https://quay.io/": {"auth": basic_auth("user", "pass")}}
        });
        let client = RegistryClient::new(false)
            .expect("client")
            .with_pull_secret(secret.to_string().as_bytes())
            .expect("valid secret");
        assert_eq!(client.credentials.get("quay.io"), Some(&basic_auth("user", "pass")));
    }
}
