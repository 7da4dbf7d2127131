//! Minimal Docker Registry HTTP API v2 client
//!
//! Resolves the manifest digest for an `(repo, tag)` pair without pulling
//! the image, following the same "typed client + retry-the-transient-stuff"
//! shape as `api::client::HttpClient`, scaled down to the one call the
//! Image Update Engine needs.

use std::time::Duration;

use reqwest::Client;
use serde::Deserialize;
use thiserror::Error;

const DEFAULT_REGISTRY_HOST: &str = "registry-1.docker.io";
const DOCKER_HUB_AUTH_URL: &str = "https://auth.docker.io/token";

#[derive(Debug, Error)]
pub enum RegistryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("registry did not return a content digest for {0}")]
    NoDigest(String),

    #[error("authentication with registry failed: {0}")]
    Auth(String),
}

pub type RegistryResult<T> = Result<T, RegistryError>;

/// A parsed `repo:tag` or `repo@digest` reference, split into the registry
/// host it resolves against and the path/tag used in the v2 API.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageRef {
    pub registry_host: String,
    pub repository: String,
    pub tag: String,
}

impl ImageRef {
    /// Parse `nginx`, `library/nginx:1.27`, `ghcr.io/org/app:latest`, etc.
    /// Images with no explicit registry default to Docker Hub and get the
    /// implicit `library/` namespace the same way the Docker CLI does.
    pub fn parse(image: &str) -> Self {
        let (reference, tag) = match image.rsplit_once(':') {
            // A colon after the last '/' is a tag; one before it (a port) is not.
            Some((repo, tag)) if !tag.contains('/') => (repo.to_string(), tag.to_string()),
            _ => (image.to_string(), "latest".to_string()),
        };

        let mut parts: Vec<&str> = reference.splitn(2, '/').collect();
        let looks_like_host = parts[0].contains('.') || parts[0].contains(':') || parts[0] == "localhost";

        if parts.len() == 2 && looks_like_host {
            let registry_host = parts[0].to_string();
            let repository = parts[1].to_string();
            return Self { registry_host, repository, tag };
        }

        let repository = if parts.len() == 1 {
            format!("library/{}", parts.remove(0))
        } else {
            reference
        };

        Self { registry_host: DEFAULT_REGISTRY_HOST.to_string(), repository, tag }
    }

    pub fn is_docker_hub(&self) -> bool {
        self.registry_host == DEFAULT_REGISTRY_HOST
    }
}

/// Tags considered "stable" — an update that changes the digest under one
/// of these is reported as `UpdateType::Digest` rather than `Tag`, since the
/// tag itself carries no version information to compare.
pub fn is_stable_tag(tag: &str) -> bool {
    if tag == "latest" || tag == "stable" {
        return true;
    }
    semver::Version::parse(tag.trim_start_matches('v')).is_ok()
        || semver::VersionReq::parse(tag.trim_start_matches('v')).is_ok()
}

pub struct RegistryClient {
    client: Client,
}

impl RegistryClient {
    pub fn new() -> Self {
        Self {
            client: Client::builder().timeout(Duration::from_secs(15)).build().expect("valid http client"),
        }
    }

    /// Resolve the manifest digest, optionally authenticating with
    /// `username`/`password`. Anonymous pulls omit both.
    pub async fn resolve_digest(
        &self,
        image_ref: &ImageRef,
        credentials: Option<(&str, &str)>,
    ) -> RegistryResult<String> {
        let token = if image_ref.is_docker_hub() {
            Some(self.docker_hub_token(image_ref, credentials).await?)
        } else {
            None
        };

        let url = format!("https://{}/v2/{}/manifests/{}", image_ref.registry_host, image_ref.repository, image_ref.tag);

        let mut request = self
            .client
            .head(&url)
            .header("Accept", "application/vnd.docker.distribution.manifest.v2+json, application/vnd.oci.image.manifest.v1+json");

        if let Some(token) = token {
            request = request.bearer_auth(token);
        } else if let Some((user, pass)) = credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response = request.send().await?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(RegistryError::Auth(format!("registry rejected credentials for {}", image_ref.repository)));
        }

        let digest = response
            .headers()
            .get("Docker-Content-Digest")
            .and_then(|v| v.to_str().ok())
            .map(|s| s.to_string())
            .ok_or_else(|| RegistryError::NoDigest(image_ref.repository.clone()))?;

        Ok(digest.to_lowercase())
    }

    async fn docker_hub_token(&self, image_ref: &ImageRef, credentials: Option<(&str, &str)>) -> RegistryResult<String> {
        #[derive(Deserialize)]
        struct TokenResponse {
            token: String,
        }

        let mut request = self.client.get(DOCKER_HUB_AUTH_URL).query(&[
            ("service", "registry.docker.io"),
            ("scope", &format!("repository:{}:pull", image_ref.repository)),
        ]);

        if let Some((user, pass)) = credentials {
            request = request.basic_auth(user, Some(pass));
        }

        let response: TokenResponse = request.send().await?.json().await?;
        Ok(response.token)
    }
}

impl Default for RegistryClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_bare_image_gets_library_namespace() {
        let r = ImageRef::parse("nginx");
        assert_eq!(r.registry_host, DEFAULT_REGISTRY_HOST);
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "latest");
    }

    #[test]
    fn test_parse_tagged_image() {
        let r = ImageRef::parse("nginx:1.27-alpine");
        assert_eq!(r.repository, "library/nginx");
        assert_eq!(r.tag, "1.27-alpine");
    }

    #[test]
    fn test_parse_namespaced_image() {
        let r = ImageRef::parse("grafana/grafana:10.4.1");
        assert_eq!(r.registry_host, DEFAULT_REGISTRY_HOST);
        assert_eq!(r.repository, "grafana/grafana");
        assert_eq!(r.tag, "10.4.1");
    }

    #[test]
    fn test_parse_custom_registry_with_port() {
        let r = ImageRef::parse("registry.example.com:5000/team/app:v2");
        assert_eq!(r.registry_host, "registry.example.com:5000");
        assert_eq!(r.repository, "team/app");
        assert_eq!(r.tag, "v2");
    }

    #[test]
    fn test_parse_ghcr_image() {
        let r = ImageRef::parse("ghcr.io/org/app:latest");
        assert_eq!(r.registry_host, "ghcr.io");
        assert_eq!(r.repository, "org/app");
        assert!(!r.is_docker_hub());
    }

    #[test]
    fn test_stable_tag_detection() {
        assert!(is_stable_tag("latest"));
        assert!(is_stable_tag("1.2.3"));
        assert!(is_stable_tag("v2.0.0"));
        assert!(!is_stable_tag("a1b2c3d"));
    }
}
