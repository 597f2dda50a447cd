//! HTTP registry client.
//!
//! A blocking client for registries speaking the JavaScript-ecosystem
//! protocol: JSON metadata documents plus gzip-tar archives, with optional
//! bearer-token authentication.

use std::io::Read;
use std::time::Duration;

use reqwest::blocking::{Client, Response};
use serde::de::DeserializeOwned;

use super::{PackageDocument, Registry, RegistryError, VersionDocument};
use crate::package::PackageRecord;
use crate::semver::{Range, Version};

/// Default registry URL
pub const DEFAULT_REGISTRY: &str = "https://registry.npmjs.org";

/// Registry client for HTTP(S) registries
pub struct HttpRegistry {
    client: Client,
    base_url: String,
    token: Option<String>,
}

impl HttpRegistry {
    /// Create a client for `base_url`, sending `Authorization: Bearer` on
    /// every request when a token is given.
    pub fn new(base_url: &str, token: Option<String>) -> Result<Self, RegistryError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("ipm/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            token,
        })
    }

    fn get(&self, url: &str) -> Result<Response, RegistryError> {
        let mut request = self.client.get(url);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }
        let response = request.send()?;

        let status = response.status();
        if !status.is_success() {
            return Err(RegistryError::Status {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    fn get_json<T: DeserializeOwned>(&self, url: &str) -> Result<T, RegistryError> {
        let body = self.get(url)?.text()?;
        serde_json::from_str(&body).map_err(|source| RegistryError::Decode {
            url: url.to_string(),
            source,
        })
    }
}

impl Registry for HttpRegistry {
    fn resolve_version(&self, name: &str, range: &Range) -> Result<Version, RegistryError> {
        let url = format!("{}/{}", self.base_url, name);
        tracing::debug!(url = %url, "fetching package document");
        let doc: PackageDocument = self.get_json(&url)?;

        let no_match = || RegistryError::NoMatch {
            package: name.to_string(),
            range: range.to_string(),
        };

        let version = match range {
            Range::DistTag(tag) => {
                let tagged = doc.dist_tags.get(tag).ok_or_else(no_match)?;
                Version::parse(tagged).map_err(|_| RegistryError::Document {
                    url: url.clone(),
                    detail: format!("dist-tag {tag} points at unparseable version {tagged:?}"),
                })?
            }
            _ => doc
                .versions
                .keys()
                .filter_map(|text| Version::parse(text).ok())
                .filter(|candidate| range.matches(candidate))
                .max()
                .ok_or_else(no_match)?,
        };

        tracing::debug!(package = name, range = %range, version = %version, "version resolved");
        Ok(version)
    }

    fn fetch_tarball(
        &self,
        name: &str,
        version: &Version,
    ) -> Result<(Box<dyn Read>, PackageRecord), RegistryError> {
        let url = format!("{}/{}/{}", self.base_url, name, version);
        tracing::debug!(url = %url, "fetching version document");
        let doc: VersionDocument = self.get_json(&url)?;

        let record = PackageRecord {
            name: doc.name,
            version: Version::parse(&doc.version).map_err(|_| RegistryError::Document {
                url: url.clone(),
                detail: format!("unparseable version field {:?}", doc.version),
            })?,
            dependencies: doc.dependencies,
        };
        tracing::debug!(
            package = %record.name,
            version = %record.version,
            "package metadata fetched"
        );

        let body = self.get(&doc.dist.tarball)?;
        Ok((Box::new(body), record))
    }
}
