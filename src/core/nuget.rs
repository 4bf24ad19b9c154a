use crate::domain::model::ToolVersion;
use crate::utils::error::{Result, VdevError};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct VersionIndex {
    versions: Vec<String>,
}

/// Client for the NuGet flat container API (`{feed}/{id}/index.json`).
#[derive(Debug, Clone)]
pub struct NuGetClient {
    client: Client,
    feed: String,
}

impl NuGetClient {
    pub fn new(feed: &str, timeout: Duration) -> Result<Self> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            feed: feed.trim_end_matches('/').to_string(),
        })
    }

    pub async fn published_versions(&self, package_id: &str) -> Result<Vec<ToolVersion>> {
        let url = format!("{}/{}/index.json", self.feed, package_id.to_lowercase());
        tracing::debug!("Querying package feed: {}", url);

        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(VdevError::FeedError {
                message: format!("{} returned {}", url, response.status()),
            });
        }

        let index: VersionIndex = response.json().await?;
        let versions = index
            .versions
            .iter()
            .filter_map(|raw| match raw.parse::<ToolVersion>() {
                Ok(version) => Some(version),
                Err(e) => {
                    tracing::debug!("Ignoring feed version '{}': {}", raw, e);
                    None
                }
            })
            .collect();

        Ok(versions)
    }

    pub async fn latest_version(
        &self,
        package_id: &str,
        include_prerelease: bool,
    ) -> Result<ToolVersion> {
        self.published_versions(package_id)
            .await?
            .into_iter()
            .filter(|version| include_prerelease || !version.is_prerelease())
            .max()
            .ok_or_else(|| VdevError::FeedError {
                message: format!("no usable versions of '{}' published", package_id),
            })
    }
}
