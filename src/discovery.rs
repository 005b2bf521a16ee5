//! Discovery of additional targets from proxied DNS records.

use async_trait::async_trait;
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::db::MonitorTarget;

const CLOUDFLARE_API: &str = "https://api.cloudflare.com/client/v4";
const PAGE_SIZE: u32 = 100;
const DISCOVERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Discovery error types.
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("API error: {0}")]
    Api(String),
}

/// A directory of targets that can change between runs.
#[async_trait]
pub trait Discovery: Send + Sync {
    /// List every currently known target.
    async fn discover(&self) -> Result<Vec<MonitorTarget>, DiscoveryError>;

    /// Look up a single target by id.
    async fn find(&self, id: &str) -> Result<Option<MonitorTarget>, DiscoveryError>;
}

#[derive(Debug, Deserialize)]
struct DnsRecord {
    name: String,
}

#[derive(Debug, Deserialize)]
struct ResultInfo {
    page: u32,
    total_pages: u32,
}

#[derive(Debug, Deserialize)]
struct ListResponse {
    success: bool,
    #[serde(default)]
    errors: Vec<serde_json::Value>,
    #[serde(default)]
    result: Vec<DnsRecord>,
    result_info: Option<ResultInfo>,
}

/// Discovers one HTTPS target per proxied DNS record in a Cloudflare zone.
pub struct CloudflareDiscovery {
    client: reqwest::Client,
    base_url: String,
    zone_id: String,
    api_token: String,
}

impl CloudflareDiscovery {
    pub fn new(zone_id: &str, api_token: &str) -> Result<Self, DiscoveryError> {
        Self::with_base_url(CLOUDFLARE_API, zone_id, api_token, DISCOVERY_TIMEOUT)
    }

    pub fn with_base_url(
        base_url: &str,
        zone_id: &str,
        api_token: &str,
        timeout: Duration,
    ) -> Result<Self, DiscoveryError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            zone_id: zone_id.to_string(),
            api_token: api_token.to_string(),
        })
    }

    async fn list_page(
        &self,
        page: u32,
        name: Option<&str>,
    ) -> Result<ListResponse, DiscoveryError> {
        let url = format!("{}/zones/{}/dns_records", self.base_url, self.zone_id);
        let page = page.to_string();
        let per_page = PAGE_SIZE.to_string();
        let mut query = vec![
            ("proxied", "true"),
            ("page", page.as_str()),
            ("per_page", per_page.as_str()),
        ];
        if let Some(name) = name {
            query.push(("name", name));
        }

        let response: ListResponse = self
            .client
            .get(&url)
            .bearer_auth(&self.api_token)
            .query(&query)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        if !response.success {
            return Err(DiscoveryError::Api(format!("{:?}", response.errors)));
        }
        Ok(response)
    }
}

fn record_target(record: &DnsRecord) -> MonitorTarget {
    MonitorTarget::new(
        &record.name,
        &record.name,
        &format!("https://{}/", record.name),
    )
}

#[async_trait]
impl Discovery for CloudflareDiscovery {
    async fn discover(&self) -> Result<Vec<MonitorTarget>, DiscoveryError> {
        let mut targets = Vec::new();
        let mut page = 1;

        loop {
            let response = self.list_page(page, None).await?;
            targets.extend(response.result.iter().map(record_target));

            match response.result_info {
                Some(info) if info.page < info.total_pages => page = info.page + 1,
                _ => break,
            }
        }

        Ok(targets)
    }

    async fn find(&self, id: &str) -> Result<Option<MonitorTarget>, DiscoveryError> {
        let response = self.list_page(1, Some(id)).await?;
        Ok(response.result.first().map(record_target))
    }
}
