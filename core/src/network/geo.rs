use std::collections::HashMap;
use std::future::Future;
use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::config::AnalysisConfig;
use crate::utils::is_public_ip;
use crate::{NetsiftError, Result};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeoLocation {
    pub ip: String,
    pub latitude: f64,
    pub longitude: f64,
    pub country: String,
    pub city: String,
}

/// Process-wide lookup cache. Entries are never evicted; with a capacity
/// set, new entries stop being stored once it is reached.
#[derive(Debug, Default)]
pub struct GeoCache {
    entries: Mutex<HashMap<IpAddr, GeoLocation>>,
    capacity: Option<usize>,
}

impl GeoCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity_limit(capacity: usize) -> Self {
        Self {
            entries: Mutex::new(HashMap::new()),
            capacity: Some(capacity),
        }
    }

    pub fn from_config(config: &AnalysisConfig) -> Self {
        match config.geo_cache_capacity {
            Some(capacity) => Self::with_capacity_limit(capacity),
            None => Self::new(),
        }
    }

    pub fn get(&self, ip: &IpAddr) -> Option<GeoLocation> {
        match self.entries.lock() {
            Ok(entries) => entries.get(ip).cloned(),
            Err(poisoned) => poisoned.into_inner().get(ip).cloned(),
        }
    }

    pub fn insert(&self, ip: IpAddr, location: GeoLocation) {
        let mut entries = match self.entries.lock() {
            Ok(entries) => entries,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(capacity) = self.capacity {
            if entries.len() >= capacity && !entries.contains_key(&ip) {
                log::debug!("Geo cache full ({} entries), not storing {}", capacity, ip);
                return;
            }
        }
        entries.insert(ip, location);
    }

    pub fn len(&self) -> usize {
        match self.entries.lock() {
            Ok(entries) => entries.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Source of location data for a single address.
pub trait GeoProvider: Send + Sync {
    fn fetch(&self, ip: IpAddr) -> impl Future<Output = Result<GeoLocation>> + Send;
}

#[derive(Debug, Deserialize)]
struct IpApiResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    lat: f64,
    #[serde(default)]
    lon: f64,
    #[serde(default)]
    country: String,
    #[serde(default)]
    city: String,
}

/// ip-api.com style JSON endpoint: `GET {endpoint}/{ip}`.
pub struct IpApiProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl IpApiProvider {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &AnalysisConfig) -> Result<Self> {
        Self::new(&config.geo_endpoint, Duration::from_millis(config.geo_timeout_ms))
    }
}

impl GeoProvider for IpApiProvider {
    async fn fetch(&self, ip: IpAddr) -> Result<GeoLocation> {
        let url = format!("{}/{}", self.endpoint, ip);
        let response = self.client.get(&url).send().await?;

        if !response.status().is_success() {
            return Err(NetsiftError::Enrichment(format!(
                "{} returned HTTP {}",
                url,
                response.status()
            )));
        }

        let body: IpApiResponse = response.json().await?;
        if body.status != "success" {
            return Err(NetsiftError::Enrichment(format!(
                "lookup for {} failed: {}",
                ip,
                body.message.unwrap_or(body.status)
            )));
        }

        Ok(GeoLocation {
            ip: ip.to_string(),
            latitude: body.lat,
            longitude: body.lon,
            country: body.country,
            city: body.city,
        })
    }
}

pub struct GeoLocator<P> {
    provider: P,
    cache: Arc<GeoCache>,
}

impl<P: GeoProvider> GeoLocator<P> {
    pub fn new(provider: P, cache: Arc<GeoCache>) -> Self {
        Self { provider, cache }
    }

    pub fn cache(&self) -> &Arc<GeoCache> {
        &self.cache
    }

    /// Best-effort location for one address. Private, loopback and other
    /// non-routable addresses are answered locally with `None`.
    pub async fn lookup(&self, ip: IpAddr) -> Option<GeoLocation> {
        if !is_public_ip(&ip) {
            return None;
        }

        if let Some(hit) = self.cache.get(&ip) {
            return Some(hit);
        }

        match self.provider.fetch(ip).await {
            Ok(location) => {
                self.cache.insert(ip, location.clone());
                Some(location)
            }
            Err(e) => {
                log::debug!("Geolocation for {} unavailable: {}", ip, e);
                None
            }
        }
    }

    /// Look up the first `limit` addresses in order, keeping the ones that
    /// resolved. Unparsable address strings are skipped.
    pub async fn enrich(&self, ips: &[String], limit: usize) -> Vec<GeoLocation> {
        let mut locations = Vec::new();
        for addr in ips.iter().take(limit) {
            let Ok(ip) = addr.parse::<IpAddr>() else {
                continue;
            };
            if let Some(location) = self.lookup(ip).await {
                locations.push(location);
            }
        }
        locations
    }
}
