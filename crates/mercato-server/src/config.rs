/*
 *  Copyright 2025-2026 Mercato Contributors
 *
 *  Licensed under the Apache License, Version 2.0 (the "License");
 *  you may not use this file except in compliance with the License.
 *  You may obtain a copy of the License at
 *
 *      http://www.apache.org/licenses/LICENSE-2.0
 *
 *  Unless required by applicable law or agreed to in writing, software
 *  distributed under the License is distributed on an "AS IS" BASIS,
 *  WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
 *  See the License for the specific language governing permissions and
 *  limitations under the License.
 */

//! Server configuration, loaded from a TOML file with sane defaults for
//! a local SQLite deployment.

use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::Deserialize;

use mercato::models::Marketplace;
use mercato::CoreConfig;

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct ServerConfig {
    #[serde(default)]
    pub server: ServerSection,
    #[serde(default)]
    pub database: DatabaseSection,
    #[serde(default)]
    pub relay: RelaySection,
    #[serde(default)]
    pub marketplaces: MarketplacesSection,
    #[serde(default)]
    pub worker: WorkerSection,
    /// Per-tenant marketplace API tokens for the direct transports.
    #[serde(default)]
    pub credentials: Vec<CredentialEntry>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ServerSection {
    #[serde(default = "default_bind")]
    pub bind: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseSection {
    #[serde(default = "default_database_url")]
    pub url: String,
    #[serde(default = "default_database_name")]
    pub name: String,
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RelaySection {
    /// Base URL of the relay agent holding the Vinted browser session.
    #[serde(default = "default_relay_url")]
    pub url: String,
    #[serde(default = "default_relay_timeout_secs")]
    pub timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarketplacesSection {
    #[serde(default = "default_ebay_base_url")]
    pub ebay_base_url: String,
    #[serde(default = "default_etsy_base_url")]
    pub etsy_base_url: String,
    #[serde(default = "default_direct_timeout_secs")]
    pub direct_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkerSection {
    /// Tenants this deployment processes work for.
    #[serde(default)]
    pub tenants: Vec<String>,
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    #[serde(default = "default_job_ttl_secs")]
    pub job_ttl_secs: u64,
    #[serde(default = "default_stalled_grace_secs")]
    pub stalled_grace_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialEntry {
    pub tenant: String,
    pub marketplace: Marketplace,
    pub token: String,
}

fn default_bind() -> String {
    "127.0.0.1:8080".to_string()
}
fn default_database_url() -> String {
    "mercato.db".to_string()
}
fn default_database_name() -> String {
    "mercato".to_string()
}
fn default_max_connections() -> u32 {
    10
}
fn default_relay_url() -> String {
    "http://127.0.0.1:9400".to_string()
}
fn default_relay_timeout_secs() -> u64 {
    60
}
fn default_ebay_base_url() -> String {
    "https://api.ebay.com/".to_string()
}
fn default_etsy_base_url() -> String {
    "https://api.etsy.com/".to_string()
}
fn default_direct_timeout_secs() -> u64 {
    30
}
fn default_poll_interval_ms() -> u64 {
    500
}
fn default_job_ttl_secs() -> u64 {
    3600
}
fn default_stalled_grace_secs() -> u64 {
    600
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            name: default_database_name(),
            max_connections: default_max_connections(),
        }
    }
}

impl Default for RelaySection {
    fn default() -> Self {
        Self {
            url: default_relay_url(),
            timeout_secs: default_relay_timeout_secs(),
        }
    }
}

impl Default for MarketplacesSection {
    fn default() -> Self {
        Self {
            ebay_base_url: default_ebay_base_url(),
            etsy_base_url: default_etsy_base_url(),
            direct_timeout_secs: default_direct_timeout_secs(),
        }
    }
}

impl Default for WorkerSection {
    fn default() -> Self {
        Self {
            tenants: Vec::new(),
            poll_interval_ms: default_poll_interval_ms(),
            job_ttl_secs: default_job_ttl_secs(),
            stalled_grace_secs: default_stalled_grace_secs(),
        }
    }
}

impl ServerConfig {
    /// Loads configuration from `path`, or the defaults when no path is
    /// given.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("reading config file {}", path.display()))?;
                let config: ServerConfig = toml::from_str(&raw)
                    .with_context(|| format!("parsing config file {}", path.display()))?;
                Ok(config)
            }
            None => Ok(ServerConfig::default()),
        }
    }

    /// Core tunables derived from this server configuration.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            job_ttl: Duration::from_secs(self.worker.job_ttl_secs),
            relay_timeout: Duration::from_secs(self.relay.timeout_secs),
            direct_timeout: Duration::from_secs(self.marketplaces.direct_timeout_secs),
            stalled_grace: Duration::from_secs(self.worker.stalled_grace_secs),
            poll_interval: Duration::from_millis(self.worker.poll_interval_ms),
            ..CoreConfig::default()
        }
    }
}
