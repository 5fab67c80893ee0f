use std::time::Duration;

use config::{Config, Environment};
use serde::Deserialize;

use domain_db::cve_sources::nist::{ClientOptions, NVD_API_URL};
use domain_db::ingest::{stream::StreamOptions, DEFAULT_BATCH_SIZE};

#[derive(Deserialize, Clone, Debug)]
pub struct DatabaseSettings {
    pub path: String,
    pub pool_size: u32,
}

impl DatabaseSettings {
    pub fn try_from_env() -> Result<Self, config::ConfigError> {
        Config::builder()
            .set_default("path", "cves.db")?
            .set_default("pool_size", 4)?
            .add_source(Environment::with_prefix("DB").prefix_separator("_"))
            .build()?
            .try_deserialize::<Self>()
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct NvdSettings {
    pub api_url: String,
    pub api_key: Option<String>,
    pub timeout_secs: u64,
    pub results_per_page: usize,
    pub page_delay_secs: u64,
}

impl NvdSettings {
    pub fn try_from_env() -> Result<Self, config::ConfigError> {
        Config::builder()
            .set_default("api_url", NVD_API_URL)?
            .set_default("timeout_secs", 30)?
            .set_default("results_per_page", 100)?
            .set_default("page_delay_secs", 6)?
            .add_source(Environment::with_prefix("NVD").prefix_separator("_"))
            .build()?
            .try_deserialize::<Self>()
    }

    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            api_url: self.api_url.clone(),
            api_key: self.api_key.clone(),
            timeout: Duration::from_secs(self.timeout_secs),
            user_agent: format!("cvewatch/{}", crate::version()),
            page_delay: Duration::from_secs(self.page_delay_secs),
        }
    }
}

#[derive(Deserialize, Clone, Debug)]
pub struct IngestSettings {
    pub batch_size: usize,
    pub channel_capacity: usize,
    pub pacing_ms: u64,
}

impl IngestSettings {
    pub fn try_from_env() -> Result<Self, config::ConfigError> {
        Config::builder()
            .set_default("batch_size", DEFAULT_BATCH_SIZE as u64)?
            .set_default("channel_capacity", 4)?
            .set_default("pacing_ms", 0)?
            .add_source(Environment::with_prefix("INGEST").prefix_separator("_"))
            .build()?
            .try_deserialize::<Self>()
    }

    pub fn stream_options(&self) -> StreamOptions {
        StreamOptions {
            capacity: self.channel_capacity,
            pacing: Duration::from_millis(self.pacing_ms),
        }
    }
}
