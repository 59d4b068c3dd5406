//! JSON-over-HTTP client for the cluster control plane, the command service,
//! and compute health. Implements the capability traits consumed by the
//! updater core.

pub mod error;
mod request;

mod cluster;
mod commands;
mod compute;

use reqwest::ClientBuilder;
use serde::{Deserialize, Serialize};

pub type Result<T> = std::result::Result<T, error::Error>;

#[derive(Debug, Clone)]
pub struct Client {
    config: Config,
    http_client: reqwest::Client,
}

#[derive(Debug, Clone)]
pub struct Config {
    address: String,
    api_token: String,
    region: String,
}

impl Client {
    pub fn builder() -> Builder {
        Builder::default()
    }
}

#[derive(Clone, Debug, Default)]
pub struct Builder {
    address: Option<String>,
    api_token: Option<String>,
    region: Option<String>,
}

impl Builder {
    pub fn address(mut self, address: String) -> Self {
        self.address = Some(address);
        self
    }

    pub fn api_token(mut self, api_token: String) -> Self {
        self.api_token = Some(api_token);
        self
    }

    pub fn region(mut self, region: String) -> Self {
        self.region = Some(region);
        self
    }

    pub fn build(self) -> Result<Client> {
        use error::Error::MissingConfig;

        Ok(Client {
            config: Config {
                address: self.address.ok_or(MissingConfig("address"))?,
                api_token: self.api_token.ok_or(MissingConfig("api_token"))?,
                region: self.region.ok_or(MissingConfig("region"))?,
            },
            http_client: ClientBuilder::new().build()?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationParams {
    pub page: u64,
    pub per_page: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaginationMeta {
    pub page: u64,
    pub per_page: u64,
    pub last_page: Option<u64>,
    pub total_entries: Option<u64>,
}
