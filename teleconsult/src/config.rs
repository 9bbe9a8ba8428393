use std::{io::ErrorKind, path::Path, time::Duration};

use anyhow::{Context, Result};
use getset::Getters;
use serde::Deserialize;
use teleconsult_lib::connection::peer_link::DEFAULT_ICE_SERVER;
use tokio::fs;

#[derive(Clone, Debug, Deserialize, Getters, PartialEq)]
#[serde(default)]
pub struct Settings {
    #[get = "pub"]
    origin: String,
    poll_interval_sec: u64,
    negotiation_timeout_sec: u64,
    retry_join_on_conflict: bool,
    #[get = "pub"]
    ice_servers: Vec<String>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            origin: "http://localhost:9000".to_owned(),
            poll_interval_sec: 3,
            negotiation_timeout_sec: 60,
            retry_join_on_conflict: true,
            ice_servers: vec![DEFAULT_ICE_SERVER.to_owned()],
        }
    }
}

impl Settings {
    /// A missing file means all defaults.
    pub async fn load(path: &Path) -> Result<Self> {
        let text = match fs::read_to_string(path).await {
            Ok(text) => text,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(err) => return Err(err).with_context(|| format!("{}", path.display())),
        };
        toml::from_str(&text).with_context(|| format!("{}", path.display()))
    }

    pub fn set_origin(&mut self, origin: String) {
        self.origin = origin;
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_sec)
    }

    pub fn negotiation_timeout(&self) -> Duration {
        Duration::from_secs(self.negotiation_timeout_sec)
    }

    pub fn retry_join_on_conflict(&self) -> bool {
        self.retry_join_on_conflict
    }
}
