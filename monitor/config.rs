// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use std::fs::File;

use serde_derive::Deserialize;
use structopt::StructOpt;

use monitor_types::{Error, TrackedKeys};

#[derive(Debug, StructOpt)]
#[structopt(name = "checkpoint-monitor", rename_all = "kebab-case")]
pub struct CliOptions {
    /// Path to the JSON configuration file.
    #[structopt(long, default_value = "config/config.json")]
    pub config: String,
}

/// The recognized configuration keys.
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    /// JSON-RPC endpoint used for all settlement-chain reads.
    #[serde(rename = "ETHRpcUrl")]
    pub eth_rpc_url: String,
    /// TCP port the `/metrics` endpoint listens on.
    #[serde(rename = "PrometheusPort")]
    pub prometheus_port: u16,
    /// Filesystem path of the storage file.
    #[serde(rename = "DatabaseLocation")]
    pub database_location: String,
    /// Signer addresses whose metrics are exposed; `["*"]` tracks all.
    #[serde(rename = "PublicKeys")]
    pub public_keys: Vec<String>,
    /// `0` infers the starting block from storage; any other value requests
    /// that block (storage still wins on a non-empty database).
    #[serde(rename = "ContinueFromBlock")]
    pub continue_from_block: u64,
}

impl Settings {
    pub fn load(path: &str) -> Result<Self, Error> {
        let file = File::open(path)
            .map_err(|e| Error::Config(format!("unable to open config file {}: {}", path, e)))?;
        serde_json::from_reader(file)
            .map_err(|e| Error::Config(format!("unable to parse config file {}: {}", path, e)))
    }

    /// The validated tracked-key set.
    pub fn tracked_keys(&self) -> Result<TrackedKeys, Error> {
        TrackedKeys::from_config(&self.public_keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(contents: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(contents.as_bytes()).unwrap();
        file
    }

    #[test]
    fn parses_the_recognized_keys() {
        let file = write_config(
            r#"{
                "ETHRpcUrl": "http://127.0.0.1:8545",
                "PrometheusPort": 2112,
                "DatabaseLocation": "monitor.db",
                "PublicKeys": ["*"],
                "ContinueFromBlock": 0
            }"#,
        );
        let settings = Settings::load(file.path().to_str().unwrap()).unwrap();
        assert_eq!(settings.prometheus_port, 2112);
        assert_eq!(settings.continue_from_block, 0);
        assert_eq!(settings.tracked_keys().unwrap(), TrackedKeys::All);
    }

    #[test]
    fn bad_json_is_a_config_error() {
        let file = write_config("{ not json");
        assert!(matches!(
            Settings::load(file.path().to_str().unwrap()),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn missing_file_is_a_config_error() {
        assert!(matches!(
            Settings::load("/nonexistent/config.json"),
            Err(Error::Config(_))
        ));
    }
}
