// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use std::{path::Path, process, sync::Arc};

use log::error;
use structopt::StructOpt;

use checkpoint_monitor::{
    config::{CliOptions, Settings},
    ingest, metrics,
};
use eth_client::EthRpcClient;
use monitor_store::Store;

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let opts = CliOptions::from_args();

    let settings = match Settings::load(&opts.config) {
        Ok(settings) => settings,
        Err(e) => {
            error!("Error while opening config file ({}): {}", opts.config, e);
            process::exit(1);
        }
    };
    let tracked = match settings.tracked_keys() {
        Ok(tracked) => tracked,
        Err(e) => {
            error!("Error in the configured public keys: {}", e);
            process::exit(1);
        }
    };

    let db_existed = Path::new(&settings.database_location).exists();
    let store = match Store::open(&settings.database_location, tracked) {
        Ok(store) => Arc::new(store),
        Err(e) => {
            error!(
                "Could not open database ({}): {}",
                settings.database_location, e
            );
            process::exit(1);
        }
    };

    let client = match EthRpcClient::new(&settings.eth_rpc_url) {
        Ok(client) => client,
        Err(e) => {
            error!("Could not set up the ETH RPC client: {}", e);
            process::exit(1);
        }
    };

    let port = settings.prometheus_port;
    tokio::spawn(async move {
        if let Err(e) = ingest::run(client, store, settings, db_existed).await {
            error!("Monitor stopped: {}", e);
            process::exit(1);
        }
    });

    if let Err(e) = metrics::serve(port).await {
        error!("{}", e);
        process::exit(1);
    }
}
