// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! The outer ingest loop: discovers checkpoint events in block ranges and
//! drives each through recovery, registry sync, storage and the benchmark,
//! strictly in block order. Crash-safe resume comes from restarting at the
//! block of the last fully recorded checkpoint.

use std::sync::Arc;
use std::time::Duration;

use ethereum_types::H256;
use log::{error, info, warn};

use eth_client::EthRpcClient;
use monitor_store::Store;
use monitor_types::{
    constants::{RETRIES, RETRY_WAIT, ROOTCHAIN},
    Error, NewHeaderBlockEvent,
};

use crate::{config::Settings, metrics, performance, sync};

/// Pause between successive block-range scans.
const POLL_INTERVAL: Duration = Duration::from_secs(60);

/// Blocks to rewind from the tip when starting with no history at all.
const FRESH_START_REWIND: u64 = 100;

/// Runs the monitor until an unrecoverable error surfaces.
pub async fn run(
    client: EthRpcClient,
    store: Arc<Store>,
    settings: Settings,
    db_existed: bool,
) -> Result<(), Error> {
    let mut start = starting_block(&client, &store, &settings, db_existed).await?;
    metrics::CURRENT_BLOCK_NUMBER.set(start as f64);

    if store.validators_table_empty()? {
        sync::update_validators_db(&client, &store, start, 0).await?;
    }

    let mut end = client.current_height().await?;
    loop {
        process_range(&client, &store, start, end).await?;

        start = end + 1;
        metrics::CURRENT_BLOCK_NUMBER.set(start as f64);

        tokio::time::sleep(POLL_INTERVAL).await;
        end = client.current_height().await?;
    }
}

/// Determines the first block to scan for checkpoints.
///
/// A non-empty database always wins over `ContinueFromBlock`: the last
/// partially processed checkpoint must be replayed to guarantee its rows are
/// complete, and replay is idempotent.
pub async fn starting_block(
    client: &EthRpcClient,
    store: &Store,
    settings: &Settings,
    db_existed: bool,
) -> Result<u64, Error> {
    if !db_existed {
        warn!("Database file does not exist. A new database will be created.");
        store.create_schema()?;
    }

    let mut start = 0u64;
    if settings.continue_from_block == 0 {
        match store.get_last_block_number() {
            Ok(last) => start = last,
            Err(Error::NoRows) => {
                warn!(
                    "No checkpoints found in storage. Starting from current block - {}.",
                    FRESH_START_REWIND
                );
            }
            Err(e) => return Err(e),
        }
    } else {
        start = settings.continue_from_block;
        if db_existed {
            match store.get_last_block_number() {
                Ok(last) => {
                    warn!(
                        "The database provided is not new, and monitoring will resume from \
                         the last block in the database ({}) rather than the one specified \
                         in the config ({}).",
                        last, start
                    );
                    warn!(
                        "If you would like to start from the block number provided in the \
                         config, please delete or move the database file and restart the \
                         process."
                    );
                    start = last;
                }
                Err(Error::NoRows) => {
                    warn!(
                        "No checkpoints found in storage. Starting from the block provided \
                         in the config ({}).",
                        start
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    if start == 0 {
        start = client.current_height().await? - FRESH_START_REWIND;
    } else if settings.continue_from_block == 0 {
        // resuming: republish the checkpoint gauges before the loop starts
        metrics::update_checkpoints_signed(store)?;
    }
    Ok(start)
}

/// Scans the inclusive block range and processes every checkpoint event in
/// it, in order. An empty range is routine; everything else that fails
/// aborts the scan.
pub async fn process_range(
    client: &EthRpcClient,
    store: &Store,
    start: u64,
    end: u64,
) -> Result<(), Error> {
    let events = match decode_events(client, start, end).await {
        Ok(events) => events,
        Err(Error::NoLogsFound) => {
            info!(
                "No checkpoints were found between blocks {} and {}.",
                start, end
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    match events.len() {
        0 => return Ok(()),
        1 => info!("Processing checkpoint {}.", events[0].checkpoint_number),
        _ => info!(
            "Processing checkpoints {} to {}.",
            events[0].checkpoint_number,
            events[events.len() - 1].checkpoint_number
        ),
    }

    for (index, event) in events.iter().enumerate() {
        metrics::CURRENT_CHECKPOINT.set(event.checkpoint_number as f64);

        let (data, sigs) = fetch_checkpoint_signatures(client, &event.tx_hash).await?;
        let (signers, recovery_errors) = contract_codec::recovery::recover_signers(&data, &sigs);

        // refresh the registry before any row references it
        sync::update_validators_db(client, store, event.block_number, event.checkpoint_number)
            .await?;

        let timestamp = client.block_timestamp(event.block_number).await?;

        if recovery_errors > 0 {
            warn!(
                "There were {} errors while processing checkpoint number {}. The list of \
                 validators that signed it might be incomplete.",
                recovery_errors, event.checkpoint_number
            );
        }

        store.insert_checkpoint(event, timestamp)?;
        store.insert_validators_signed_checkpoint(event.checkpoint_number, &signers, false)?;
        store.insert_validators_signed_checkpoint(event.checkpoint_number, &signers, true)?;

        let pb = match performance::calculate_and_insert(store, event.checkpoint_number) {
            Ok(pb) => {
                metrics::CURRENT_PERFORMANCE_BENCHMARK.set(pb);
                Some(pb)
            }
            Err(Error::CheckpointNotFound(_)) => {
                warn!(
                    "Could not calculate performance benchmark for checkpoint {} as we do \
                     not have enough data for the 700 checkpoints before it.",
                    event.checkpoint_number
                );
                None
            }
            Err(e) => return Err(e),
        };

        metrics::update_checkpoints_signed(store)?;

        let progress = (index + 1) as f64 / events.len() as f64 * 100.0;
        match pb {
            Some(pb) => info!(
                "Processed checkpoint {} (ETH Block {}) - PB: {:.5}% [{:.2}%]",
                event.checkpoint_number,
                event.block_number,
                pb * 100.0,
                progress
            ),
            None => info!(
                "Processed checkpoint {} (ETH Block {}) [{:.2}%]",
                event.checkpoint_number, event.block_number, progress
            ),
        }
    }

    Ok(())
}

async fn decode_events(
    client: &EthRpcClient,
    start: u64,
    end: u64,
) -> Result<Vec<NewHeaderBlockEvent>, Error> {
    let logs = client.filter_logs(start, end, &ROOTCHAIN).await?;
    Ok(logs
        .iter()
        .filter_map(contract_codec::decode_new_header_block)
        .collect())
}

/// Fetches and unpacks the `submitCheckpoint` calldata behind an event,
/// retrying transport faults; anything else fails the scan.
async fn fetch_checkpoint_signatures(
    client: &EthRpcClient,
    tx_hash: &H256,
) -> Result<(Vec<u8>, Vec<[ethereum_types::U256; 3]>), Error> {
    let mut attempt = 0;
    loop {
        let result = match client.transaction_payload(tx_hash).await {
            Ok(payload) => contract_codec::unpack_submit_checkpoint(&payload),
            Err(e) => Err(e),
        };
        match result {
            Ok(unpacked) => return Ok(unpacked),
            Err(e) if e.is_transient() => {
                attempt += 1;
                if attempt >= RETRIES {
                    error!(
                        "Error while trying to get checkpoint signatures from transaction \
                         {:#x}, error: {}",
                        tx_hash, e
                    );
                    return Err(e);
                }
                tokio::time::sleep(RETRY_WAIT).await;
            }
            Err(e) => {
                error!(
                    "Error while trying to get checkpoint signatures from transaction \
                     {:#x}, error: {}",
                    tx_hash, e
                );
                return Err(e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::Address;
    use monitor_types::{TrackedKeys, Validator};

    fn settings(continue_from_block: u64) -> Settings {
        Settings {
            eth_rpc_url: "http://127.0.0.1:1".to_owned(),
            prometheus_port: 2112,
            database_location: ":memory:".to_owned(),
            public_keys: vec!["*".to_owned()],
            continue_from_block,
        }
    }

    fn store_with_checkpoint(block_number: u64) -> Store {
        let store = Store::open(":memory:", TrackedKeys::All).unwrap();
        store.create_schema().unwrap();
        let signer = Address::repeat_byte(1);
        store
            .insert_validator(&Validator {
                id: 1,
                owner: Address::repeat_byte(0xaa),
                signer,
                activation_epoch: 1,
                deactivation_epoch: 0,
            })
            .unwrap();
        let event = NewHeaderBlockEvent {
            tx_hash: H256::repeat_byte(9),
            proposer: signer,
            checkpoint_number: 700,
            reward: 1.into(),
            block_number,
        };
        store.insert_checkpoint(&event, 1_650_000_000).unwrap();
        store
    }

    // the RPC client is never dialed in these paths
    fn offline_client() -> EthRpcClient {
        EthRpcClient::new("http://127.0.0.1:1").unwrap()
    }

    #[tokio::test]
    async fn resume_overrides_the_configured_block() {
        let store = store_with_checkpoint(15_000_500);
        let start = starting_block(&offline_client(), &store, &settings(12_000_000), true)
            .await
            .unwrap();
        assert_eq!(start, 15_000_500);
    }

    #[tokio::test]
    async fn fresh_database_honours_the_configured_block() {
        let store = Store::open(":memory:", TrackedKeys::All).unwrap();
        let start = starting_block(&offline_client(), &store, &settings(12_000_000), false)
            .await
            .unwrap();
        assert_eq!(start, 12_000_000);
    }

    #[tokio::test]
    async fn inferred_start_is_the_last_recorded_block() {
        let store = store_with_checkpoint(14_250_000);
        let start = starting_block(&offline_client(), &store, &settings(0), true)
            .await
            .unwrap();
        assert_eq!(start, 14_250_000);
    }
}
