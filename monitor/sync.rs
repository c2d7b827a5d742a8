// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Mirrors the StakeManager registry into storage.
//!
//! A sync walks every known validator id at the checkpoint's submission
//! block: ids 1 through the stored maximum fan out concurrently (bounded),
//! then a sequential probe walks past the maximum to pick up validators that
//! joined since. A record with `activation_epoch == 0` marks the first
//! unused id and terminates the probe.

use std::collections::HashSet;

use ethereum_types::Address;
use futures::stream::{self, StreamExt};
use log::warn;

use eth_client::EthRpcClient;
use monitor_store::Store;
use monitor_types::{
    constants::{FALLBACK_LAST_VALIDATOR_ID, MAX_IN_FLIGHT_CALLS, STAKE_MANAGER},
    Error, Validator,
};

/// Refreshes the validator registry as of `block_number`.
///
/// `checkpoint_number` bounds the deactivated set: validators deactivated at
/// or before it cannot change any further and are skipped. Pass `0` on the
/// initial sync, when storage knows no checkpoints yet.
pub async fn update_validators_db(
    client: &EthRpcClient,
    store: &Store,
    block_number: u64,
    checkpoint_number: u64,
) -> Result<(), Error> {
    let deactivated: HashSet<u64> = if checkpoint_number > 0 {
        store
            .get_deactivated_validators(checkpoint_number)?
            .into_iter()
            .collect()
    } else {
        HashSet::new()
    };

    let last_id = if store.validators_table_empty()? {
        FALLBACK_LAST_VALIDATOR_ID
    } else {
        store.get_max_validator_id()?
    };

    let ids: Vec<u64> = (1..=last_id)
        .filter(|id| !deactivated.contains(id))
        .collect();
    let mut results = stream::iter(ids)
        .map(|id| fetch_validator(client, id, block_number))
        .buffer_unordered(MAX_IN_FLIGHT_CALLS);

    let mut validators = Vec::new();
    while let Some(result) = results.next().await {
        match result {
            Ok(Some(validator)) => validators.push(validator),
            // an id past the end of the set; nothing to record
            Ok(None) => {}
            Err(e) => return Err(e),
        }
    }

    // validators that joined since the stored maximum
    let mut id = last_id + 1;
    while let Some(validator) = fetch_validator(client, id, block_number).await? {
        validators.push(validator);
        id += 1;
    }

    for validator in &validators {
        store.insert_or_update_validator(validator)?;
    }
    Ok(())
}

/// Fetches one validator's registry record at the given block. Returns
/// `None` when the id does not exist at that height.
async fn fetch_validator(
    client: &EthRpcClient,
    id: u64,
    block_number: u64,
) -> Result<Option<Validator>, Error> {
    let at = if block_number > 0 {
        Some(block_number)
    } else {
        None
    };

    let call = contract_codec::validators_call(id)?;
    let output = client.call_contract(&STAKE_MANAGER, call, at).await?;
    let record = contract_codec::unpack_validator_record(&output)?;

    // ids beyond the highest allocated one decode with a zero activation
    // epoch
    if record.activation_epoch == 0 {
        return Ok(None);
    }

    let call = contract_codec::owner_of_call(id)?;
    let owner = match client.call_contract(&STAKE_MANAGER, call, at).await {
        Ok(output) => contract_codec::unpack_owner_of(&output)?,
        Err(Error::Revert(_)) => {
            // some validators have no recorded owner (id 11, for one)
            warn!("Validator with ID {} has no owner.", id);
            Address::zero()
        }
        Err(e) => return Err(e),
    };

    Ok(Some(Validator {
        id,
        owner,
        signer: record.signer,
        activation_epoch: record.activation_epoch,
        deactivation_epoch: record.deactivation_epoch,
    }))
}
