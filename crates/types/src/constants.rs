// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Chain constants and tunables.

use std::time::Duration;

use ethereum_types::Address;
use lazy_static::lazy_static;

use crate::parse_address;

/// Rootchain contract on Ethereum mainnet, the target of checkpoint
/// submissions.
pub const ROOTCHAIN_ADDRESS: &str = "0x86E4Dc95c7FBdBf52e33D563BbDB00823894C287";
/// StakeManager contract on Ethereum mainnet, the validator registry.
pub const STAKE_MANAGER_ADDRESS: &str = "0x5e3Ef299fDDf15eAa0432E6e66473ace8c13D908";

lazy_static! {
    pub static ref ROOTCHAIN: Address =
        parse_address(ROOTCHAIN_ADDRESS).expect("mainnet Rootchain address is well formed");
    pub static ref STAKE_MANAGER: Address =
        parse_address(STAKE_MANAGER_ADDRESS).expect("mainnet StakeManager address is well formed");
}

/// Divisor converting a raw header-block id into a checkpoint number.
pub const MAX_DEPOSITS: u64 = 10_000;

/// How many times a failed RPC is re-attempted.
pub const RETRIES: usize = 3;
/// Delay between RPC re-attempts.
pub const RETRY_WAIT: Duration = Duration::from_secs(3);
/// Deadline for a single RPC.
pub const RPC_TIMEOUT: Duration = Duration::from_secs(300);

/// Number of recent checkpoints considered by the performance benchmark.
pub const PB_WINDOW: u64 = 700;

/// Seed for the registry probe range when storage holds no validators yet.
/// There were this many validator ids at the time the tool was written; the
/// probe walks past it until it finds an unused id.
pub const FALLBACK_LAST_VALIDATOR_ID: u64 = 171;

/// Upper bound on concurrent StakeManager view calls during a registry sync.
pub const MAX_IN_FLIGHT_CALLS: usize = 32;

/// Id of the synthetic row a checkpoint's proposer is attributed to when the
/// registry does not know the proposer's current signer key.
pub const PLACEHOLDER_VALIDATOR_ID: i64 = -1;

/// Revert message the execution layer returns for a failed view call. Calls
/// failing this way are a business signal, not a transport fault, and are
/// never retried.
pub const EXECUTION_REVERTED: &str = "execution reverted";
