// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Domain types shared by every component of the checkpoint monitor.

mod error;
mod log;
mod validator;

pub mod constants;

pub use crate::{
    error::Error,
    log::Log,
    validator::{TrackedKeys, Validator},
};

use ethereum_types::Address;

/// A `NewHeaderBlock` event emitted by the Rootchain contract, together with
/// the envelope fields the monitor needs.
#[derive(Debug, Clone, PartialEq)]
pub struct NewHeaderBlockEvent {
    /// Transaction in which the checkpoint was submitted.
    pub tx_hash: ethereum_types::H256,
    /// Signer address of the proposer, from topic 1.
    pub proposer: Address,
    /// Canonical checkpoint number: the raw header-block id divided by
    /// `constants::MAX_DEPOSITS`.
    pub checkpoint_number: u64,
    /// Proposer reward, from topic 3.
    pub reward: ethereum_types::U256,
    /// L1 block that contains the submission.
    pub block_number: u64,
}

/// The proposer column of a checkpoint row. The registry may not know the
/// proposer's current signer key, in which case the checkpoint is attributed
/// to the synthetic placeholder row.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ProposerId {
    /// A validator present in the registry.
    Validator(u64),
    /// The proposer's signer key is unknown; maps to the `-1` row.
    Unknown,
}

impl ProposerId {
    pub fn as_i64(&self) -> i64 {
        match *self {
            ProposerId::Validator(id) => id as i64,
            ProposerId::Unknown => constants::PLACEHOLDER_VALIDATOR_ID,
        }
    }
}

/// Parses a `0x`-prefixed (or bare) hex string into an address.
pub fn parse_address(s: &str) -> Result<Address, Error> {
    let trimmed = s
        .strip_prefix("0x")
        .or_else(|| s.strip_prefix("0X"))
        .unwrap_or(s);
    trimmed
        .parse::<Address>()
        .map_err(|_| Error::Config(format!("invalid address: {}", s)))
}

/// Canonical textual form of an address: `0x` followed by 40 lowercase hex
/// digits. This is the form persisted to storage and used for key matching.
pub fn address_hex(address: &Address) -> String {
    format!("{:#x}", address)
}
