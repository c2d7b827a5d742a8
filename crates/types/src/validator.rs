// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use ethereum_types::Address;

use crate::{address_hex, parse_address, Error};

/// A validator as mirrored from the StakeManager registry.
///
/// `deactivation_epoch == 0` means the validator is still active. The signer
/// key may change over a validator's lifetime; the id never does.
#[derive(Debug, Clone, PartialEq)]
pub struct Validator {
    pub id: u64,
    pub owner: Address,
    pub signer: Address,
    pub activation_epoch: u64,
    pub deactivation_epoch: u64,
}

impl Validator {
    /// Names the fields that differ from `stored`, for the sync log line.
    /// Only the fields the registry actually rewrites are reported.
    pub fn describe_diff(&self, stored: &Validator) -> String {
        let mut parts = Vec::new();
        if self.owner != stored.owner {
            parts.push("owner address is different");
        }
        if self.signer != stored.signer {
            parts.push("signer address is different");
        }
        if self.deactivation_epoch != stored.deactivation_epoch {
            parts.push("deactivation epoch is different");
        }
        parts.join("; ")
    }
}

/// The set of signer keys whose per-validator metrics are exposed.
#[derive(Debug, Clone, PartialEq)]
pub enum TrackedKeys {
    /// Nothing is tracked; per-signer metrics stay empty.
    None,
    /// The wildcard `"*"`: every signer in the registry.
    All,
    /// An explicit list, held in canonical lowercase hex form.
    Keys(Vec<String>),
}

impl TrackedKeys {
    /// Builds the tracked set from the raw config list, validating that each
    /// entry is an address (or the sole wildcard entry).
    pub fn from_config(keys: &[String]) -> Result<Self, Error> {
        if keys.is_empty() {
            return Ok(TrackedKeys::None);
        }
        if keys.len() == 1 && keys[0] == "*" {
            return Ok(TrackedKeys::All);
        }
        let mut canonical = Vec::with_capacity(keys.len());
        for key in keys {
            canonical.push(address_hex(&parse_address(key)?));
        }
        Ok(TrackedKeys::Keys(canonical))
    }

    pub fn is_none(&self) -> bool {
        matches!(self, TrackedKeys::None)
    }

    /// Whether the given canonical signer key is tracked.
    pub fn contains(&self, signer_hex: &str) -> bool {
        match self {
            TrackedKeys::None => false,
            TrackedKeys::All => true,
            TrackedKeys::Keys(keys) => keys.iter().any(|k| k.eq_ignore_ascii_case(signer_hex)),
        }
    }
}
