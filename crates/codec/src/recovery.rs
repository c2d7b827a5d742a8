// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Recovers the signer addresses behind a checkpoint's aggregated signature
//! list.
//!
//! The sidechain signs votes over the checkpoint payload prefixed with a
//! single `0x01` domain byte; the digest is the Keccak-256 of that tagged
//! payload. Each `(r, s, v)` triple is validated and recovered
//! independently: a bad signature is counted and skipped, never aborting the
//! rest of the list.

use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use log::trace;
use parity_crypto::publickey::{public_to_address, recover, Signature};

use monitor_types::Error;

/// Domain tag prepended to the signed payload before hashing.
const VOTE_PREFIX: u8 = 0x01;

/// Digest the validators actually signed for the given checkpoint payload.
pub fn signed_digest(data: &[u8]) -> H256 {
    let mut tagged = Vec::with_capacity(data.len() + 1);
    tagged.push(VOTE_PREFIX);
    tagged.extend_from_slice(data);
    keccak(&tagged)
}

/// Recovers the signer of every triple against the digest of `data`.
/// Returns the addresses in input order plus the count of signatures that
/// failed validation or recovery.
pub fn recover_signers(data: &[u8], sigs: &[[U256; 3]]) -> (Vec<Address>, usize) {
    let digest = signed_digest(data);
    let mut signers = Vec::with_capacity(sigs.len());
    let mut error_count = 0;
    for sig in sigs {
        match recover_one(&digest, sig) {
            Ok(address) => signers.push(address),
            Err(e) => {
                trace!("Skipping unrecoverable checkpoint signature: {}", e);
                error_count += 1;
            }
        }
    }
    (signers, error_count)
}

fn recover_one(digest: &H256, sig: &[U256; 3]) -> Result<Address, Error> {
    if sig[2].bits() > 8 {
        return Err(Error::Crypto(
            "signature 'v' is longer than one byte".into(),
        ));
    }
    let v = sig[2].low_u64();
    if v != 27 && v != 28 {
        return Err(Error::Crypto(format!(
            "signature 'v' is {}, expected 27 or 28",
            v
        )));
    }

    // U256 -> H256 big-endian conversion left-pads short components
    let mut r = H256::zero();
    sig[0].to_big_endian(r.as_bytes_mut());
    let mut s = H256::zero();
    sig[1].to_big_endian(s.as_bytes_mut());

    let signature = Signature::from_rsv(&r, &s, (v - 27) as u8);
    if !signature.is_valid() || !signature.is_low_s() {
        return Err(Error::Crypto("signature values are invalid".into()));
    }
    let public = recover(&signature, digest).map_err(|e| Error::Crypto(e.to_string()))?;
    Ok(public_to_address(&public))
}
