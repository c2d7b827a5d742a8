// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Codecs for the two contracts the monitor talks to.
//!
//! The Rootchain side decodes `NewHeaderBlock` logs and unpacks the
//! `submitCheckpoint` calldata they point at; the StakeManager side packs and
//! unpacks the `validators(uint256)` / `ownerOf(uint256)` view calls the
//! registry sync performs.

pub mod recovery;

use ethabi::{Contract, Token};
use ethereum_types::{Address, H256, U256};
use keccak_hash::keccak;
use lazy_static::lazy_static;
use log::warn;

use monitor_types::{constants::MAX_DEPOSITS, Error, Log, NewHeaderBlockEvent};

const NEW_HEADER_BLOCK_SIGNATURE: &[u8] =
    b"NewHeaderBlock(address,uint256,uint256,uint256,uint256,bytes32)";

lazy_static! {
    static ref ROOTCHAIN_ABI: Contract =
        Contract::load(&include_bytes!("../res/rootchain.json")[..])
            .expect("embedded Rootchain ABI is well formed");
    static ref STAKE_MANAGER_ABI: Contract =
        Contract::load(&include_bytes!("../res/stake_manager.json")[..])
            .expect("embedded StakeManager ABI is well formed");
    static ref NEW_HEADER_BLOCK_TOPIC: H256 = keccak(NEW_HEADER_BLOCK_SIGNATURE);
}

/// The registry fields the monitor keeps from a `validators(id)` response.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidatorRecord {
    pub activation_epoch: u64,
    pub deactivation_epoch: u64,
    pub signer: Address,
}

/// Turns a Rootchain log into a checkpoint event. Malformed logs are skipped
/// with a warning; a bad log must never abort the batch it arrived in.
pub fn decode_new_header_block(log: &Log) -> Option<NewHeaderBlockEvent> {
    if log.topics.len() != 4 {
        warn!(
            "Could not unpack event in transaction {:#x}: expected 4 topics, got {}",
            log.transaction_hash,
            log.topics.len()
        );
        return None;
    }
    if log.topics[0] != *NEW_HEADER_BLOCK_TOPIC {
        warn!(
            "Could not unpack event in transaction {:#x}: unexpected event signature {:#x}",
            log.transaction_hash, log.topics[0]
        );
        return None;
    }
    let proposer = Address::from_slice(&log.topics[1].as_bytes()[12..]);
    let header_block_id = U256::from_big_endian(log.topics[2].as_bytes());
    let reward = U256::from_big_endian(log.topics[3].as_bytes());
    Some(NewHeaderBlockEvent {
        tx_hash: log.transaction_hash,
        proposer,
        checkpoint_number: (header_block_id / MAX_DEPOSITS).low_u64(),
        reward,
        block_number: log.block_number.as_u64(),
    })
}

/// Unpacks a `submitCheckpoint` method payload into the signed data and the
/// `(r, s, v)` signature triples. The first four bytes are the selector.
pub fn unpack_submit_checkpoint(payload: &[u8]) -> Result<(Vec<u8>, Vec<[U256; 3]>), Error> {
    if payload.len() < 4 {
        return Err(Error::Other(
            "submitCheckpoint payload is shorter than a selector".into(),
        ));
    }
    let function = ROOTCHAIN_ABI.function("submitCheckpoint")?;
    let input_types: Vec<ethabi::ParamType> = function
        .inputs
        .iter()
        .map(|param| param.kind.clone())
        .collect();
    let mut tokens = ethabi::decode(&input_types, &payload[4..])?.into_iter();

    let data = match tokens.next() {
        Some(Token::Bytes(data)) => data,
        _ => return Err(Error::Other("submitCheckpoint data field missing".into())),
    };
    let raw_sigs = match tokens.next() {
        Some(Token::Array(sigs)) => sigs,
        _ => return Err(Error::Other("submitCheckpoint sigs field missing".into())),
    };

    let mut sigs = Vec::with_capacity(raw_sigs.len());
    for entry in raw_sigs {
        match entry {
            Token::FixedArray(triple) if triple.len() == 3 => {
                let mut components = [U256::zero(); 3];
                for (slot, token) in components.iter_mut().zip(triple) {
                    match token {
                        Token::Uint(value) => *slot = value,
                        _ => {
                            return Err(Error::Other(
                                "signature component is not an integer".into(),
                            ))
                        }
                    }
                }
                sigs.push(components);
            }
            _ => return Err(Error::Other("signature entry is not a triple".into())),
        }
    }
    Ok((data, sigs))
}

/// Calldata for `validators(id)`.
pub fn validators_call(id: u64) -> Result<Vec<u8>, Error> {
    let function = STAKE_MANAGER_ABI.function("validators")?;
    Ok(function.encode_input(&[Token::Uint(U256::from(id))])?)
}

/// Picks the epochs and signer key out of a `validators(id)` response.
pub fn unpack_validator_record(output: &[u8]) -> Result<ValidatorRecord, Error> {
    let function = STAKE_MANAGER_ABI.function("validators")?;
    let tokens = function.decode_output(output)?;
    let activation_epoch = uint_at(&tokens, 2)?;
    let deactivation_epoch = uint_at(&tokens, 3)?;
    let signer = match tokens.get(5) {
        Some(Token::Address(signer)) => *signer,
        _ => return Err(Error::Other("validator record has no signer field".into())),
    };
    Ok(ValidatorRecord {
        activation_epoch,
        deactivation_epoch,
        signer,
    })
}

/// Calldata for `ownerOf(id)`.
pub fn owner_of_call(id: u64) -> Result<Vec<u8>, Error> {
    let function = STAKE_MANAGER_ABI.function("ownerOf")?;
    Ok(function.encode_input(&[Token::Uint(U256::from(id))])?)
}

/// Decodes an `ownerOf(id)` response.
pub fn unpack_owner_of(output: &[u8]) -> Result<Address, Error> {
    let function = STAKE_MANAGER_ABI.function("ownerOf")?;
    let tokens = function.decode_output(output)?;
    match tokens.get(0) {
        Some(Token::Address(owner)) => Ok(*owner),
        _ => Err(Error::Other("ownerOf returned no address".into())),
    }
}

fn uint_at(tokens: &[Token], index: usize) -> Result<u64, Error> {
    match tokens.get(index) {
        Some(Token::Uint(value)) => Ok(value.low_u64()),
        _ => Err(Error::Other(format!(
            "validator record field {} is not an integer",
            index
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::U64;

    fn header_block_log(raw_id: u64) -> Log {
        let mut id_topic = [0u8; 32];
        U256::from(raw_id).to_big_endian(&mut id_topic);
        let mut reward_topic = [0u8; 32];
        U256::from(12_345u64).to_big_endian(&mut reward_topic);
        let mut proposer_topic = [0u8; 32];
        proposer_topic[12..].copy_from_slice(Address::repeat_byte(0xab).as_bytes());
        Log {
            address: Address::repeat_byte(0x11),
            topics: vec![
                *NEW_HEADER_BLOCK_TOPIC,
                H256::from(proposer_topic),
                H256::from(id_topic),
                H256::from(reward_topic),
            ],
            data: vec![0u8; 96],
            block_number: U64::from(14_500_000u64),
            transaction_hash: H256::repeat_byte(0x77),
        }
    }

    #[test]
    fn decodes_a_new_header_block_log() {
        let event = decode_new_header_block(&header_block_log(7_000_000)).unwrap();
        assert_eq!(event.checkpoint_number, 700);
        assert_eq!(event.proposer, Address::repeat_byte(0xab));
        assert_eq!(event.reward, U256::from(12_345u64));
        assert_eq!(event.block_number, 14_500_000);
        assert_eq!(event.tx_hash, H256::repeat_byte(0x77));
    }

    #[test]
    fn header_block_id_division_truncates() {
        let event = decode_new_header_block(&header_block_log(7_019_999)).unwrap();
        assert_eq!(event.checkpoint_number, 701);
    }

    #[test]
    fn malformed_logs_are_skipped() {
        let mut missing_topics = header_block_log(7_000_000);
        missing_topics.topics.truncate(2);
        assert!(decode_new_header_block(&missing_topics).is_none());

        let mut wrong_signature = header_block_log(7_000_000);
        wrong_signature.topics[0] = H256::repeat_byte(0xee);
        assert!(decode_new_header_block(&wrong_signature).is_none());
    }

    #[test]
    fn submit_checkpoint_payload_round_trips() {
        let data = b"checkpoint vote payload".to_vec();
        let sigs = vec![
            [U256::from(11u64), U256::from(22u64), U256::from(27u64)],
            [U256::from(33u64), U256::from(44u64), U256::from(28u64)],
        ];
        let tokens = [
            Token::Bytes(data.clone()),
            Token::Array(
                sigs.iter()
                    .map(|triple| {
                        Token::FixedArray(triple.iter().map(|&v| Token::Uint(v)).collect())
                    })
                    .collect(),
            ),
        ];
        let payload = ROOTCHAIN_ABI
            .function("submitCheckpoint")
            .unwrap()
            .encode_input(&tokens)
            .unwrap();

        let (unpacked_data, unpacked_sigs) = unpack_submit_checkpoint(&payload).unwrap();
        assert_eq!(unpacked_data, data);
        assert_eq!(unpacked_sigs, sigs);
    }

    #[test]
    fn truncated_payloads_are_rejected() {
        assert!(unpack_submit_checkpoint(&[0x01, 0x02]).is_err());
        assert!(unpack_submit_checkpoint(&[0x01, 0x02, 0x03, 0x04, 0x05]).is_err());
    }

    #[test]
    fn registry_calls_round_trip() {
        let call = validators_call(11).unwrap();
        // selector plus one word
        assert_eq!(call.len(), 36);
        assert_eq!(U256::from_big_endian(&call[4..]), U256::from(11u64));

        // the thirteen outputs are all head-only words, so they encode
        // positionally
        let signer = Address::repeat_byte(0x42);
        let mut outputs: Vec<Token> = vec![Token::Uint(U256::zero()); 13];
        outputs[2] = Token::Uint(U256::from(5u64));
        outputs[3] = Token::Uint(U256::from(0u64));
        outputs[5] = Token::Address(signer);
        outputs[6] = Token::Address(Address::zero());
        let encoded = ethabi::encode(&outputs);

        let record = unpack_validator_record(&encoded).unwrap();
        assert_eq!(
            record,
            ValidatorRecord {
                activation_epoch: 5,
                deactivation_epoch: 0,
                signer,
            }
        );
    }

    #[test]
    fn owner_of_round_trips() {
        let owner = Address::repeat_byte(0x99);
        let encoded = ethabi::encode(&[Token::Address(owner)]);
        assert_eq!(unpack_owner_of(&encoded).unwrap(), owner);
        assert!(unpack_owner_of(&[]).is_err());
    }
}
