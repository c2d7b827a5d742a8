// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Event log type, in the shape `eth_getLogs` returns it.

use ethereum_types::{Address, H256, U64};
use serde::{Deserialize, Deserializer};

/// A log emitted by a contract, localized to its transaction and block.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Log {
    /// The emitting contract.
    pub address: Address,
    /// Indexed topics; topic 0 is the event signature hash.
    pub topics: Vec<H256>,
    /// Non-indexed event data.
    #[serde(deserialize_with = "deserialize_bytes")]
    pub data: Vec<u8>,
    /// Block the log was emitted in.
    pub block_number: U64,
    /// Transaction the log was emitted by.
    pub transaction_hash: H256,
}

fn deserialize_bytes<'de, D>(deserializer: D) -> Result<Vec<u8>, D::Error>
where
    D: Deserializer<'de>,
{
    let hexstr = String::deserialize(deserializer)?;
    let stripped = hexstr.strip_prefix("0x").unwrap_or(&hexstr);
    hex::decode(stripped).map_err(serde::de::Error::custom)
}

#[cfg(test)]
mod tests {
    use super::Log;
    use ethereum_types::U64;

    #[test]
    fn decodes_an_rpc_log_object() {
        let serialized = r#"{
            "address": "0x86e4dc95c7fbdbf52e33d563bbdb00823894c287",
            "topics": [
                "0xba5de06d22af2685c6c7765f60067f7d2b08c2d29f53cdf14d67f6d1c9bfb527",
                "0x000000000000000000000000b79fad4ca981472442f53d16365fdf0305ffd8e9"
            ],
            "data": "0x00000000000000000000000000000000000000000000000000000000000100",
            "blockNumber": "0xe5a7c3",
            "transactionHash": "0x8b0bbe18d9a3d1ecb28727ae5d42106d4b1efcf2e64e875ba7e48eb3282aa985",
            "logIndex": "0x0",
            "removed": false
        }"#;
        let log: Log = serde_json::from_str(serialized).unwrap();
        assert_eq!(log.topics.len(), 2);
        assert_eq!(log.block_number, U64::from(0xe5a7c3u64));
        assert_eq!(log.data.len(), 31);
    }

    #[test]
    fn rejects_garbage_data() {
        let serialized = r#"{
            "address": "0x86e4dc95c7fbdbf52e33d563bbdb00823894c287",
            "topics": [],
            "data": "0xzz",
            "blockNumber": "0x1",
            "transactionHash": "0x8b0bbe18d9a3d1ecb28727ae5d42106d4b1efcf2e64e875ba7e48eb3282aa985"
        }"#;
        assert!(serde_json::from_str::<Log>(serialized).is_err());
    }
}
