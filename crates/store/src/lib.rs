// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Durable state of the monitor: the mirrored validator registry, the
//! checkpoint history, and the two signed-checkpoint tables.
//!
//! `validators_signed_checkpoints` is the permanent audit trail for tracked
//! signer keys and may span the whole history. Its `temp_` twin holds the
//! signers of *every* validator but only for the rolling benchmark window,
//! and is pruned from the tail as the window advances.
//!
//! The store owns a single connection; the ingest pipeline is its only
//! writer.

mod checkpoint;
mod validator;

use parking_lot::Mutex;
use rusqlite::Connection;

use monitor_types::{Error, TrackedKeys};

pub struct Store {
    conn: Mutex<Connection>,
    tracked: TrackedKeys,
}

impl Store {
    /// Opens (creating if necessary) the storage file at `path`.
    pub fn open(path: &str, tracked: TrackedKeys) -> Result<Self, Error> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Ok(Store {
            conn: Mutex::new(conn),
            tracked,
        })
    }

    /// Creates the four tables. Safe to call on an existing database.
    pub fn create_schema(&self) -> Result<(), Error> {
        log::info!("Creating new database.");
        let conn = self.conn.lock();
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS validators (
                "id" INTEGER NOT NULL PRIMARY KEY,
                "owner_key" TEXT NOT NULL,
                "signer_key" TEXT NOT NULL,
                "activation_epoch" INTEGER,
                "deactivation_epoch" INTEGER
            );
            CREATE TABLE IF NOT EXISTS checkpoints (
                "id" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                "number" INTEGER NOT NULL,
                "block_number" INTEGER NOT NULL,
                "timestamp" INTEGER NOT NULL,
                "proposer_id" INTEGER NOT NULL,
                "reward" INTEGER,
                "performance_benchmark" REAL,
                FOREIGN KEY(proposer_id) REFERENCES validators(id)
            );
            CREATE TABLE IF NOT EXISTS validators_signed_checkpoints (
                "id" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                "checkpoint_id" INTEGER NOT NULL,
                "validator_id" INTEGER NOT NULL,
                UNIQUE(checkpoint_id, validator_id) ON CONFLICT REPLACE,
                FOREIGN KEY(checkpoint_id) REFERENCES checkpoints(id),
                FOREIGN KEY(validator_id) REFERENCES validators(id)
            );
            CREATE TABLE IF NOT EXISTS temp_validators_signed_checkpoints (
                "id" INTEGER NOT NULL PRIMARY KEY AUTOINCREMENT,
                "checkpoint_id" INTEGER NOT NULL,
                "validator_id" INTEGER NOT NULL,
                UNIQUE(checkpoint_id, validator_id) ON CONFLICT REPLACE,
                FOREIGN KEY(checkpoint_id) REFERENCES checkpoints(id),
                FOREIGN KEY(validator_id) REFERENCES validators(id)
            );
            "#,
        )?;
        Ok(())
    }

    pub fn tracked(&self) -> &TrackedKeys {
        &self.tracked
    }

    pub(crate) fn with_conn<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, Error>,
    ) -> Result<T, Error> {
        let conn = self.conn.lock();
        f(&conn)
    }
}

#[cfg(test)]
pub(crate) mod test_util {
    use super::Store;
    use ethereum_types::Address;
    use monitor_types::{NewHeaderBlockEvent, TrackedKeys, Validator};

    pub fn memory_store(tracked: TrackedKeys) -> Store {
        let store = Store::open(":memory:", tracked).unwrap();
        store.create_schema().unwrap();
        store
    }

    pub fn validator(id: u64, signer: Address) -> Validator {
        Validator {
            id,
            owner: Address::repeat_byte(0xaa),
            signer,
            activation_epoch: 1,
            deactivation_epoch: 0,
        }
    }

    pub fn event(number: u64, proposer: Address) -> NewHeaderBlockEvent {
        NewHeaderBlockEvent {
            tx_hash: ethereum_types::H256::repeat_byte(number as u8),
            proposer,
            checkpoint_number: number,
            reward: 1000.into(),
            block_number: 14_000_000 + number,
        }
    }
}
