// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Validator registry half of the store.

use log::info;
use rusqlite::{params, OptionalExtension};

use monitor_types::{address_hex, parse_address, Error, Validator};

use crate::Store;

const ZERO_ADDRESS: &str = "0x0000000000000000000000000000000000000000";

impl Store {
    /// Looks a validator up by id.
    pub fn get_validator(&self, id: u64) -> Result<Validator, Error> {
        let row = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, owner_key, signer_key, activation_epoch, deactivation_epoch
                 FROM validators
                 WHERE id = ?1",
            )?;
            Ok(stmt
                .query_row(params![id as i64], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                        row.get::<_, i64>(3)?,
                        row.get::<_, i64>(4)?,
                    ))
                })
                .optional()?)
        })?;
        match row {
            Some((id, owner, signer, activation_epoch, deactivation_epoch)) => Ok(Validator {
                id: id as u64,
                owner: parse_address(&owner)
                    .map_err(|_| Error::Other(format!("corrupt owner key {:?} in storage", owner)))?,
                signer: parse_address(&signer).map_err(|_| {
                    Error::Other(format!("corrupt signer key {:?} in storage", signer))
                })?,
                activation_epoch: activation_epoch as u64,
                deactivation_epoch: deactivation_epoch as u64,
            }),
            None => Err(Error::ValidatorNotFound),
        }
    }

    /// Resolves a canonical signer key to a validator id.
    pub fn get_validator_id_by_signer(&self, signer_hex: &str) -> Result<u64, Error> {
        let id = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM validators WHERE signer_key LIKE ?1")?;
            Ok(stmt
                .query_row(params![signer_hex], |row| row.get::<_, i64>(0))
                .optional()?)
        })?;
        id.map(|id| id as u64).ok_or(Error::ValidatorNotFound)
    }

    /// The largest real validator id in the registry. The placeholder row is
    /// not a real id. An empty registry yields [`Error::NoRows`].
    pub fn get_max_validator_id(&self) -> Result<u64, Error> {
        let max = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT MAX(id) FROM validators WHERE id > 0")?;
            Ok(stmt.query_row([], |row| row.get::<_, Option<i64>>(0))?)
        })?;
        max.map(|id| id as u64).ok_or(Error::NoRows)
    }

    /// Whether any real validator has been mirrored yet. Id 1 is the oldest
    /// id in the set, so its absence means the registry was never synced.
    pub fn validators_table_empty(&self) -> Result<bool, Error> {
        match self.get_validator(1) {
            Ok(_) => Ok(false),
            Err(Error::ValidatorNotFound) => Ok(true),
            Err(e) => Err(e),
        }
    }

    /// Every signer key in the registry, in canonical form.
    pub fn get_all_validator_signer_keys(&self) -> Result<Vec<String>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT signer_key FROM validators")?;
            let keys = stmt
                .query_map([], |row| row.get::<_, String>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(keys)
        })
    }

    /// Ids of validators already deactivated as of the given checkpoint.
    /// Their registry records can no longer change, so a sync can skip them.
    pub fn get_deactivated_validators(&self, checkpoint: u64) -> Result<Vec<u64>, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id
                 FROM validators
                 WHERE deactivation_epoch != 0
                 AND deactivation_epoch <= ?1
                 AND id > 0",
            )?;
            let ids = stmt
                .query_map(params![checkpoint as i64], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(ids.into_iter().map(|id| id as u64).collect())
        })
    }

    pub fn insert_validator(&self, validator: &Validator) -> Result<(), Error> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO validators(id, owner_key, signer_key, activation_epoch, deactivation_epoch)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
                params![
                    validator.id as i64,
                    address_hex(&validator.owner),
                    address_hex(&validator.signer),
                    validator.activation_epoch as i64,
                    validator.deactivation_epoch as i64,
                ],
            )?;
            Ok(())
        })
    }

    pub fn update_validator(&self, validator: &Validator) -> Result<(), Error> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE validators
                 SET owner_key = ?1, signer_key = ?2, activation_epoch = ?3, deactivation_epoch = ?4
                 WHERE id = ?5",
                params![
                    address_hex(&validator.owner),
                    address_hex(&validator.signer),
                    validator.activation_epoch as i64,
                    validator.deactivation_epoch as i64,
                    validator.id as i64,
                ],
            )?;
            Ok(())
        })
    }

    /// Ensures the placeholder row exists, for checkpoints whose proposer is
    /// unknown to the registry.
    pub fn insert_blank_validator(&self) -> Result<(), Error> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT OR IGNORE INTO validators(id, owner_key, signer_key, activation_epoch, deactivation_epoch)
                 VALUES(-1, ?1, ?1, 0, 0)",
                params![ZERO_ADDRESS],
            )?;
            Ok(())
        })
    }

    /// Reconciles a freshly fetched record with the stored one.
    ///
    /// An identical record is a no-op. A zero owner in the fresh record does
    /// not overwrite a non-zero stored owner: `ownerOf` legitimately reverts
    /// for some validators, and a spurious zero must not erase a known owner.
    pub fn insert_or_update_validator(&self, validator: &Validator) -> Result<(), Error> {
        let stored = match self.get_validator(validator.id) {
            Ok(stored) => stored,
            Err(Error::ValidatorNotFound) => return self.insert_validator(validator),
            Err(e) => return Err(e),
        };

        if *validator == stored {
            return Ok(());
        }

        let mut candidate = validator.clone();
        if candidate.owner.is_zero() && !stored.owner.is_zero() {
            candidate.owner = stored.owner;
            if candidate == stored {
                return Ok(());
            }
        }

        info!(
            "Validator with ID {} is being updated: {}",
            candidate.id,
            candidate.describe_diff(&stored)
        );
        self.update_validator(&candidate)
    }
}

#[cfg(test)]
mod tests {
    use crate::test_util::{memory_store, validator};
    use ethereum_types::Address;
    use monitor_types::{address_hex, Error, TrackedKeys};

    #[test]
    fn validators_round_trip() {
        let store = memory_store(TrackedKeys::All);
        let v = validator(3, Address::repeat_byte(0x0c));
        store.insert_validator(&v).unwrap();
        assert_eq!(store.get_validator(3).unwrap(), v);
        assert!(matches!(
            store.get_validator(4),
            Err(Error::ValidatorNotFound)
        ));
    }

    #[test]
    fn signer_lookup_ignores_case() {
        let store = memory_store(TrackedKeys::All);
        let v = validator(5, Address::repeat_byte(0xAB));
        store.insert_validator(&v).unwrap();
        assert_eq!(
            store
                .get_validator_id_by_signer("0xABABABABABABABABABABABABABABABABABABABAB")
                .unwrap(),
            5
        );
        assert!(matches!(
            store.get_validator_id_by_signer("0x0101010101010101010101010101010101010101"),
            Err(Error::ValidatorNotFound)
        ));
    }

    #[test]
    fn max_id_skips_the_placeholder_row() {
        let store = memory_store(TrackedKeys::All);
        assert!(matches!(store.get_max_validator_id(), Err(Error::NoRows)));
        store.insert_blank_validator().unwrap();
        assert!(matches!(store.get_max_validator_id(), Err(Error::NoRows)));
        store
            .insert_validator(&validator(9, Address::repeat_byte(1)))
            .unwrap();
        assert_eq!(store.get_max_validator_id().unwrap(), 9);
    }

    #[test]
    fn blank_validator_insert_is_idempotent() {
        let store = memory_store(TrackedKeys::All);
        store.insert_blank_validator().unwrap();
        store.insert_blank_validator().unwrap();
        let keys = store.get_all_validator_signer_keys().unwrap();
        assert_eq!(keys.len(), 1);
        assert_eq!(keys[0], "0x0000000000000000000000000000000000000000");
    }

    #[test]
    fn identical_record_is_a_noop_update() {
        let store = memory_store(TrackedKeys::All);
        let v = validator(2, Address::repeat_byte(2));
        store.insert_validator(&v).unwrap();
        store.insert_or_update_validator(&v).unwrap();
        assert_eq!(store.get_validator(2).unwrap(), v);
    }

    #[test]
    fn zero_owner_does_not_clobber_a_known_owner() {
        let store = memory_store(TrackedKeys::All);
        let mut v = validator(2, Address::repeat_byte(2));
        store.insert_validator(&v).unwrap();

        // fresh record: owner dropped to zero, validator deactivated
        v.owner = Address::zero();
        v.deactivation_epoch = 123;
        store.insert_or_update_validator(&v).unwrap();

        let stored = store.get_validator(2).unwrap();
        assert_eq!(stored.owner, Address::repeat_byte(0xaa));
        assert_eq!(stored.deactivation_epoch, 123);
    }

    #[test]
    fn changed_record_is_rewritten() {
        let store = memory_store(TrackedKeys::All);
        let mut v = validator(2, Address::repeat_byte(2));
        store.insert_validator(&v).unwrap();
        v.signer = Address::repeat_byte(7);
        store.insert_or_update_validator(&v).unwrap();
        assert_eq!(
            address_hex(&store.get_validator(2).unwrap().signer),
            address_hex(&Address::repeat_byte(7))
        );
    }

    #[test]
    fn deactivated_set_is_bounded_by_checkpoint() {
        let store = memory_store(TrackedKeys::All);
        let active = validator(1, Address::repeat_byte(1));
        let mut old = validator(2, Address::repeat_byte(2));
        old.deactivation_epoch = 500;
        let mut recent = validator(3, Address::repeat_byte(3));
        recent.deactivation_epoch = 900;
        for v in [&active, &old, &recent] {
            store.insert_validator(v).unwrap();
        }

        assert_eq!(store.get_deactivated_validators(700).unwrap(), vec![2]);
        assert_eq!(
            store.get_deactivated_validators(1000).unwrap(),
            vec![2, 3]
        );
        assert!(store.get_deactivated_validators(100).unwrap().is_empty());
    }
}
