// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Checkpoint and signed-checkpoint half of the store.

use std::collections::HashMap;

use ethereum_types::Address;
use log::warn;
use rusqlite::{params, OptionalExtension};

use monitor_types::{address_hex, Error, NewHeaderBlockEvent, ProposerId, TrackedKeys};

use crate::Store;

impl Store {
    fn get_checkpoint_id(&self, number: u64) -> Result<i64, Error> {
        let id = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT id FROM checkpoints WHERE number = ?1")?;
            Ok(stmt
                .query_row(params![number as i64], |row| row.get::<_, i64>(0))
                .optional()?)
        })?;
        id.ok_or_else(|| {
            Error::CheckpointNotFound(format!("checkpoint {} not present in storage", number))
        })
    }

    fn checkpoint_exists(&self, number: u64) -> Result<bool, Error> {
        match self.get_checkpoint_id(number) {
            Ok(_) => Ok(true),
            Err(Error::CheckpointNotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Records a checkpoint. Inserting a number that is already present is a
    /// no-op, which keeps range replays idempotent.
    ///
    /// The proposer is resolved through its current signer key; when the
    /// registry does not know it the checkpoint is attributed to the
    /// placeholder row, which is created on demand.
    pub fn insert_checkpoint(
        &self,
        event: &NewHeaderBlockEvent,
        timestamp: u64,
    ) -> Result<(), Error> {
        if self.checkpoint_exists(event.checkpoint_number)? {
            return Ok(());
        }

        let proposer = match self.get_validator_id_by_signer(&address_hex(&event.proposer)) {
            Ok(id) => ProposerId::Validator(id),
            Err(Error::ValidatorNotFound) => {
                warn!(
                    "Could not find a validator ID for proposer with signing key {}. \
                     The signing key has most likely been changed.",
                    address_hex(&event.proposer)
                );
                self.insert_blank_validator()?;
                ProposerId::Unknown
            }
            Err(e) => return Err(e),
        };

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO checkpoints(number, block_number, timestamp, proposer_id, reward)
                 VALUES(?1, ?2, ?3, ?4, ?5)",
                params![
                    event.checkpoint_number as i64,
                    event.block_number as i64,
                    timestamp as i64,
                    proposer.as_i64(),
                    event.reward.low_u64() as i64,
                ],
            )?;
            Ok(())
        })
    }

    /// Records which validators signed the checkpoint.
    ///
    /// With `temp` set the rows go to the rolling table and every resolvable
    /// signer is kept; otherwise the rows go to the tracked table, gated by
    /// the configured key set. Signers the registry cannot resolve are
    /// skipped with a warning. Already-present pairs are left alone.
    pub fn insert_validators_signed_checkpoint(
        &self,
        number: u64,
        signers: &[Address],
        temp: bool,
    ) -> Result<(), Error> {
        if !temp && self.tracked().is_none() {
            warn!(
                "No public keys provided in config to track. The tool will not be tracking \
                 the performance of any validator."
            );
            return Ok(());
        }

        let checkpoint_id = self.get_checkpoint_id(number)?;
        for signer in signers {
            let signer_hex = address_hex(signer);
            if !temp && !self.tracked().contains(&signer_hex) {
                continue;
            }
            let validator_id = match self.get_validator_id_by_signer(&signer_hex) {
                Ok(id) => id,
                Err(Error::ValidatorNotFound) => {
                    warn!(
                        "Could not find validator with signer key {} in storage. This \
                         validator most likely changed the signing key.",
                        signer_hex
                    );
                    continue;
                }
                Err(e) => return Err(e),
            };
            if self.signed_row_exists(checkpoint_id, validator_id, temp)? {
                continue;
            }
            let statement = if temp {
                "INSERT INTO temp_validators_signed_checkpoints(checkpoint_id, validator_id)
                 VALUES(?1, ?2)"
            } else {
                "INSERT INTO validators_signed_checkpoints(checkpoint_id, validator_id)
                 VALUES(?1, ?2)"
            };
            self.with_conn(|conn| {
                conn.execute(statement, params![checkpoint_id, validator_id as i64])?;
                Ok(())
            })?;
        }
        Ok(())
    }

    fn signed_row_exists(
        &self,
        checkpoint_id: i64,
        validator_id: u64,
        temp: bool,
    ) -> Result<bool, Error> {
        let statement = if temp {
            "SELECT id FROM temp_validators_signed_checkpoints
             WHERE checkpoint_id = ?1 AND validator_id = ?2"
        } else {
            "SELECT id FROM validators_signed_checkpoints
             WHERE checkpoint_id = ?1 AND validator_id = ?2"
        };
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(statement)?;
            let row = stmt
                .query_row(params![checkpoint_id, validator_id as i64], |row| {
                    row.get::<_, i64>(0)
                })
                .optional()?;
            Ok(row.is_some())
        })
    }

    /// Whether the rolling table holds any signer rows for the checkpoint
    /// with the given number.
    pub fn check_if_checkpoint_exists_in_temp(&self, number: u64) -> Result<bool, Error> {
        let checkpoint_id = self.get_checkpoint_id(number)?;
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT checkpoint_id FROM temp_validators_signed_checkpoints
                 WHERE checkpoint_id = ?1",
            )?;
            let row = stmt
                .query_row(params![checkpoint_id], |row| row.get::<_, i64>(0))
                .optional()?;
            Ok(row.is_some())
        })
    }

    /// Drops rolling rows for checkpoints numbered below `end_number`.
    pub fn delete_temp_checkpoints(&self, end_number: u64) -> Result<(), Error> {
        self.with_conn(|conn| {
            conn.execute(
                "DELETE FROM temp_validators_signed_checkpoints
                 WHERE checkpoint_id IN (
                     SELECT id
                     FROM checkpoints
                     WHERE number < ?1
                 )",
                params![end_number as i64],
            )?;
            Ok(())
        })
    }

    /// Per-validator signing counts over the rolling table for the inclusive
    /// checkpoint-number range, along with the number of checkpoints known in
    /// that range.
    pub fn get_signed_checkpoints_count_per_validator(
        &self,
        start_number: u64,
        end_number: u64,
    ) -> Result<(u64, HashMap<u64, u64>), Error> {
        let total = self.checkpoints_in_range(start_number, end_number)?;
        let counts = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT v.id, COUNT(*)
                 FROM temp_validators_signed_checkpoints vc
                 LEFT JOIN checkpoints c
                 ON vc.checkpoint_id = c.id
                 LEFT JOIN validators v
                 ON vc.validator_id = v.id
                 WHERE c.number >= ?1
                 AND c.number <= ?2
                 GROUP BY v.id",
            )?;
            let rows = stmt
                .query_map(params![start_number as i64, end_number as i64], |row| {
                    Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rows)
        })?;
        Ok((
            total,
            counts
                .into_iter()
                .map(|(id, count)| (id as u64, count as u64))
                .collect(),
        ))
    }

    /// Writes the benchmark computed as of the given checkpoint.
    pub fn insert_performance_benchmark(&self, pb: f64, number: u64) -> Result<(), Error> {
        self.with_conn(|conn| {
            conn.execute(
                "UPDATE checkpoints
                 SET performance_benchmark = ?1
                 WHERE number = ?2",
                params![pb, number as i64],
            )?;
            Ok(())
        })
    }

    /// Largest checkpoint number on record; [`Error::NoRows`] when none.
    pub fn get_last_checkpoint_number(&self) -> Result<u64, Error> {
        let max = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT MAX(number) FROM checkpoints")?;
            Ok(stmt.query_row([], |row| row.get::<_, Option<i64>>(0))?)
        })?;
        max.map(|number| number as u64).ok_or(Error::NoRows)
    }

    /// Block number of the most recently recorded checkpoint;
    /// [`Error::NoRows`] when none.
    pub fn get_last_block_number(&self) -> Result<u64, Error> {
        let max = self.with_conn(|conn| {
            let mut stmt = conn.prepare("SELECT MAX(block_number) FROM checkpoints")?;
            Ok(stmt.query_row([], |row| row.get::<_, Option<i64>>(0))?)
        })?;
        max.map(|number| number as u64).ok_or(Error::NoRows)
    }

    /// Benchmark stored for the given checkpoint number. [`Error::NoRows`]
    /// when the row exists but no benchmark was computed for it.
    pub fn get_pb_at_checkpoint(&self, number: u64) -> Result<f64, Error> {
        let pb = self.with_conn(|conn| {
            let mut stmt =
                conn.prepare("SELECT performance_benchmark FROM checkpoints WHERE number = ?1")?;
            Ok(stmt
                .query_row(params![number as i64], |row| {
                    row.get::<_, Option<f64>>(0)
                })
                .optional()?)
        })?;
        match pb {
            Some(Some(pb)) => Ok(pb),
            Some(None) => Err(Error::NoRows),
            None => Err(Error::CheckpointNotFound(format!(
                "checkpoint {} not present in storage",
                number
            ))),
        }
    }

    /// The lowest checkpoint number in the inclusive range that the given
    /// signer did **not** sign, per the rolling table.
    pub fn get_first_missed_checkpoint_range(
        &self,
        signer_hex: &str,
        start_number: u64,
        end_number: u64,
    ) -> Result<u64, Error> {
        let validator_id = self.get_validator_id_by_signer(signer_hex)?;
        let first = self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT MIN(c.number)
                 FROM checkpoints c
                 LEFT JOIN temp_validators_signed_checkpoints vc
                 ON vc.checkpoint_id = c.id AND vc.validator_id = ?1
                 WHERE c.number >= ?2
                 AND c.number <= ?3
                 AND vc.checkpoint_id IS NULL",
            )?;
            Ok(stmt.query_row(
                params![validator_id as i64, start_number as i64, end_number as i64],
                |row| row.get::<_, Option<i64>>(0),
            )?)
        })?;
        first.map(|number| number as u64).ok_or_else(|| {
            Error::CheckpointNotFound("first missed checkpoint not found".into())
        })
    }

    fn checkpoints_in_range(&self, start_number: u64, end_number: u64) -> Result<u64, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn
                .prepare("SELECT COUNT(*) FROM checkpoints WHERE number >= ?1 AND number <= ?2")?;
            let count = stmt.query_row(params![start_number as i64, end_number as i64], |row| {
                row.get::<_, i64>(0)
            })?;
            Ok(count as u64)
        })
    }

    fn signed_checkpoints_count(
        &self,
        start_number: u64,
        end_number: u64,
        signer_hex: &str,
    ) -> Result<u64, Error> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT COUNT(*)
                 FROM validators_signed_checkpoints vc
                 LEFT JOIN checkpoints c
                 ON vc.checkpoint_id = c.id
                 LEFT JOIN validators v
                 ON vc.validator_id = v.id
                 WHERE c.number >= ?1
                 AND c.number <= ?2
                 AND v.signer_key LIKE ?3",
            )?;
            let count = stmt.query_row(
                params![start_number as i64, end_number as i64, signer_hex],
                |row| row.get::<_, i64>(0),
            )?;
            Ok(count as u64)
        })
    }

    /// Checkpoint totals and per-tracked-signer signing counts over the
    /// tracked table for the inclusive range. The wildcard expands to every
    /// signer key in the registry.
    pub fn get_checkpoint_count(
        &self,
        start_number: u64,
        end_number: u64,
    ) -> Result<(u64, HashMap<String, u64>), Error> {
        let total = self.checkpoints_in_range(start_number, end_number)?;
        let keys = match self.tracked() {
            TrackedKeys::None => return Ok((total, HashMap::new())),
            TrackedKeys::All => self.get_all_validator_signer_keys()?,
            TrackedKeys::Keys(keys) => keys.clone(),
        };
        let mut counts = HashMap::with_capacity(keys.len());
        for key in keys {
            let signed = self.signed_checkpoints_count(start_number, end_number, &key)?;
            counts.insert(key, signed);
        }
        Ok((total, counts))
    }
}
