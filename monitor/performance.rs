// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! The rolling performance benchmark.
//!
//! For a checkpoint `N` the benchmark is 95% of the median signing fraction
//! over `[N − 699, N]`, computed across every validator present in the
//! rolling table. It is only computed once the whole window is on record,
//! and is written into the checkpoint row exactly once.

use log::info;

use monitor_store::Store;
use monitor_types::{constants::PB_WINDOW, Error};

/// Computes and persists the benchmark as of checkpoint `number`.
///
/// Fails with [`Error::CheckpointNotFound`] when the rolling table does not
/// reach back to `number − 699`; the caller treats that as "not yet", not as
/// a fault.
pub fn calculate_and_insert(store: &Store, number: u64) -> Result<f64, Error> {
    let window_start = match number.checked_sub(PB_WINDOW - 1) {
        Some(start) if start > 0 => start,
        _ => {
            return Err(Error::CheckpointNotFound(
                "missing performance information for the past 700 checkpoints".into(),
            ))
        }
    };
    if !store.check_if_checkpoint_exists_in_temp(window_start)? {
        return Err(Error::CheckpointNotFound(
            "missing performance information for the past 700 checkpoints".into(),
        ));
    }

    // one checkpoint beyond the window is kept, to tolerate a replayed step
    store.delete_temp_checkpoints(number - PB_WINDOW)?;

    let (total, per_validator) =
        store.get_signed_checkpoints_count_per_validator(window_start, number)?;
    let fractions: Vec<f64> = per_validator
        .values()
        .map(|&signed| signed as f64 / total as f64)
        .collect();
    let pb = median(&fractions) * 0.95;

    let mut below_threshold = Vec::new();
    for (&validator_id, &signed) in &per_validator {
        let fraction = signed as f64 / total as f64;
        let validator = store.get_validator(validator_id)?;
        if validator.deactivation_epoch == 0
            && validator.activation_epoch <= window_start
            && fraction < pb
        {
            below_threshold.push((validator_id, fraction));
        }
    }
    if !below_threshold.is_empty() {
        below_threshold.sort_by(|a, b| a.0.cmp(&b.0));
        let summary = below_threshold
            .iter()
            .map(|(id, fraction)| format!("{} = {:.5}", id, fraction * 100.0))
            .collect::<Vec<_>>()
            .join(", ");
        info!("Validator(s) below PB threshold: {}", summary);
    }

    store.insert_performance_benchmark(pb, number)?;
    Ok(pb)
}

/// Median of the samples; the arithmetic mean of the two middle values when
/// the count is even, `0` for empty input.
pub fn median(data: &[f64]) -> f64 {
    if data.is_empty() {
        return 0.0;
    }
    let mut sorted = data.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// How many more checkpoints the validator can afford to miss before its
/// signed count falls to the benchmark level, assuming a full 700-window.
pub fn checkpoints_to_pb(pb: f64, signed: u64) -> u64 {
    let benchmark_signed = (pb * PB_WINDOW as f64).floor() as u64;
    signed.saturating_sub(benchmark_signed)
}

/// How many checkpoints remain until the validator's oldest miss in the
/// window ages out, improving its fraction.
pub fn checkpoints_to_reduction(
    store: &Store,
    signer_hex: &str,
    last_checkpoint: u64,
) -> Result<u64, Error> {
    let first_missed = store.get_first_missed_checkpoint_range(
        signer_hex,
        last_checkpoint - (PB_WINDOW - 1),
        last_checkpoint,
    )?;
    Ok(first_missed + PB_WINDOW - last_checkpoint)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ethereum_types::Address;
    use monitor_store::Store;
    use monitor_types::{NewHeaderBlockEvent, TrackedKeys, Validator};

    fn store_with_validators(signers: &[Address]) -> Store {
        let store = Store::open(":memory:", TrackedKeys::All).unwrap();
        store.create_schema().unwrap();
        for (index, signer) in signers.iter().enumerate() {
            store
                .insert_validator(&Validator {
                    id: index as u64 + 1,
                    owner: Address::repeat_byte(0xaa),
                    signer: *signer,
                    activation_epoch: 1,
                    deactivation_epoch: 0,
                })
                .unwrap();
        }
        store
    }

    fn record_checkpoint(store: &Store, number: u64, signers: &[Address]) {
        let event = NewHeaderBlockEvent {
            tx_hash: ethereum_types::H256::repeat_byte(1),
            proposer: signers[0],
            checkpoint_number: number,
            reward: 1.into(),
            block_number: 14_000_000 + number,
        };
        store.insert_checkpoint(&event, 1_650_000_000 + number).unwrap();
        store
            .insert_validators_signed_checkpoint(number, signers, true)
            .unwrap();
    }

    #[test]
    fn median_of_odd_even_and_empty_inputs() {
        assert_eq!(median(&[]), 0.0);
        assert_eq!(median(&[0.4]), 0.4);
        assert_eq!(median(&[0.9, 0.1, 0.5]), 0.5);
        assert!((median(&[0.2, 0.4, 0.6, 0.8]) - 0.5).abs() < 1e-12);
    }

    #[test]
    fn full_window_of_perfect_signers_yields_095() {
        let signers = [Address::repeat_byte(1), Address::repeat_byte(2)];
        let store = store_with_validators(&signers);
        for number in 301..=1000 {
            record_checkpoint(&store, number, &signers);
        }

        let pb = calculate_and_insert(&store, 1000).unwrap();
        assert!((pb - 0.95).abs() < 1e-12);
        assert!((store.get_pb_at_checkpoint(1000).unwrap() - 0.95).abs() < 1e-12);

        // rows below N - 700 were pruned; the extra one at N - 700 survives
        assert!(store.check_if_checkpoint_exists_in_temp(301).unwrap());
    }

    #[test]
    fn prune_keeps_one_checkpoint_beyond_the_window() {
        let signers = [Address::repeat_byte(1)];
        let store = store_with_validators(&signers);
        for number in 299..=1000 {
            record_checkpoint(&store, number, &signers);
        }

        calculate_and_insert(&store, 1000).unwrap();
        assert!(!store.check_if_checkpoint_exists_in_temp(299).unwrap());
        assert!(store.check_if_checkpoint_exists_in_temp(300).unwrap());
    }

    #[test]
    fn short_window_is_reported_as_missing() {
        let signers = [Address::repeat_byte(1)];
        let store = store_with_validators(&signers);
        for number in 800..=1000 {
            record_checkpoint(&store, number, &signers);
        }
        assert!(matches!(
            calculate_and_insert(&store, 1000),
            Err(Error::CheckpointNotFound(_))
        ));
        assert!(matches!(
            store.get_pb_at_checkpoint(1000),
            Err(Error::NoRows)
        ));
    }

    #[test]
    fn early_numbers_cannot_have_a_window() {
        let signers = [Address::repeat_byte(1)];
        let store = store_with_validators(&signers);
        assert!(matches!(
            calculate_and_insert(&store, 400),
            Err(Error::CheckpointNotFound(_))
        ));
    }

    #[test]
    fn checkpoints_to_pb_measures_slack_above_the_benchmark() {
        // pb of 0.95 over 700 checkpoints floors to 665 signed
        assert_eq!(checkpoints_to_pb(0.95, 700), 35);
        assert_eq!(checkpoints_to_pb(0.95, 665), 0);
        assert_eq!(checkpoints_to_pb(0.95, 600), 0);
        assert_eq!(checkpoints_to_pb(0.0, 0), 0);
    }

    #[test]
    fn reduction_counts_until_the_oldest_miss_ages_out() {
        let signer = Address::repeat_byte(1);
        let other = Address::repeat_byte(2);
        let store = store_with_validators(&[signer, other]);
        for number in 301..=1000 {
            // validator 1 misses checkpoint 400
            if number == 400 {
                record_checkpoint(&store, number, &[other]);
            } else {
                record_checkpoint(&store, number, &[signer, other]);
            }
        }

        let remaining = checkpoints_to_reduction(
            &store,
            &monitor_types::address_hex(&signer),
            1000,
        )
        .unwrap();
        assert_eq!(remaining, 400 + 700 - 1000);
    }
}
