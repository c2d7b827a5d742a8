// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Prometheus exposition of the monitor's state.
//!
//! The ingest path writes the gauges; the HTTP server only encodes the
//! registry, so the two sides share nothing but the atomic gauge cells.

use std::convert::Infallible;
use std::net::SocketAddr;

use hyper::{
    header::CONTENT_TYPE,
    service::{make_service_fn, service_fn},
    Body, Method, Request, Response, Server, StatusCode,
};
use lazy_static::lazy_static;
use log::warn;
use prometheus::{
    register_gauge, register_gauge_vec, Encoder, Gauge, GaugeVec, TextEncoder,
};

use monitor_store::Store;
use monitor_types::{constants::PB_WINDOW, Error};

use crate::performance;

lazy_static! {
    pub static ref CHECKPOINTS_SIGNED: GaugeVec = register_gauge_vec!(
        "checkpoints_signed",
        "The number of checkpoints signed by a validator for the given range",
        &["validator", "range"]
    )
    .expect("metric registration only happens once");
    pub static ref CHECKPOINTS_TOTAL: GaugeVec = register_gauge_vec!(
        "checkpoints_total",
        "The total number of checkpoints for the given range",
        &["range"]
    )
    .expect("metric registration only happens once");
    pub static ref VALIDATOR_PERFORMANCE: GaugeVec = register_gauge_vec!(
        "validator_performance",
        "The percentage of checkpoints signed for the given range",
        &["validator", "range"]
    )
    .expect("metric registration only happens once");
    pub static ref CURRENT_CHECKPOINT: Gauge = register_gauge!(
        "current_checkpoint",
        "The latest checkpoint processed by the monitor"
    )
    .expect("metric registration only happens once");
    pub static ref CURRENT_BLOCK_NUMBER: Gauge = register_gauge!(
        "current_block_number",
        "The latest ETH block number processed by the monitor"
    )
    .expect("metric registration only happens once");
    pub static ref CURRENT_PERFORMANCE_BENCHMARK: Gauge = register_gauge!(
        "current_performance_benchmark",
        "The performance benchmark as of the last checkpoint processed by the monitor"
    )
    .expect("metric registration only happens once");
    pub static ref CHECKPOINTS_TO_PB: GaugeVec = register_gauge_vec!(
        "checkpoints_to_performance_benchmark",
        "How many checkpoints the associated validator must miss to fall below the performance benchmark",
        &["validator"]
    )
    .expect("metric registration only happens once");
    pub static ref CHECKPOINTS_TO_REDUCTION: GaugeVec = register_gauge_vec!(
        "checkpoints_to_reduction",
        "How many checkpoints the associated validator has to go through until it gets the first improvement in PB",
        &["validator"]
    )
    .expect("metric registration only happens once");
}

/// Refreshes every checkpoint- and performance-related gauge from storage.
/// An empty store is not an error; there is simply nothing to publish yet.
pub fn update_checkpoints_signed(store: &Store) -> Result<(), Error> {
    let last = match store.get_last_checkpoint_number() {
        Ok(last) => last,
        Err(Error::NoRows) => {
            warn!("Storage is empty, no metrics to update.");
            return Ok(());
        }
        Err(e) => return Err(e),
    };
    CURRENT_CHECKPOINT.set(last as f64);

    let window_start = last.saturating_sub(PB_WINDOW - 1);
    let (window_total, window_counts) = store.get_checkpoint_count(window_start, last)?;
    CHECKPOINTS_TOTAL
        .with_label_values(&["700"])
        .set(window_total as f64);
    for (signer, signed) in &window_counts {
        CHECKPOINTS_SIGNED
            .with_label_values(&[signer.as_str(), "700"])
            .set(*signed as f64);
        VALIDATOR_PERFORMANCE
            .with_label_values(&[signer.as_str(), "700"])
            .set(*signed as f64 / window_total as f64);
    }

    let (full_total, full_counts) = store.get_checkpoint_count(0, last)?;
    CHECKPOINTS_TOTAL
        .with_label_values(&["total"])
        .set(full_total as f64);
    for (signer, signed) in &full_counts {
        CHECKPOINTS_SIGNED
            .with_label_values(&[signer.as_str(), "total"])
            .set(*signed as f64);
        VALIDATOR_PERFORMANCE
            .with_label_values(&[signer.as_str(), "total"])
            .set(*signed as f64 / full_total as f64);
    }

    let pb = match store.get_pb_at_checkpoint(last) {
        Ok(pb) => pb,
        // no benchmark on record as of the last checkpoint; the projection
        // gauges keep their previous values
        Err(Error::NoRows) | Err(Error::CheckpointNotFound(_)) => return Ok(()),
        Err(e) => return Err(e),
    };
    for (signer, signed) in &window_counts {
        CHECKPOINTS_TO_PB
            .with_label_values(&[signer.as_str()])
            .set(performance::checkpoints_to_pb(pb, *signed) as f64);
        if *signed == PB_WINDOW {
            CHECKPOINTS_TO_REDUCTION
                .with_label_values(&[signer.as_str()])
                .set(0.0);
        } else {
            let remaining = performance::checkpoints_to_reduction(store, signer, last)?;
            CHECKPOINTS_TO_REDUCTION
                .with_label_values(&[signer.as_str()])
                .set(remaining as f64);
        }
    }
    Ok(())
}

/// Serves `GET /metrics` until the process exits.
pub async fn serve(port: u16) -> Result<(), Error> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    let make_svc =
        make_service_fn(|_conn| async { Ok::<_, Infallible>(service_fn(handle_request)) });
    let server = Server::try_bind(&addr)
        .map_err(|e| Error::Other(format!("unable to bind metrics endpoint on {}: {}", addr, e)))?;
    server
        .serve(make_svc)
        .await
        .map_err(|e| Error::Other(format!("metrics server failed: {}", e)))
}

async fn handle_request(request: Request<Body>) -> Result<Response<Body>, Infallible> {
    if request.method() != Method::GET || request.uri().path() != "/metrics" {
        let response = Response::builder()
            .status(StatusCode::NOT_FOUND)
            .body(Body::empty())
            .unwrap_or_default();
        return Ok(response);
    }

    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    let response = match encoder.encode(&prometheus::gather(), &mut buffer) {
        Ok(()) => Response::builder()
            .header(CONTENT_TYPE, encoder.format_type())
            .body(Body::from(buffer))
            .unwrap_or_default(),
        Err(e) => Response::builder()
            .status(StatusCode::INTERNAL_SERVER_ERROR)
            .body(Body::from(format!("encoding error: {}", e)))
            .unwrap_or_default(),
    };
    Ok(response)
}
