// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

//! Long-running monitor for checkpoint submissions on the settlement chain.
//!
//! The ingest loop discovers `NewHeaderBlock` events on the Rootchain,
//! recovers the validators that signed each checkpoint, mirrors the
//! StakeManager registry as of the submission block, maintains a rolling
//! 700-checkpoint performance benchmark, and republishes everything as
//! Prometheus gauges.

pub mod config;
pub mod ingest;
pub mod metrics;
pub mod performance;
pub mod sync;
