// Copyright 2021 The OpenEthereum Authors.
// Licensed under the Apache License, Version 2.0.

use quick_error::quick_error;

quick_error! {
    /// Every failure the monitor can observe, as a closed set so callers can
    /// branch on the kind exhaustively.
    #[derive(Debug)]
    pub enum Error {
        /// The ETH node could not be reached, or answered with garbage.
        Dial(msg: String) {
            display("unable to reach the ETH node: {}", msg)
        }
        /// A transaction could not be fetched by hash.
        TxHash(msg: String) {
            display("unable to fetch transaction: {}", msg)
        }
        /// The queried transaction has not been mined yet.
        PendingTx {
            display("transaction is still pending")
        }
        /// A log query over a block range matched nothing.
        NoLogsFound {
            display("no logs found for the given period")
        }
        /// A view call reverted. Carries the node's revert message.
        Revert(msg: String) {
            display("contract call reverted: {}", msg)
        }
        /// The validator is not present in storage.
        ValidatorNotFound {
            display("validator was not found in storage")
        }
        /// The checkpoint is not present in storage.
        CheckpointNotFound(msg: String) {
            display("checkpoint not found: {}", msg)
        }
        /// An aggregate over an empty table.
        NoRows {
            display("query returned no rows")
        }
        /// A contract payload did not decode against the expected ABI.
        Abi(err: ethabi::Error) {
            from()
            display("abi error: {}", err)
        }
        /// A checkpoint signature could not be processed.
        Crypto(msg: String) {
            display("signature error: {}", msg)
        }
        /// The storage engine failed.
        Store(err: rusqlite::Error) {
            from()
            display("storage error: {}", err)
        }
        /// The configuration file could not be used.
        Config(msg: String) {
            display("configuration error: {}", msg)
        }
        /// Anything else; fatal at the ingest boundary.
        Other(msg: String) {
            display("{}", msg)
        }
    }
}

impl Error {
    /// True for the transport failures a retry can reasonably fix.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Dial(_) | Error::TxHash(_) | Error::PendingTx
        )
    }
}

#[cfg(test)]
mod tests {
    use super::Error;

    #[test]
    fn transport_errors_are_transient() {
        assert!(Error::Dial("refused".into()).is_transient());
        assert!(Error::TxHash("missing".into()).is_transient());
        assert!(Error::PendingTx.is_transient());
        assert!(!Error::Revert("execution reverted".into()).is_transient());
        assert!(!Error::NoLogsFound.is_transient());
        assert!(!Error::ValidatorNotFound.is_transient());
    }
}
