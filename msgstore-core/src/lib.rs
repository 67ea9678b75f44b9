//! Per-account message records with change auditing.
//!
//! Every account may hold one text message. Reads are open to anyone;
//! writes require a `Signer` for the account being written. Replacing an
//! existing message emits a `MessageChangeEvent` to the host's event log.

pub mod account;
pub mod config;
pub mod host;
pub mod logging;
pub mod record_store;

#[cfg(test)]
pub(crate) mod test_utils;

pub use account::{AccountAddress, AccountKeypair, Authenticator, SetMessageRequest, Signer};
pub use config::Config;
pub use host::{HostError, LocalHost};
pub use logging::{init_logging_with_config, LogConfig, LogLevel};
pub use record_store::{MessageChangeEvent, RecordStore, StoreError, StoreResult};
