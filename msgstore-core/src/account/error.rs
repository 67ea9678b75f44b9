/*
    error.rs - Errors raised at the authentication boundary
*/

use crate::account::address::AccountAddress;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AccountError {
    /// Address text could not be parsed
    #[error("Invalid account address: {0}")]
    InvalidAddress(String),

    /// Public key bytes are not a valid Ed25519 point
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// Public key does not derive the claimed sender
    #[error("Public key derives {derived}, not sender {sender}")]
    AddressMismatch {
        sender: AccountAddress,
        derived: AccountAddress,
    },

    /// Signature does not verify over the request payload
    #[error("Signature verification failed for {0}")]
    InvalidSignature(AccountAddress),

    /// Key file contents are inconsistent or malformed
    #[error("Invalid key file: {0}")]
    InvalidKeyFile(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type AccountResult<T> = Result<T, AccountError>;
