//! Account identity
//!
//! Addresses, key material, and the `Signer` capability token. A `Signer`
//! is the only thing `RecordStore::set_message` accepts as proof of who is
//! writing, and outside this module only `Authenticator` can mint one.

pub mod address;
pub mod error;
pub mod keypair;
pub mod signer;

pub use address::AccountAddress;
pub use error::{AccountError, AccountResult};
pub use keypair::AccountKeypair;
pub use signer::{signing_payload, Authenticator, SetMessageRequest, Signer};
