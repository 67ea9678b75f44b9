//! Signer capability and request authentication
//!
//! A `Signer` proves that the current call originates from one account.
//! Hosts turn a `SetMessageRequest` into a `Signer` through
//! `Authenticator::authenticate`; the record store never takes a bare
//! address in its place.

use ed25519_dalek::{Signature, Verifier, VerifyingKey};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::account::address::AccountAddress;
use crate::account::error::{AccountError, AccountResult};

/// Domain tag prefixed to every signed set-message payload
const SET_MESSAGE_DOMAIN: &[u8] = b"MSGSTORE::SetMessage";

/// Authenticated caller identity.
///
/// Not `Clone`, not deserializable, and without a public constructor.
#[derive(Debug, PartialEq, Eq)]
pub struct Signer {
    address: AccountAddress,
}

impl Signer {
    pub(crate) fn new(address: AccountAddress) -> Self {
        Signer { address }
    }

    pub fn address(&self) -> AccountAddress {
        self.address
    }
}

/// A caller's signed request to replace its own message
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetMessageRequest {
    pub sender: AccountAddress,
    pub public_key: [u8; 32],
    pub message: String,
    /// 64-byte Ed25519 signature over `signing_payload(sender, message)`
    pub signature: Vec<u8>,
}

/// Bytes covered by a set-message signature
pub fn signing_payload(sender: &AccountAddress, message: &str) -> Vec<u8> {
    let mut payload =
        Vec::with_capacity(SET_MESSAGE_DOMAIN.len() + AccountAddress::LENGTH + message.len());
    payload.extend_from_slice(SET_MESSAGE_DOMAIN);
    payload.extend_from_slice(sender.as_bytes());
    payload.extend_from_slice(message.as_bytes());
    payload
}

/// The trusted boundary that mints `Signer` tokens
#[derive(Debug, Default, Clone, Copy)]
pub struct Authenticator;

impl Authenticator {
    pub fn new() -> Self {
        Authenticator
    }

    /// Verify that `request` was signed by the key controlling `request.sender`
    pub fn authenticate(&self, request: &SetMessageRequest) -> AccountResult<Signer> {
        let verifying_key = VerifyingKey::from_bytes(&request.public_key)
            .map_err(|e| AccountError::InvalidPublicKey(e.to_string()))?;

        let derived = AccountAddress::from_public_key(&request.public_key);
        if derived != request.sender {
            warn!(sender = %request.sender, %derived, "rejected request: key does not own sender");
            return Err(AccountError::AddressMismatch {
                sender: request.sender,
                derived,
            });
        }

        let signature = Signature::from_slice(&request.signature)
            .map_err(|_| AccountError::InvalidSignature(request.sender))?;

        let payload = signing_payload(&request.sender, &request.message);
        if verifying_key.verify(&payload, &signature).is_err() {
            warn!(sender = %request.sender, "rejected request: bad signature");
            return Err(AccountError::InvalidSignature(request.sender));
        }

        Ok(Signer::new(request.sender))
    }
}
