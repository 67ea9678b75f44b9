//! Account key material
//!
//! Ed25519 signing keys and their on-disk key file. The secret seed is
//! zeroized when dropped.

use ed25519_dalek::{Signer as _, SigningKey};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::Path;
use zeroize::{Zeroize, ZeroizeOnDrop, Zeroizing};

use crate::account::address::AccountAddress;
use crate::account::error::{AccountError, AccountResult};
use crate::account::signer::{signing_payload, SetMessageRequest};

/// Ed25519 keypair controlling one account
#[derive(Clone)]
pub struct AccountKeypair {
    signing_key: SigningKey,
}

/// JSON layout of a key file
#[derive(Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
struct KeyFile {
    #[zeroize(skip)]
    address: AccountAddress,
    public_key: String,
    secret_key: String,
}

impl AccountKeypair {
    /// Generate a fresh keypair from the thread-local CSPRNG
    pub fn generate() -> Self {
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(rand::random());
        Self::from_seed(&seed)
    }

    pub fn from_seed(seed: &[u8; 32]) -> Self {
        AccountKeypair {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing_key.verifying_key().to_bytes()
    }

    pub fn address(&self) -> AccountAddress {
        AccountAddress::from_public_key(&self.public_key())
    }

    /// Build a signed request to set this account's message
    pub fn sign_set_message(&self, message: impl Into<String>) -> SetMessageRequest {
        let message = message.into();
        let sender = self.address();
        let signature = self.signing_key.sign(&signing_payload(&sender, &message));

        SetMessageRequest {
            sender,
            public_key: self.public_key(),
            message,
            signature: signature.to_bytes().to_vec(),
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> AccountResult<()> {
        let key_file = KeyFile {
            address: self.address(),
            public_key: hex::encode(self.public_key()),
            secret_key: hex::encode(self.signing_key.to_bytes()),
        };

        let contents = Zeroizing::new(serde_json::to_string_pretty(&key_file)?);
        if let Some(parent) = path.as_ref().parent() {
            std::fs::create_dir_all(parent)?;
        }

        let mut file = open_private(path.as_ref())?;
        file.write_all(contents.as_bytes())?;
        file.sync_all()?;
        Ok(())
    }

    /// Load a key file, checking that its public key and address agree
    pub fn load(path: impl AsRef<Path>) -> AccountResult<Self> {
        let contents = std::fs::read_to_string(path)?;
        let key_file: KeyFile = serde_json::from_str(&contents)?;

        let secret = Zeroizing::new(
            hex::decode(&key_file.secret_key)
                .map_err(|e| AccountError::InvalidKeyFile(format!("secret_key: {}", e)))?,
        );
        let seed: Zeroizing<[u8; 32]> = Zeroizing::new(
            secret
                .as_slice()
                .try_into()
                .map_err(|_| AccountError::InvalidKeyFile("secret_key must be 32 bytes".into()))?,
        );

        let keypair = Self::from_seed(&seed);

        if hex::encode(keypair.public_key()) != key_file.public_key.to_lowercase() {
            return Err(AccountError::InvalidKeyFile(
                "public_key does not match secret_key".into(),
            ));
        }
        if keypair.address() != key_file.address {
            return Err(AccountError::InvalidKeyFile(
                "address does not match public_key".into(),
            ));
        }

        Ok(keypair)
    }
}

/// Create or truncate `path` readable by its owner only
#[cfg(unix)]
fn open_private(path: &Path) -> std::io::Result<File> {
    use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};

    let file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .mode(0o600)
        .open(path)?;
    // `mode` only applies to new files.
    file.set_permissions(std::fs::Permissions::from_mode(0o600))?;
    Ok(file)
}

#[cfg(not(unix))]
fn open_private(path: &Path) -> std::io::Result<File> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
}

impl fmt::Debug for AccountKeypair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccountKeypair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}
