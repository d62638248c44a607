//! Core types and data structures for the vanity address pool.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use std::fmt;

/// The (creator, mint) pair a program-derived candidate was derived for.
///
/// A derived address is only valid for the exact pair it was seeded with, so
/// pooled candidates are partitioned by this key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KeyContext {
    /// Creator / authority the address is derived for
    #[serde(with = "pubkey_string")]
    pub creator: Pubkey,
    /// Underlying asset (mint) the address is derived for
    #[serde(with = "pubkey_string")]
    pub mint: Pubkey,
}

impl KeyContext {
    pub fn new(creator: Pubkey, mint: Pubkey) -> Self {
        Self { creator, mint }
    }
}

impl fmt::Display for KeyContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.creator, self.mint)
    }
}

/// Pool partition key: `None` for the unkeyed keypair pool.
pub type PoolKey = Option<KeyContext>;

/// Display adapter for a [`PoolKey`] in log lines.
pub struct KeyLabel<'a>(pub &'a PoolKey);

impl fmt::Display for KeyLabel<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0 {
            Some(context) => write!(f, "{}", context),
            None => f.write_str("keypair"),
        }
    }
}

/// Full ed25519 secret key bytes (seed followed by public key).
///
/// Whoever claims the candidate owns these bytes. They are written to the pool
/// file and nowhere else; `Debug` never prints them.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SecretKey(Vec<u8>);

impl SecretKey {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Rebuild the signing keypair.
    pub fn to_keypair(&self) -> anyhow::Result<solana_sdk::signature::Keypair> {
        solana_sdk::signature::Keypair::from_bytes(&self.0)
            .map_err(|e| anyhow::anyhow!("Invalid secret key bytes: {}", e))
    }
}

impl fmt::Debug for SecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SecretKey(<{} bytes redacted>)", self.0.len())
    }
}

/// How a candidate's address was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Derivation {
    /// Random key pair; the holder of `secret_key` controls the address
    Keypair { secret_key: SecretKey },
    /// Program-derived address; reproducible from program id, context and salt
    ProgramDerived {
        /// Canonical bump that pushed the address off the curve
        bump: u8,
        /// Random salt seed used for this derivation
        salt: Vec<u8>,
        /// Context the address was derived for
        context: KeyContext,
    },
}

/// A vanity result that satisfied the pool's pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Candidate {
    /// The resulting address
    #[serde(with = "pubkey_string")]
    pub address: Pubkey,
    /// Derivation metadata or private key material
    #[serde(flatten)]
    pub derivation: Derivation,
    /// When the candidate was found
    pub created_at: DateTime<Utc>,
}

impl Candidate {
    pub fn keypair(address: Pubkey, secret_key: SecretKey) -> Self {
        Self {
            address,
            derivation: Derivation::Keypair { secret_key },
            created_at: Utc::now(),
        }
    }

    pub fn program_derived(address: Pubkey, bump: u8, salt: Vec<u8>, context: KeyContext) -> Self {
        Self {
            address,
            derivation: Derivation::ProgramDerived { bump, salt, context },
            created_at: Utc::now(),
        }
    }

    /// Pool partition this candidate belongs to.
    pub fn key(&self) -> PoolKey {
        match &self.derivation {
            Derivation::Keypair { .. } => None,
            Derivation::ProgramDerived { context, .. } => Some(*context),
        }
    }

    pub fn bump(&self) -> Option<u8> {
        match &self.derivation {
            Derivation::ProgramDerived { bump, .. } => Some(*bump),
            Derivation::Keypair { .. } => None,
        }
    }

    pub fn salt(&self) -> Option<&[u8]> {
        match &self.derivation {
            Derivation::ProgramDerived { salt, .. } => Some(salt),
            Derivation::Keypair { .. } => None,
        }
    }

    pub fn secret_key(&self) -> Option<&SecretKey> {
        match &self.derivation {
            Derivation::Keypair { secret_key } => Some(secret_key),
            Derivation::ProgramDerived { .. } => None,
        }
    }
}

/// Serde helper rendering a [`Pubkey`] as its base-58 string.
pub mod pubkey_string {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use solana_sdk::pubkey::Pubkey;
    use std::str::FromStr;

    pub fn serialize<S: Serializer>(key: &Pubkey, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(key)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Pubkey, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        Pubkey::from_str(&encoded).map_err(D::Error::custom)
    }
}
