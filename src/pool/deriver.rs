//! Address derivation: random key pairs and salted program-derived addresses.
//!
//! Everything here is pure and thread-safe; searchers call into it from the
//! async runtime and from rayon workers alike.

use crate::pool::config::PoolMode;
use crate::pool::error::{DerivationFailure, PoolError};
use crate::types::{Candidate, KeyContext, PoolKey, SecretKey};
use rand::RngCore;
use solana_sdk::pubkey::{Pubkey, MAX_SEED_LEN};
use solana_sdk::signature::Keypair;
use solana_sdk::signer::Signer;
use std::sync::Arc;

/// Derive the canonical-bump address for `(prefix?, creator, mint, salt)`.
///
/// Deterministic for identical inputs. An empty `seed_prefix` is left out of
/// the seed list.
pub fn derive_program_address(
    program_id: &Pubkey,
    seed_prefix: &[u8],
    context: &KeyContext,
    salt: &[u8],
) -> Result<(Pubkey, u8), DerivationFailure> {
    for seed in [seed_prefix, salt] {
        if seed.len() > MAX_SEED_LEN {
            return Err(DerivationFailure::SeedTooLong {
                len: seed.len(),
                max: MAX_SEED_LEN,
            });
        }
    }

    let found = if seed_prefix.is_empty() {
        Pubkey::try_find_program_address(
            &[context.creator.as_ref(), context.mint.as_ref(), salt],
            program_id,
        )
    } else {
        Pubkey::try_find_program_address(
            &[seed_prefix, context.creator.as_ref(), context.mint.as_ref(), salt],
            program_id,
        )
    };

    found.ok_or(DerivationFailure::NoViableBump)
}

/// Fresh random key pair from OS entropy.
pub fn generate_keypair() -> (Pubkey, SecretKey) {
    let keypair = Keypair::new();
    (keypair.pubkey(), SecretKey::new(keypair.to_bytes().to_vec()))
}

/// One derivation attempt per call. Injected into every searcher.
pub trait CandidateSource: Send + Sync {
    fn draw(&self) -> Result<Candidate, DerivationFailure>;
}

/// Draws random key pairs.
#[derive(Debug, Default, Clone, Copy)]
pub struct KeypairSource;

impl CandidateSource for KeypairSource {
    fn draw(&self) -> Result<Candidate, DerivationFailure> {
        let (address, secret_key) = generate_keypair();
        Ok(Candidate::keypair(address, secret_key))
    }
}

/// Draws salted program-derived addresses for one context.
#[derive(Debug, Clone)]
pub struct ProgramAddressSource {
    program_id: Pubkey,
    seed_prefix: Vec<u8>,
    context: KeyContext,
    salt_len: usize,
}

impl ProgramAddressSource {
    pub fn new(
        program_id: Pubkey,
        seed_prefix: impl Into<Vec<u8>>,
        context: KeyContext,
        salt_len: usize,
    ) -> Result<Self, DerivationFailure> {
        let seed_prefix = seed_prefix.into();
        if seed_prefix.len() > MAX_SEED_LEN {
            return Err(DerivationFailure::SeedTooLong {
                len: seed_prefix.len(),
                max: MAX_SEED_LEN,
            });
        }
        if salt_len == 0 || salt_len > MAX_SEED_LEN {
            return Err(DerivationFailure::SeedTooLong {
                len: salt_len,
                max: MAX_SEED_LEN,
            });
        }

        Ok(Self {
            program_id,
            seed_prefix,
            context,
            salt_len,
        })
    }

    pub fn context(&self) -> &KeyContext {
        &self.context
    }
}

impl CandidateSource for ProgramAddressSource {
    fn draw(&self) -> Result<Candidate, DerivationFailure> {
        let mut salt = vec![0u8; self.salt_len];
        rand::thread_rng().fill_bytes(&mut salt);

        let (address, bump) =
            derive_program_address(&self.program_id, &self.seed_prefix, &self.context, &salt)?;
        Ok(Candidate::program_derived(address, bump, salt, self.context))
    }
}

/// Builds the candidate source for a pool partition.
pub trait SourceFactory: Send + Sync {
    fn source_for(&self, key: &PoolKey) -> Result<Arc<dyn CandidateSource>, PoolError>;

    /// Whether a stored candidate is one this factory's sources could have
    /// drawn. Checked once per entry when the pool is loaded.
    fn reproduces(&self, _candidate: &Candidate) -> bool {
        true
    }
}

/// Default factory: picks the source from the configured [`PoolMode`].
#[derive(Debug, Clone)]
pub struct ModeSourceFactory {
    mode: PoolMode,
}

impl ModeSourceFactory {
    pub fn new(mode: PoolMode) -> Self {
        Self { mode }
    }
}

impl SourceFactory for ModeSourceFactory {
    fn source_for(&self, key: &PoolKey) -> Result<Arc<dyn CandidateSource>, PoolError> {
        self.mode.check_key(key)?;

        match (&self.mode, key) {
            (PoolMode::Keypair, _) => Ok(Arc::new(KeypairSource)),
            (
                PoolMode::ProgramDerived {
                    program_id,
                    seed_prefix,
                    salt_len,
                },
                Some(context),
            ) => {
                let source = ProgramAddressSource::new(
                    *program_id,
                    seed_prefix.as_bytes(),
                    *context,
                    *salt_len,
                )?;
                Ok(Arc::new(source))
            }
            (PoolMode::ProgramDerived { .. }, None) => Err(PoolError::ContextRequired),
        }
    }

    /// Program-derived entries must re-derive under the current program id
    /// and seed prefix.
    fn reproduces(&self, candidate: &Candidate) -> bool {
        let PoolMode::ProgramDerived {
            program_id,
            seed_prefix,
            ..
        } = &self.mode
        else {
            return true;
        };
        let (Some(context), Some(salt), Some(bump)) = (candidate.key(), candidate.salt(), candidate.bump())
        else {
            return false;
        };

        derive_program_address(program_id, seed_prefix.as_bytes(), &context, salt)
            .map(|derived| derived == (candidate.address, bump))
            .unwrap_or(false)
    }
}
