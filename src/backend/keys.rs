use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use zeroize::Zeroizing;

use crate::backend::bfv::{build_parameters, BfvCiphertext, BfvKeys};
use crate::backend::ckks::{build_context, CkksCiphertext, CkksKeys};
use crate::context::{HeParams, Scheme};
use crate::crypto_error::{CryptoError, Result};

// ============================================================================
// Corps d'un chiffré, propre au schéma
// ============================================================================
#[derive(Clone, Debug)]
pub enum CipherBody {
    Ckks(CkksCiphertext),
    Bfv(BfvCiphertext),
}

impl CipherBody {
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        match self {
            CipherBody::Ckks(ct) => ct.to_bytes(),
            CipherBody::Bfv(ct) => Ok(ct.to_bytes()),
        }
    }
}

// ============================================================================
// KeyMaterial — anneau + clés d'un contexte, secret optionnel
// ============================================================================
#[derive(Clone, Debug)]
pub enum KeyMaterial {
    Ckks(CkksKeys),
    Bfv(BfvKeys),
}

fn plain_modulus(params: &HeParams) -> Result<u64> {
    params
        .plain_modulus
        .ok_or_else(|| CryptoError::Parameter("BFV exige un plain_modulus".to_string()))
}

fn foreign_body() -> CryptoError {
    CryptoError::ContextMismatch("chiffré d'un autre schéma".to_string())
}

impl KeyMaterial {
    /// Paires de clés neuves ; `params` doit être normalisé
    pub fn generate<R: RngCore + CryptoRng>(
        scheme: Scheme,
        params: &HeParams,
        rng:    &mut R,
    ) -> Result<Self> {
        let degree = params.poly_modulus_degree;
        match scheme {
            Scheme::Ckks => {
                let ctx = build_context(&params.coeff_mod_bit_sizes, degree)?;
                Ok(KeyMaterial::Ckks(CkksKeys::generate(ctx, degree, rng)?))
            }
            Scheme::Bfv => {
                let par = build_parameters(&params.coeff_mod_bit_sizes, degree, plain_modulus(params)?)?;
                Ok(KeyMaterial::Bfv(BfvKeys::generate(par, rng)))
            }
        }
    }

    /// Reconstruit l'anneau depuis `params` puis relit les clés
    pub fn from_bytes(
        scheme: Scheme,
        params: &HeParams,
        public: &[u8],
        secret: Option<&[u8]>,
    ) -> Result<Self> {
        let degree = params.poly_modulus_degree;
        match scheme {
            Scheme::Ckks => {
                let ctx = build_context(&params.coeff_mod_bit_sizes, degree)?;
                Ok(KeyMaterial::Ckks(CkksKeys::from_bytes(ctx, degree, public, secret)?))
            }
            Scheme::Bfv => {
                let par = build_parameters(&params.coeff_mod_bit_sizes, degree, plain_modulus(params)?)?;
                Ok(KeyMaterial::Bfv(BfvKeys::from_bytes(par, public, secret)?))
            }
        }
    }

    pub fn public_bytes(&self) -> Result<Vec<u8>> {
        match self {
            KeyMaterial::Ckks(k) => k.public_bytes(),
            KeyMaterial::Bfv(k) => Ok(k.public_bytes()),
        }
    }

    pub fn secret_bytes(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        match self {
            KeyMaterial::Ckks(k) => k.secret_bytes(),
            KeyMaterial::Bfv(k) => Ok(k.secret_bytes()),
        }
    }

    pub fn has_secret(&self) -> bool {
        match self {
            KeyMaterial::Ckks(k) => k.has_secret(),
            KeyMaterial::Bfv(k) => k.has_secret(),
        }
    }

    pub fn strip_secret(&mut self) {
        match self {
            KeyMaterial::Ckks(k) => k.strip_secret(),
            KeyMaterial::Bfv(k) => k.strip_secret(),
        }
    }

    /// Module Q des chiffrés (niveau 0)
    pub fn ciphertext_modulus(&self) -> Result<BigUint> {
        match self {
            KeyMaterial::Ckks(k) => Ok(k.modulus().clone()),
            KeyMaterial::Bfv(k) => Ok(k.parameters().context_at_level(0)?.modulus().clone()),
        }
    }

    // -----------------------------------------------------------------------
    // Opérations sur les corps de chiffrés
    // -----------------------------------------------------------------------

    pub fn encrypt<R: RngCore + CryptoRng>(&self, message: &[i64], rng: &mut R) -> Result<CipherBody> {
        match self {
            KeyMaterial::Ckks(k) => Ok(CipherBody::Ckks(k.encrypt(message, rng)?)),
            KeyMaterial::Bfv(k) => Ok(CipherBody::Bfv(k.encrypt(message, rng)?)),
        }
    }

    pub fn decrypt(&self, body: &CipherBody, len: usize) -> Result<Vec<i64>> {
        match (self, body) {
            (KeyMaterial::Ckks(k), CipherBody::Ckks(ct)) => k.decrypt(ct, len),
            (KeyMaterial::Bfv(k), CipherBody::Bfv(ct)) => k.decrypt(ct, len),
            _ => Err(foreign_body()),
        }
    }

    pub fn subtract(&self, a: &CipherBody, b: &CipherBody) -> Result<CipherBody> {
        match (self, a, b) {
            (KeyMaterial::Ckks(_), CipherBody::Ckks(a), CipherBody::Ckks(b)) => {
                Ok(CipherBody::Ckks(a.sub(b)))
            }
            (KeyMaterial::Bfv(k), CipherBody::Bfv(a), CipherBody::Bfv(b)) => {
                Ok(CipherBody::Bfv(a.sub(b, k.parameters())?))
            }
            _ => Err(foreign_body()),
        }
    }

    pub fn body_from_bytes(&self, bytes: &[u8]) -> Result<CipherBody> {
        match self {
            KeyMaterial::Ckks(k) => Ok(CipherBody::Ckks(k.ciphertext_from_bytes(bytes)?)),
            KeyMaterial::Bfv(k) => Ok(CipherBody::Bfv(BfvCiphertext::from_bytes(bytes, k.parameters())?)),
        }
    }
}
