use num_bigint::BigUint;
use rand::{CryptoRng, RngCore};
use rand_core::{OsRng, TryRngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use tracing::{debug, info};
use zeroize::Zeroizing;

use crate::backend::{Ciphertext, KeyMaterial};
use crate::codec::{decode_text, encode_text, fnv1a_64, MAX_WIRE_BYTES};
use crate::context::params::{HeParams, Scheme};
use crate::crypto_error::{CryptoError, Result};
use crate::storage::ByteStore;

/// Version du format binaire d'un contexte
const CONTEXT_VERSION: u8 = 2;

// ============================================================================
// Format sérialisé : bincode de { version, scheme, params, public_key, secret_key? }
//
// Les clés sont les octets protobuf de fhe (BFV) ou des polynômes fhe_math
// (CKKS). Deux vues du même format : l'une possédante pour la lecture,
// l'autre empruntée pour l'écriture. bincode code Vec<u8> et &[u8] à
// l'identique.
// ============================================================================
#[derive(Deserialize)]
struct ContextBlob {
    version:    u8,
    scheme:     Scheme,
    params:     HeParams,
    public_key: Vec<u8>,
    secret_key: Option<Vec<u8>>,
}

#[derive(Serialize)]
struct ContextBlobRef<'a> {
    version:    u8,
    scheme:     Scheme,
    params:     &'a HeParams,
    public_key: &'a [u8],
    secret_key: Option<&'a [u8]>,
}

/// Clé de blob d'un contexte : `<prefix>_<identity>`
pub fn context_key(prefix: &str, identity: &str) -> String {
    format!("{prefix}_{identity}")
}

// ============================================================================
// EncryptionContext
//
// Paramètres du schéma + matériel de clé. Deux variantes de cycle de vie :
//   - détenteur du secret (client) : chiffre et déchiffre
//   - public uniquement (serveur)  : chiffre et soustrait, ne déchiffre jamais
// ============================================================================
#[derive(Clone)]
pub struct EncryptionContext {
    scheme:      Scheme,
    params:      HeParams,
    keys:        KeyMaterial,
    public_key:  Vec<u8>,
    fingerprint: u64,
}

impl fmt::Debug for EncryptionContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionContext")
            .field("scheme", &self.scheme)
            .field("params", &self.params)
            .field("fingerprint", &format!("{:016x}", self.fingerprint))
            .field("has_secret", &self.keys.has_secret())
            .finish()
    }
}

impl EncryptionContext {
    // -----------------------------------------------------------------------
    // Création d'une paire de clés neuve (entropie système)
    // -----------------------------------------------------------------------
    pub fn create_secret(scheme: Scheme, params: &HeParams) -> Result<Self> {
        let mut rng = OsRng.unwrap_err();
        Self::create_secret_with_rng(scheme, params, &mut rng)
    }

    pub fn create_secret_with_rng<R: RngCore + CryptoRng>(
        scheme: Scheme,
        params: &HeParams,
        rng:    &mut R,
    ) -> Result<Self> {
        let params = params.normalized(scheme)?;
        let keys = KeyMaterial::generate(scheme, &params, rng)?;
        let ctx = Self::assemble(scheme, params, keys)?;
        info!(
            scheme = %ctx.scheme,
            degree = ctx.params.poly_modulus_degree,
            fingerprint = %format!("{:016x}", ctx.fingerprint),
            "nouveau contexte secret généré"
        );
        Ok(ctx)
    }

    fn assemble(scheme: Scheme, params: HeParams, keys: KeyMaterial) -> Result<Self> {
        let public_key = keys.public_bytes()?;
        let public_bytes = bincode::serialize(&ContextBlobRef {
            version: CONTEXT_VERSION,
            scheme,
            params: &params,
            public_key: &public_key,
            secret_key: None,
        })?;
        Ok(EncryptionContext {
            scheme,
            params,
            keys,
            public_key,
            fingerprint: fnv1a_64(&public_bytes),
        })
    }

    // -----------------------------------------------------------------------
    // Désérialisation
    // -----------------------------------------------------------------------

    /// Contexte fourni par un pair : toujours réduit à sa partie publique,
    /// même si les octets contenaient une clé secrète.
    pub fn from_public_bytes(bytes: &[u8]) -> Result<Self> {
        Ok(Self::from_bytes(bytes)?.strip_to_public())
    }

    /// Lecture complète (clé secrète conservée) : réservée aux blobs locaux
    fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() > MAX_WIRE_BYTES {
            return Err(CryptoError::Deserialization(format!(
                "contexte de {} octets au-delà de la borne",
                bytes.len()
            )));
        }
        let blob: ContextBlob = bincode::deserialize(bytes)?;
        if blob.version != CONTEXT_VERSION {
            return Err(CryptoError::Deserialization(format!(
                "version de contexte {} inconnue",
                blob.version
            )));
        }
        let secret = blob.secret_key.map(Zeroizing::new);

        // Paramètres : doivent être déjà normalisés, sinon le blob est forgé
        let params = blob
            .params
            .normalized(blob.scheme)
            .map_err(|e| CryptoError::Deserialization(e.to_string()))?;
        if params != blob.params {
            return Err(CryptoError::Deserialization(
                "paramètres non normalisés".to_string(),
            ));
        }

        let keys = KeyMaterial::from_bytes(
            blob.scheme,
            &params,
            &blob.public_key,
            secret.as_deref().map(Vec::as_slice),
        )
        .map_err(|e| match e {
            e @ CryptoError::Deserialization(_) => e,
            other => CryptoError::Deserialization(other.to_string()),
        })?;

        Self::assemble(blob.scheme, params, keys)
    }

    /// Retire le matériel secret (zeroisé à la destruction)
    pub fn strip_to_public(mut self) -> Self {
        self.keys.strip_secret();
        self
    }

    // -----------------------------------------------------------------------
    // Sérialisation déterministe
    //
    // include_secret = true n'est valide que sur un contexte secret, et ces
    // octets ne doivent jamais quitter la machine du client.
    // -----------------------------------------------------------------------
    pub fn serialize(&self, include_secret: bool) -> Result<Vec<u8>> {
        let secret = if include_secret {
            Some(self.keys.secret_bytes()?.ok_or(CryptoError::NoSecretKey)?)
        } else {
            None
        };
        Ok(bincode::serialize(&ContextBlobRef {
            version: CONTEXT_VERSION,
            scheme: self.scheme,
            params: &self.params,
            public_key: &self.public_key,
            secret_key: secret.as_deref().map(Vec::as_slice),
        })?)
    }

    // -----------------------------------------------------------------------
    // Persistance : texte base64 dans le magasin d'octets
    // -----------------------------------------------------------------------

    /// Persiste le contexte tel qu'il est (secret inclus s'il en détient un)
    pub fn persist(&self, store: &dyn ByteStore, key: &str) -> Result<()> {
        self.write_blob(store, key, self.has_secret())
    }

    /// Persiste uniquement la partie publique
    pub fn persist_public(&self, store: &dyn ByteStore, key: &str) -> Result<()> {
        self.write_blob(store, key, false)
    }

    fn write_blob(&self, store: &dyn ByteStore, key: &str, include_secret: bool) -> Result<()> {
        let text = Zeroizing::new(encode_text(&self.serialize(include_secret)?));
        store.write(key, text.as_bytes())?;
        debug!(key, include_secret, "contexte persisté");
        Ok(())
    }

    /// Ok(None) si aucun contexte n'a encore été persisté sous cette clé
    pub fn load(store: &dyn ByteStore, key: &str) -> Result<Option<Self>> {
        let Some(raw) = store.read(key)? else {
            return Ok(None);
        };
        let text = std::str::from_utf8(&raw)
            .map_err(|e| CryptoError::Deserialization(format!("blob de contexte non UTF-8 : {e}")))?;
        Self::from_bytes(&decode_text(text)?).map(Some)
    }

    // -----------------------------------------------------------------------
    // Chiffrés sous ce contexte
    // -----------------------------------------------------------------------

    /// Chiffre des coefficients déjà encodés (au plus N)
    pub fn encrypt_coeffs<R: RngCore + CryptoRng>(&self, message: &[i64], rng: &mut R) -> Result<Ciphertext> {
        let degree = self.params.poly_modulus_degree;
        if message.len() > degree {
            return Err(CryptoError::DimensionMismatch { expected: degree, actual: message.len() });
        }
        let body = self.keys.encrypt(message, rng)?;
        Ok(Ciphertext::new(self.fingerprint, message.len(), body))
    }

    pub fn decrypt_coeffs(&self, ct: &Ciphertext) -> Result<Vec<i64>> {
        if !self.has_secret() {
            return Err(CryptoError::NoSecretKey);
        }
        self.ensure_own(ct)?;
        self.keys.decrypt(ct.body(), ct.len())
    }

    /// Enc(a) - Enc(b), sans qu'aucun clair n'apparaisse
    pub fn subtract(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.ensure_own(a)?;
        self.ensure_own(b)?;
        if a.len() != b.len() {
            return Err(CryptoError::DimensionMismatch { expected: a.len(), actual: b.len() });
        }
        let body = self.keys.subtract(a.body(), b.body())?;
        Ok(Ciphertext::new(self.fingerprint, a.len(), body))
    }

    /// Relit un chiffré reçu ; Err(Deserialization) s'il vient d'un autre contexte
    pub fn read_ciphertext(&self, bytes: &[u8]) -> Result<Ciphertext> {
        Ciphertext::from_bytes(bytes, &self.keys, self.fingerprint, self.params.poly_modulus_degree)
    }

    fn ensure_own(&self, ct: &Ciphertext) -> Result<()> {
        if ct.fingerprint() != self.fingerprint {
            return Err(CryptoError::ContextMismatch(format!(
                "chiffré {:016x} étranger au contexte {:016x}",
                ct.fingerprint(),
                self.fingerprint
            )));
        }
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Accesseurs
    // -----------------------------------------------------------------------
    pub fn scheme(&self) -> Scheme { self.scheme }

    pub fn params(&self) -> &HeParams { &self.params }

    pub fn has_secret(&self) -> bool { self.keys.has_secret() }

    /// Module Q = q_1···q_k de l'anneau des chiffrés
    pub fn ciphertext_modulus(&self) -> Result<BigUint> { self.keys.ciphertext_modulus() }

    /// Empreinte FNV-1a de la sérialisation publique
    pub fn fingerprint(&self) -> u64 { self.fingerprint }
}
