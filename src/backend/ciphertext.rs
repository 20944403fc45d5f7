use serde::{Deserialize, Serialize};

use crate::backend::keys::{CipherBody, KeyMaterial};
use crate::crypto_error::{CryptoError, Result};

// ============================================================================
// Chiffré transportable
//
// `fingerprint` identifie le contexte public qui l'a produit : deux chiffrés
// d'empreintes différentes ne se combinent jamais. `len` est le nombre de
// coefficients porteurs de message ; le reste du polynôme n'est que du bruit.
// ============================================================================
#[derive(Clone, Debug)]
pub struct Ciphertext {
    fingerprint: u64,
    len:         usize,
    body:        CipherBody,
}

/// Format sérialisé : bincode de { fingerprint, len, octets du schéma }
#[derive(Serialize, Deserialize)]
struct WireCiphertext {
    fingerprint: u64,
    len:         u64,
    body:        Vec<u8>,
}

impl Ciphertext {
    pub(crate) fn new(fingerprint: u64, len: usize, body: CipherBody) -> Self {
        Ciphertext { fingerprint, len, body }
    }

    pub fn fingerprint(&self) -> u64 { self.fingerprint }

    pub fn len(&self) -> usize { self.len }

    pub fn is_empty(&self) -> bool { self.len == 0 }

    pub(crate) fn body(&self) -> &CipherBody { &self.body }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&WireCiphertext {
            fingerprint: self.fingerprint,
            len:         self.len as u64,
            body:        self.body.to_bytes()?,
        })?)
    }

    // -----------------------------------------------------------------------
    // Lecture validée contre un contexte : empreinte, longueur, forme
    // -----------------------------------------------------------------------
    pub(crate) fn from_bytes(
        bytes:       &[u8],
        keys:        &KeyMaterial,
        fingerprint: u64,
        degree:      usize,
    ) -> Result<Self> {
        let wire: WireCiphertext = bincode::deserialize(bytes)?;
        if wire.fingerprint != fingerprint {
            return Err(CryptoError::Deserialization(format!(
                "chiffré produit sous le contexte {:016x}, attendu {fingerprint:016x}",
                wire.fingerprint
            )));
        }
        let len = usize::try_from(wire.len)
            .ok()
            .filter(|&len| len <= degree)
            .ok_or_else(|| {
                CryptoError::Deserialization(format!("longueur {} au-delà du degré {degree}", wire.len))
            })?;
        // Toute erreur sur des octets reçus est une erreur de désérialisation
        let body = keys.body_from_bytes(&wire.body).map_err(|e| match e {
            e @ CryptoError::Deserialization(_) => e,
            other => CryptoError::Deserialization(other.to_string()),
        })?;
        Ok(Ciphertext { fingerprint, len, body })
    }
}
