use base64::engine::general_purpose::STANDARD;
use base64::Engine;

use crate::crypto_error::{CryptoError, Result};

// ============================================================================
// Protection DoS — taille maximale d'une charge utile texte décodée
//
// Un chiffré N=32768 sur 16 premiers occupe ≈ 8 Mo en bincode ; le contexte
// public le double. 64 Mo laisse une marge sans permettre à un pair de faire
// allouer plusieurs Go au serveur. Vérifié AVANT le décodage base64.
// ============================================================================
pub const MAX_WIRE_BYTES: usize = 64 * 1024 * 1024;

/// Octets binaires → texte transportable (base64 standard)
pub fn encode_text(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Texte transportable → octets binaires
///
/// Retourne :
///   Err(Deserialization)  si le texte dépasse la borne ou n'est pas du base64
pub fn decode_text(text: &str) -> Result<Vec<u8>> {
    // 4 caractères base64 pour 3 octets
    if text.len() / 4 * 3 > MAX_WIRE_BYTES {
        return Err(CryptoError::Deserialization(format!(
            "charge utile de {} caractères au-delà de la borne de {MAX_WIRE_BYTES} octets",
            text.len()
        )));
    }
    STANDARD
        .decode(text.trim())
        .map_err(|e| CryptoError::Deserialization(format!("base64 invalide : {e}")))
}

// ---------------------------------------------------------------------------
// Empreinte FNV-1a 64 bits
//
// Stable d'une compilation à l'autre (contrairement à DefaultHasher) :
// le client et le serveur doivent calculer la même empreinte de contexte.
// ---------------------------------------------------------------------------
pub fn fnv1a_64(bytes: &[u8]) -> u64 {
    const OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
    const PRIME: u64 = 0x0000_0100_0000_01b3;
    let mut h = OFFSET;
    for &b in bytes {
        h ^= b as u64;
        h = h.wrapping_mul(PRIME);
    }
    h
}
