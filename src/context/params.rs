use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::crypto_error::{CryptoError, Result};

/// Tailles de premiers acceptées par fhe_math::zq::primes
const MIN_PRIME_BITS: u32 = 10;
const MAX_PRIME_BITS: u32 = 62;

// ============================================================================
// Schéma homomorphe
// ============================================================================
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scheme {
    /// Arithmétique approchée sur des réels (échelle globale 2^k)
    Ckks,
    /// Arithmétique exacte sur des entiers modulo t
    Bfv,
}

impl Scheme {
    pub fn name(&self) -> &'static str {
        match self {
            Scheme::Ckks => "ckks",
            Scheme::Bfv => "bfv",
        }
    }
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Scheme {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "ckks" => Ok(Scheme::Ckks),
            "bfv" => Ok(Scheme::Bfv),
            other => Err(CryptoError::Parameter(format!("schéma inconnu : {other:?}"))),
        }
    }
}

// ============================================================================
// Borne de sécurité 128 bits : taille totale maximale de Q par degré N
// (table HomomorphicEncryption.org, secret ternaire)
// ============================================================================
fn max_coeff_bits(degree: usize) -> Option<u32> {
    match degree {
        1024 => Some(27),
        2048 => Some(54),
        4096 => Some(109),
        8192 => Some(218),
        16384 => Some(438),
        32768 => Some(881),
        _ => None,
    }
}

/// Chaîne BFV par défaut pour un degré donné (remplit la borne de sécurité)
fn default_bfv_chain(degree: usize) -> Option<Vec<u32>> {
    match degree {
        1024 => Some(vec![27]),
        2048 => Some(vec![54]),
        4096 => Some(vec![36, 36, 37]),
        8192 => Some(vec![43, 43, 44, 44, 44]),
        16384 => Some(vec![48; 9]),
        32768 => Some(vec![55; 16]),
        _ => None,
    }
}

/// Marge minimale (en bits) entre Q et le domaine du message
const NOISE_HEADROOM_BITS: u32 = 20;

// ============================================================================
// Paramètres du schéma
// ============================================================================
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeParams {
    pub poly_modulus_degree: usize,
    pub coeff_mod_bit_sizes: Vec<u32>,
    /// Module t du texte clair (BFV uniquement)
    pub plain_modulus:       Option<u64>,
    /// log2 de l'échelle globale (CKKS uniquement)
    pub global_scale_bits:   Option<u32>,
    /// Facteur d'échelle réel → entier appliqué avant chiffrement (BFV uniquement)
    pub integer_scale:       Option<u64>,
}

impl HeParams {
    /// N = 8192, chaîne [60, 40, 40, 60], échelle 2^40
    pub fn ckks_default() -> Self {
        HeParams {
            poly_modulus_degree: 8192,
            coeff_mod_bit_sizes: vec![60, 40, 40, 60],
            plain_modulus:       None,
            global_scale_bits:   Some(40),
            integer_scale:       None,
        }
    }

    /// N = 8192, chaîne par défaut, t = 2^30, échelle entière 10000
    pub fn bfv_default() -> Self {
        HeParams {
            poly_modulus_degree: 8192,
            coeff_mod_bit_sizes: Vec::new(),
            plain_modulus:       Some(1 << 30),
            global_scale_bits:   None,
            integer_scale:       Some(10_000),
        }
    }

    pub fn default_for(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Ckks => Self::ckks_default(),
            Scheme::Bfv => Self::bfv_default(),
        }
    }

    pub fn total_bits(&self) -> u32 {
        self.coeff_mod_bit_sizes.iter().sum()
    }

    // -----------------------------------------------------------------------
    // Validation + normalisation
    //
    // Renvoie les paramètres effectifs (chaîne BFV par défaut substituée) :
    // ce sont eux qui sont sérialisés, de sorte que deux pairs partageant un
    // contexte voient exactement la même chaîne.
    // -----------------------------------------------------------------------
    pub fn normalized(&self, scheme: Scheme) -> Result<HeParams> {
        let degree = self.poly_modulus_degree;
        let max_bits = max_coeff_bits(degree).ok_or_else(|| {
            CryptoError::Parameter(format!(
                "degré {degree} non supporté (puissance de deux entre 1024 et 32768)"
            ))
        })?;

        let mut out = self.clone();
        match scheme {
            Scheme::Ckks => {
                if self.plain_modulus.is_some() || self.integer_scale.is_some() {
                    return Err(CryptoError::Parameter(
                        "CKKS n'accepte ni plain_modulus ni integer_scale".to_string(),
                    ));
                }
                if self.coeff_mod_bit_sizes.is_empty() {
                    return Err(CryptoError::Parameter(
                        "CKKS exige une chaîne de modules non vide".to_string(),
                    ));
                }
                let scale = self.global_scale_bits.ok_or_else(|| {
                    CryptoError::Parameter("CKKS exige global_scale_bits".to_string())
                })?;
                if !(1..=MAX_PRIME_BITS).contains(&scale) {
                    return Err(CryptoError::Parameter(format!(
                        "échelle 2^{scale} hors de [2^1, 2^{MAX_PRIME_BITS}]"
                    )));
                }
                if self.total_bits() <= scale + NOISE_HEADROOM_BITS {
                    return Err(CryptoError::Parameter(format!(
                        "chaîne de {} bits trop courte pour l'échelle 2^{scale}",
                        self.total_bits()
                    )));
                }
            }
            Scheme::Bfv => {
                if self.global_scale_bits.is_some() {
                    return Err(CryptoError::Parameter(
                        "BFV n'accepte pas global_scale_bits".to_string(),
                    ));
                }
                let t = self.plain_modulus.ok_or_else(|| {
                    CryptoError::Parameter("BFV exige un plain_modulus entier".to_string())
                })?;
                if !(2..(1u64 << 60)).contains(&t) {
                    return Err(CryptoError::Parameter(format!(
                        "plain_modulus {t} hors de [2, 2^60)"
                    )));
                }
                match self.integer_scale {
                    Some(s) if s >= 1 => {}
                    _ => {
                        return Err(CryptoError::Parameter(
                            "BFV exige integer_scale ≥ 1".to_string(),
                        ))
                    }
                }
                if out.coeff_mod_bit_sizes.is_empty() {
                    out.coeff_mod_bit_sizes = default_bfv_chain(degree).unwrap_or_default();
                }
                // Q ≥ t²·2^20 : le terme d'arrondi (Q mod t)·m/Q reste négligeable
                let t_bits = 64 - t.leading_zeros();
                if out.total_bits() < 2 * t_bits + NOISE_HEADROOM_BITS {
                    return Err(CryptoError::Parameter(format!(
                        "chaîne de {} bits trop courte pour t de {t_bits} bits",
                        out.total_bits()
                    )));
                }
            }
        }

        if let Some(&bad) = out
            .coeff_mod_bit_sizes
            .iter()
            .find(|b| !(MIN_PRIME_BITS..=MAX_PRIME_BITS).contains(*b))
        {
            return Err(CryptoError::Parameter(format!(
                "taille de premier {bad} bits hors de [{MIN_PRIME_BITS}, {MAX_PRIME_BITS}]"
            )));
        }
        if out.total_bits() > max_bits {
            return Err(CryptoError::Parameter(format!(
                "chaîne de {} bits au-delà de la borne de sécurité ({max_bits} bits pour N = {degree})",
                out.total_bits()
            )));
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        assert_eq!(HeParams::ckks_default().normalized(Scheme::Ckks).unwrap(), HeParams::ckks_default());
        let bfv = HeParams::bfv_default().normalized(Scheme::Bfv).unwrap();
        assert_eq!(bfv.coeff_mod_bit_sizes, vec![43, 43, 44, 44, 44]);
    }

    #[test]
    fn test_bfv_requires_plain_modulus() {
        let mut p = HeParams::bfv_default();
        p.plain_modulus = None;
        assert!(matches!(p.normalized(Scheme::Bfv), Err(CryptoError::Parameter(_))));
    }

    #[test]
    fn test_ckks_requires_chain_and_scale() {
        let mut p = HeParams::ckks_default();
        p.coeff_mod_bit_sizes.clear();
        assert!(matches!(p.normalized(Scheme::Ckks), Err(CryptoError::Parameter(_))));

        let mut p = HeParams::ckks_default();
        p.global_scale_bits = None;
        assert!(matches!(p.normalized(Scheme::Ckks), Err(CryptoError::Parameter(_))));
    }

    #[test]
    fn test_scheme_mismatched_params_rejected() {
        // Paramètres BFV présentés comme CKKS
        assert!(HeParams::bfv_default().normalized(Scheme::Ckks).is_err());
        assert!(HeParams::ckks_default().normalized(Scheme::Bfv).is_err());
    }

    #[test]
    fn test_security_bound_enforced() {
        let p = HeParams {
            poly_modulus_degree: 4096,
            coeff_mod_bit_sizes: vec![60, 60],
            plain_modulus:       None,
            global_scale_bits:   Some(40),
            integer_scale:       None,
        };
        assert!(matches!(p.normalized(Scheme::Ckks), Err(CryptoError::Parameter(_))));
    }

    #[test]
    fn test_unsupported_degree() {
        let mut p = HeParams::ckks_default();
        p.poly_modulus_degree = 3000;
        assert!(p.normalized(Scheme::Ckks).is_err());
    }

    #[test]
    fn test_scheme_from_str() {
        assert_eq!("CKKS".parse::<Scheme>().unwrap(), Scheme::Ckks);
        assert_eq!(" bfv ".parse::<Scheme>().unwrap(), Scheme::Bfv);
        assert!("paillier".parse::<Scheme>().is_err());
    }
}
