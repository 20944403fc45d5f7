use fhe::bfv::{
    BfvParameters, BfvParametersBuilder, Ciphertext, Encoding, Plaintext, PublicKey, SecretKey,
};
use fhe_math::rq::Representation;
use fhe_traits::{
    DeserializeParametrized, FheDecoder, FheDecrypter, FheEncoder, FheEncrypter,
    Serialize as FheSerialize,
};
use rand::{CryptoRng, RngCore};
use std::borrow::Cow;
use std::fmt;
use std::sync::Arc;
use zeroize::Zeroizing;

use crate::backend::NOISE_VARIANCE;
use crate::crypto_error::{CryptoError, Result};

// ============================================================================
// BFV — délégué à fhe::bfv, encodage polynomial (un entier par coefficient)
//
// fhe lie chaque clé et chaque chiffré à une instance Arc<BfvParameters> et
// refuse (ou panique sur) deux instances distinctes, même égales. Tout
// chiffré garde donc l'Arc sous lequel il a été construit et est re-lié aux
// paramètres courants avant usage.
// ============================================================================

pub fn build_parameters(sizes: &[u32], degree: usize, plain_modulus: u64) -> Result<Arc<BfvParameters>> {
    let sizes: Vec<usize> = sizes.iter().map(|&b| b as usize).collect();
    Ok(BfvParametersBuilder::new()
        .set_degree(degree)
        .set_plaintext_modulus(plain_modulus)
        .set_moduli_sizes(&sizes)
        .set_variance(NOISE_VARIANCE)
        .build_arc()?)
}

// ----------------------------------------------------------------------------
// Chiffré lié à ses paramètres
// ----------------------------------------------------------------------------
#[derive(Clone, Debug)]
pub struct BfvCiphertext {
    par: Arc<BfvParameters>,
    ct:  Ciphertext,
}

impl BfvCiphertext {
    /// Le chiffré sous l'instance `par` (copie via octets si elle diffère)
    fn bound_to(&self, par: &Arc<BfvParameters>) -> Result<Cow<'_, Ciphertext>> {
        if Arc::ptr_eq(&self.par, par) {
            return Ok(Cow::Borrowed(&self.ct));
        }
        Ok(Cow::Owned(Ciphertext::from_bytes(&self.ct.to_bytes(), par)?))
    }

    pub fn sub(&self, other: &BfvCiphertext, par: &Arc<BfvParameters>) -> Result<BfvCiphertext> {
        let a = self.bound_to(par)?;
        let b = other.bound_to(par)?;
        Ok(BfvCiphertext { par: par.clone(), ct: &*a - &*b })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.ct.to_bytes()
    }

    /// Refuse ce qui ferait paniquer la soustraction : nombre de
    /// polynômes, niveau ou représentation inattendus.
    pub fn from_bytes(bytes: &[u8], par: &Arc<BfvParameters>) -> Result<Self> {
        let ct = Ciphertext::from_bytes(bytes, par)
            .map_err(|e| CryptoError::Deserialization(format!("chiffré BFV illisible : {e}")))?;
        let top = par.context_at_level(0)?;
        let well_formed = ct.len() == 2
            && ct
                .iter()
                .all(|p| *p.representation() == Representation::Ntt && p.ctx().as_ref() == top.as_ref());
        if !well_formed {
            return Err(CryptoError::Deserialization(
                "chiffré BFV de forme incompatible avec les paramètres".to_string(),
            ));
        }
        Ok(BfvCiphertext { par: par.clone(), ct })
    }
}

// ============================================================================
// Matériel de clé BFV
// ============================================================================
#[derive(Clone)]
pub struct BfvKeys {
    par:    Arc<BfvParameters>,
    public: PublicKey,
    secret: Option<SecretKey>,
}

// SecretKey de fhe affiche ses coefficients : jamais dans les journaux
impl fmt::Debug for BfvKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BfvKeys")
            .field("degree", &self.par.degree())
            .field("moduli", &self.par.moduli())
            .field("has_secret", &self.secret.is_some())
            .finish()
    }
}

impl BfvKeys {
    pub fn generate<R: RngCore + CryptoRng>(par: Arc<BfvParameters>, rng: &mut R) -> Self {
        let secret = SecretKey::random(&par, rng);
        let public = PublicKey::new(&secret, rng);
        BfvKeys { par, public, secret: Some(secret) }
    }

    pub fn from_bytes(
        par:    Arc<BfvParameters>,
        public: &[u8],
        secret: Option<&[u8]>,
    ) -> Result<Self> {
        let public = PublicKey::from_bytes(public, &par)
            .map_err(|e| CryptoError::Deserialization(format!("clé publique BFV illisible : {e}")))?;
        let secret = secret
            .map(|bytes| {
                SecretKey::from_bytes(bytes, &par).map_err(|e| {
                    CryptoError::Deserialization(format!("clé secrète BFV illisible : {e}"))
                })
            })
            .transpose()?;
        Ok(BfvKeys { par, public, secret })
    }

    pub fn parameters(&self) -> &Arc<BfvParameters> { &self.par }

    pub fn public_bytes(&self) -> Vec<u8> {
        self.public.to_bytes()
    }

    pub fn secret_bytes(&self) -> Option<Zeroizing<Vec<u8>>> {
        self.secret.as_ref().map(|sk| Zeroizing::new(sk.to_bytes()))
    }

    pub fn has_secret(&self) -> bool { self.secret.is_some() }

    pub fn strip_secret(&mut self) {
        self.secret = None;
    }

    pub fn encrypt<R: RngCore + CryptoRng>(&self, message: &[i64], rng: &mut R) -> Result<BfvCiphertext> {
        let pt = Plaintext::try_encode(message, Encoding::poly(), &self.par)?;
        let ct = self.public.try_encrypt(&pt, rng)?;
        Ok(BfvCiphertext { par: self.par.clone(), ct })
    }

    /// Les `len` premiers coefficients, centrés dans (-t/2, t/2]
    pub fn decrypt(&self, ct: &BfvCiphertext, len: usize) -> Result<Vec<i64>> {
        let sk = self.secret.as_ref().ok_or(CryptoError::NoSecretKey)?;
        let pt = sk.try_decrypt(&*ct.bound_to(&self.par)?)?;
        let mut values = Vec::<i64>::try_decode(&pt, Encoding::poly())?;
        values.truncate(len);
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn keys(seed: u64) -> BfvKeys {
        let par = build_parameters(&[54], 2048, 65537).unwrap();
        BfvKeys::generate(par, &mut StdRng::seed_from_u64(seed))
    }

    #[test]
    fn test_encrypt_decrypt_is_exact() {
        let k = keys(41);
        let mut rng = StdRng::seed_from_u64(1);
        let ct = k.encrypt(&[125, -350, 0, 16000], &mut rng).unwrap();
        assert_eq!(k.decrypt(&ct, 4).unwrap(), vec![125, -350, 0, 16000]);
    }

    #[test]
    fn test_subtraction_under_reloaded_parameters() {
        let k = keys(42);
        let mut rng = StdRng::seed_from_u64(2);
        let a = k.encrypt(&[10, 500], &mut rng).unwrap();
        let b = k.encrypt(&[25, -500], &mut rng).unwrap();

        // Paramètres reconstruits : autre instance Arc, même contenu
        let par = build_parameters(&[54], 2048, 65537).unwrap();
        assert!(!Arc::ptr_eq(&par, k.parameters()));
        let reloaded = BfvKeys::from_bytes(
            par.clone(),
            &k.public_bytes(),
            k.secret_bytes().as_deref().map(Vec::as_slice),
        )
        .unwrap();

        let diff = a.sub(&b, &par).unwrap();
        assert_eq!(reloaded.decrypt(&diff, 2).unwrap(), vec![-15, 1000]);
        assert_eq!(k.decrypt(&diff, 2).unwrap(), vec![-15, 1000]);
    }

    #[test]
    fn test_public_keys_cannot_decrypt() {
        let mut k = keys(43);
        let ct = k.encrypt(&[1], &mut StdRng::seed_from_u64(3)).unwrap();
        k.strip_secret();
        assert!(k.secret_bytes().is_none());
        assert!(matches!(k.decrypt(&ct, 1), Err(CryptoError::NoSecretKey)));
    }

    #[test]
    fn test_malformed_ciphertext_bytes_rejected() {
        let k = keys(44);
        assert!(matches!(
            BfvCiphertext::from_bytes(&[7, 7, 7], k.parameters()),
            Err(CryptoError::Deserialization(_))
        ));
        let ct = k.encrypt(&[9], &mut StdRng::seed_from_u64(4)).unwrap();
        let back = BfvCiphertext::from_bytes(&ct.to_bytes(), k.parameters()).unwrap();
        assert_eq!(back.to_bytes(), ct.to_bytes());
    }

    #[test]
    fn test_invalid_parameters_are_reported() {
        assert!(matches!(build_parameters(&[54], 3000, 65537), Err(CryptoError::Parameter(_))));
        assert!(matches!(build_parameters(&[70], 2048, 65537), Err(CryptoError::Parameter(_))));
    }
}
