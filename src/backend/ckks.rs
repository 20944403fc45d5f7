use fhe_math::rq::{traits::TryConvertFrom, Context, Poly, Representation};
use fhe_math::zq::primes::generate_prime;
use fhe_traits::{DeserializeWithContext, Serialize as FheSerialize};
use fhe_util::sample_vec_cbd;
use num_bigint::{BigInt, BigUint};
use num_traits::ToPrimitive;
use rand::{CryptoRng, RngCore};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use zeroize::{Zeroize, Zeroizing};

use crate::backend::NOISE_VARIANCE;
use crate::crypto_error::{CryptoError, Result};

// ============================================================================
// CKKS par coefficients sur R_q = Z_q[X]/(X^N + 1), q = q_1···q_k
//
//   pk = (p0, p1) = (-(a·s) + e, a)
//   Enc(m) = (p0·u + e1 + m, p1·u + e2)
//   Dec(c) = c0 + c1·s ≈ m
//
// Tous les polynômes vivent en représentation NTT ; l'échelle 2^k est déjà
// appliquée aux coefficients par la stratégie.
// ============================================================================

/// Chaîne de premiers q ≡ 1 mod 2N, déterministe pour une liste de tailles
pub fn generate_moduli(sizes: &[u32], degree: usize) -> Result<Vec<u64>> {
    let mut moduli: Vec<u64> = Vec::with_capacity(sizes.len());
    for &bits in sizes {
        let bits = bits as usize;
        let mut upper_bound = 1u64 << bits;
        loop {
            let prime = generate_prime(bits, 2 * degree as u64, upper_bound).ok_or_else(|| {
                CryptoError::Parameter(format!("plus de premier de {bits} bits pour N = {degree}"))
            })?;
            if !moduli.contains(&prime) {
                moduli.push(prime);
                break;
            }
            upper_bound = prime;
        }
    }
    Ok(moduli)
}

pub fn build_context(sizes: &[u32], degree: usize) -> Result<Arc<Context>> {
    Ok(Context::new_arc(&generate_moduli(sizes, degree)?, degree)?)
}

// ============================================================================
// Couple de polynômes sérialisé : protobuf fhe_math de chaque moitié
// ============================================================================
#[derive(Serialize, Deserialize)]
struct PolyPair {
    first:  Vec<u8>,
    second: Vec<u8>,
}

fn pair_to_bytes(first: &Poly, second: &Poly) -> Result<Vec<u8>> {
    Ok(bincode::serialize(&PolyPair { first: first.to_bytes(), second: second.to_bytes() })?)
}

fn pair_from_bytes(bytes: &[u8], ctx: &Arc<Context>) -> Result<(Poly, Poly)> {
    let pair: PolyPair = bincode::deserialize(bytes)?;
    let read = |raw: &[u8]| -> Result<Poly> {
        let mut p = Poly::from_bytes(raw, ctx)
            .map_err(|e| CryptoError::Deserialization(format!("polynôme illisible : {e}")))?;
        // Un pair peut envoyer n'importe quelle représentation
        p.change_representation(Representation::Ntt);
        Ok(p)
    };
    Ok((read(&pair.first)?, read(&pair.second)?))
}

// ============================================================================
// Clé secrète : coefficients binomiaux centrés — ZEROISÉE À LA DESTRUCTION
// ============================================================================
#[derive(Clone, Serialize, Deserialize)]
pub struct CkksSecretKey {
    coeffs: Box<[i64]>,
}

impl CkksSecretKey {
    pub fn random<R: RngCore + CryptoRng>(degree: usize, rng: &mut R) -> Result<Self> {
        let coeffs = sample_vec_cbd(degree, NOISE_VARIANCE, rng)
            .map_err(|e| CryptoError::Parameter(e.to_string()))?;
        Ok(CkksSecretKey { coeffs: coeffs.into_boxed_slice() })
    }

    /// Taille N et coefficients dans [-2σ², 2σ²] (support de la loi binomiale)
    pub fn is_well_formed(&self, degree: usize) -> bool {
        let bound = 2 * NOISE_VARIANCE as i64;
        self.coeffs.len() == degree && self.coeffs.iter().all(|c| c.abs() <= bound)
    }

    fn to_poly(&self, ctx: &Arc<Context>) -> Result<Zeroizing<Poly>> {
        let mut s = Zeroizing::new(Poly::try_convert_from(
            &*self.coeffs,
            ctx,
            false,
            Representation::PowerBasis,
        )?);
        s.change_representation(Representation::Ntt);
        Ok(s)
    }

    pub fn to_bytes(&self) -> Result<Zeroizing<Vec<u8>>> {
        Ok(Zeroizing::new(bincode::serialize(self)?))
    }

    pub fn from_bytes(bytes: &[u8], degree: usize) -> Result<Self> {
        let sk: CkksSecretKey = bincode::deserialize(bytes)?;
        if !sk.is_well_formed(degree) {
            return Err(CryptoError::Deserialization(
                "clé secrète CKKS de taille ou d'amplitude invalide".to_string(),
            ));
        }
        Ok(sk)
    }
}

impl Zeroize for CkksSecretKey {
    fn zeroize(&mut self) {
        self.coeffs.zeroize();
    }
}

impl Drop for CkksSecretKey {
    fn drop(&mut self) {
        self.zeroize();
    }
}

// Jamais de coefficients secrets dans les journaux
impl fmt::Debug for CkksSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CkksSecretKey(<{} coefficients masqués>)", self.coeffs.len())
    }
}

// ============================================================================
// Clé publique
// ============================================================================
#[derive(Clone, Debug)]
pub struct CkksPublicKey {
    p0: Poly,
    p1: Poly,
}

impl CkksPublicKey {
    pub fn new<R: RngCore + CryptoRng>(
        sk:  &CkksSecretKey,
        ctx: &Arc<Context>,
        rng: &mut R,
    ) -> Result<Self> {
        let s = sk.to_poly(ctx)?;
        let a = Poly::random(ctx, Representation::Ntt, rng);
        let e = Zeroizing::new(Poly::small(ctx, Representation::Ntt, NOISE_VARIANCE, rng)?);
        let mut p0 = -(&a * &*s);
        p0 += &*e;
        Ok(CkksPublicKey { p0, p1: a })
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        pair_to_bytes(&self.p0, &self.p1)
    }

    pub fn from_bytes(bytes: &[u8], ctx: &Arc<Context>) -> Result<Self> {
        let (p0, p1) = pair_from_bytes(bytes, ctx)?;
        Ok(CkksPublicKey { p0, p1 })
    }
}

// ============================================================================
// Chiffré (c0, c1)
// ============================================================================
#[derive(Clone, Debug)]
pub struct CkksCiphertext {
    c0: Poly,
    c1: Poly,
}

impl CkksCiphertext {
    pub fn encrypt<R: RngCore + CryptoRng>(
        pk:      &CkksPublicKey,
        ctx:     &Arc<Context>,
        message: &[i64],
        rng:     &mut R,
    ) -> Result<Self> {
        let mut m = Zeroizing::new(Poly::try_convert_from(
            message,
            ctx,
            false,
            Representation::PowerBasis,
        )?);
        m.change_representation(Representation::Ntt);

        let u = Zeroizing::new(Poly::small(ctx, Representation::Ntt, NOISE_VARIANCE, rng)?);
        let e1 = Zeroizing::new(Poly::small(ctx, Representation::Ntt, NOISE_VARIANCE, rng)?);
        let e2 = Zeroizing::new(Poly::small(ctx, Representation::Ntt, NOISE_VARIANCE, rng)?);

        let mut c0 = &*u * &pk.p0;
        c0 += &*e1;
        c0 += &*m;
        let mut c1 = &*u * &pk.p1;
        c1 += &*e2;
        Ok(CkksCiphertext { c0, c1 })
    }

    /// Les `len` premiers coefficients de c0 + c1·s, centrés dans (-Q/2, Q/2]
    pub fn decrypt(&self, sk: &CkksSecretKey, ctx: &Arc<Context>, len: usize) -> Result<Vec<i64>> {
        let s = sk.to_poly(ctx)?;
        let mut x = Zeroizing::new(&self.c1 * &*s);
        *x += &self.c0;
        x.change_representation(Representation::PowerBasis);

        let q = BigInt::from(ctx.modulus().clone());
        let half_q = &q >> 1u32;
        let lifted = Vec::<BigUint>::from(&*x);
        lifted
            .into_iter()
            .take(len)
            .map(|c| {
                let mut c = BigInt::from(c);
                if c > half_q {
                    c -= &q;
                }
                c.to_i64().ok_or_else(|| {
                    CryptoError::Deserialization("coefficient CKKS hors de i64".to_string())
                })
            })
            .collect()
    }

    pub fn sub(&self, other: &CkksCiphertext) -> CkksCiphertext {
        CkksCiphertext { c0: &self.c0 - &other.c0, c1: &self.c1 - &other.c1 }
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        pair_to_bytes(&self.c0, &self.c1)
    }

    pub fn from_bytes(bytes: &[u8], ctx: &Arc<Context>) -> Result<Self> {
        let (c0, c1) = pair_from_bytes(bytes, ctx)?;
        Ok(CkksCiphertext { c0, c1 })
    }
}

// ============================================================================
// Matériel de clé CKKS
// ============================================================================
#[derive(Clone)]
pub struct CkksKeys {
    ctx:    Arc<Context>,
    degree: usize,
    public: CkksPublicKey,
    secret: Option<CkksSecretKey>,
}

impl fmt::Debug for CkksKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CkksKeys")
            .field("degree", &self.degree)
            .field("moduli", &self.ctx.moduli())
            .field("has_secret", &self.secret.is_some())
            .finish()
    }
}

impl CkksKeys {
    pub fn generate<R: RngCore + CryptoRng>(
        ctx:    Arc<Context>,
        degree: usize,
        rng:    &mut R,
    ) -> Result<Self> {
        let secret = CkksSecretKey::random(degree, rng)?;
        let public = CkksPublicKey::new(&secret, &ctx, rng)?;
        Ok(CkksKeys { ctx, degree, public, secret: Some(secret) })
    }

    pub fn from_bytes(
        ctx:    Arc<Context>,
        degree: usize,
        public: &[u8],
        secret: Option<&[u8]>,
    ) -> Result<Self> {
        let public = CkksPublicKey::from_bytes(public, &ctx)?;
        let secret = secret.map(|bytes| CkksSecretKey::from_bytes(bytes, degree)).transpose()?;
        Ok(CkksKeys { ctx, degree, public, secret })
    }

    /// Q = q_1···q_k
    pub fn modulus(&self) -> &BigUint { self.ctx.modulus() }

    pub fn public_bytes(&self) -> Result<Vec<u8>> {
        self.public.to_bytes()
    }

    pub fn secret_bytes(&self) -> Result<Option<Zeroizing<Vec<u8>>>> {
        self.secret.as_ref().map(CkksSecretKey::to_bytes).transpose()
    }

    pub fn has_secret(&self) -> bool { self.secret.is_some() }

    pub fn strip_secret(&mut self) {
        self.secret = None;
    }

    pub fn encrypt<R: RngCore + CryptoRng>(&self, message: &[i64], rng: &mut R) -> Result<CkksCiphertext> {
        CkksCiphertext::encrypt(&self.public, &self.ctx, message, rng)
    }

    pub fn decrypt(&self, ct: &CkksCiphertext, len: usize) -> Result<Vec<i64>> {
        let sk = self.secret.as_ref().ok_or(CryptoError::NoSecretKey)?;
        ct.decrypt(sk, &self.ctx, len)
    }

    pub fn ciphertext_from_bytes(&self, bytes: &[u8]) -> Result<CkksCiphertext> {
        CkksCiphertext::from_bytes(bytes, &self.ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn setup(seed: u64) -> (Arc<Context>, CkksSecretKey, CkksPublicKey, StdRng) {
        let ctx = build_context(&[30, 24], 2048).unwrap();
        let mut rng = StdRng::seed_from_u64(seed);
        let sk = CkksSecretKey::random(2048, &mut rng).unwrap();
        let pk = CkksPublicKey::new(&sk, &ctx, &mut rng).unwrap();
        (ctx, sk, pk, rng)
    }

    #[test]
    fn test_moduli_are_ntt_friendly_and_distinct() {
        let moduli = generate_moduli(&[40, 40, 30], 4096).unwrap();
        assert_eq!(moduli.len(), 3);
        assert_ne!(moduli[0], moduli[1]);
        for (&q, bits) in moduli.iter().zip([40, 40, 30]) {
            assert_eq!(q % 8192, 1);
            assert_eq!(64 - q.leading_zeros(), bits);
        }
        // Même entrée, même chaîne : les deux pairs reconstruisent le même anneau
        assert_eq!(generate_moduli(&[40, 40, 30], 4096).unwrap(), moduli);
    }

    #[test]
    fn test_encrypt_decrypt_is_noisy_message() {
        let (ctx, sk, pk, mut rng) = setup(21);
        let message = [1_000_000i64, -2_500_000, 0, 42];
        let ct = CkksCiphertext::encrypt(&pk, &ctx, &message, &mut rng).unwrap();
        let plain = ct.decrypt(&sk, &ctx, message.len()).unwrap();

        assert_eq!(plain.len(), message.len());
        for (x, m) in plain.iter().zip(message) {
            assert!((x - m).abs() < 100_000, "bruit {} trop grand", (x - m).abs());
        }
    }

    #[test]
    fn test_homomorphic_subtraction() {
        let (ctx, sk, pk, mut rng) = setup(22);
        let a = CkksCiphertext::encrypt(&pk, &ctx, &[5_000_000, 1], &mut rng).unwrap();
        let b = CkksCiphertext::encrypt(&pk, &ctx, &[2_000_000, 1], &mut rng).unwrap();
        let diff = a.sub(&b).decrypt(&sk, &ctx, 2).unwrap();
        assert!((diff[0] - 3_000_000).abs() < 200_000);
        assert!(diff[1].abs() < 200_000);
    }

    #[test]
    fn test_bytes_roundtrip_keeps_plaintext() {
        let (ctx, sk, pk, mut rng) = setup(23);
        let ct = CkksCiphertext::encrypt(&pk, &ctx, &[-7_000_000], &mut rng).unwrap();
        let back = CkksCiphertext::from_bytes(&ct.to_bytes().unwrap(), &ctx).unwrap();
        assert_eq!(back.decrypt(&sk, &ctx, 1).unwrap(), ct.decrypt(&sk, &ctx, 1).unwrap());

        let pk_back = CkksPublicKey::from_bytes(&pk.to_bytes().unwrap(), &ctx).unwrap();
        assert_eq!(pk_back.to_bytes().unwrap(), pk.to_bytes().unwrap());
        assert!(CkksCiphertext::from_bytes(&[0, 1, 2], &ctx).is_err());
    }

    #[test]
    fn test_secret_key_checks_and_redaction() {
        let (_, sk, _, _) = setup(24);
        assert!(sk.is_well_formed(2048));
        assert!(!sk.is_well_formed(1024));
        assert!(format!("{sk:?}").contains("masqués"));

        let bytes = sk.to_bytes().unwrap();
        assert!(CkksSecretKey::from_bytes(&bytes, 2048).is_ok());
        assert!(matches!(
            CkksSecretKey::from_bytes(&bytes, 4096),
            Err(CryptoError::Deserialization(_))
        ));
    }

    #[test]
    fn test_zeroize_clears_coefficients() {
        let (_, mut sk, _, _) = setup(25);
        sk.zeroize();
        assert!(sk.coeffs.iter().all(|&c| c == 0));
    }

    #[test]
    fn test_keys_reload_from_bytes() {
        let ctx = build_context(&[30, 24], 2048).unwrap();
        let mut rng = StdRng::seed_from_u64(26);
        let keys = CkksKeys::generate(ctx.clone(), 2048, &mut rng).unwrap();
        let ct = keys.encrypt(&[123_456_789], &mut rng).unwrap();

        let secret = keys.secret_bytes().unwrap();
        let back = CkksKeys::from_bytes(
            ctx.clone(),
            2048,
            &keys.public_bytes().unwrap(),
            secret.as_deref().map(Vec::as_slice),
        )
        .unwrap();
        assert_eq!(back.decrypt(&ct, 1).unwrap(), keys.decrypt(&ct, 1).unwrap());

        let mut public = back.clone();
        public.strip_secret();
        assert!(matches!(public.decrypt(&ct, 1), Err(CryptoError::NoSecretKey)));
        assert!(public.secret_bytes().unwrap().is_none());
    }
}
