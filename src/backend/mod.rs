// ===========================================================================
// Primitives homomorphes
//   BFV  : fhe::bfv (clés, chiffrement, soustraction)
//   CKKS : chiffrement par coefficients sur l'anneau fhe_math::rq
// ===========================================================================
pub mod ckks;
pub mod bfv;
pub mod keys;
pub mod ciphertext;

/// Variance des lois binomiales centrées : secret, masque u et bruits
pub const NOISE_VARIANCE: usize = 10;

pub use ciphertext::Ciphertext;
pub use keys::KeyMaterial;
