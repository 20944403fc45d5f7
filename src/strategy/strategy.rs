use rand_core::{OsRng, TryRngCore};
use tracing::info;

use crate::backend::Ciphertext;
use crate::codec::{decode_text, encode_text};
use crate::context::{EncryptionContext, Scheme};
use crate::crypto_error::{CryptoError, Result};
use crate::storage::ByteStore;
use crate::strategy::bfv::BfvStrategy;
use crate::strategy::ckks::CkksStrategy;

// ============================================================================
// EncryptionStrategy
//
// Chaque schéma fournit son encodage réel → coefficients entiers et le
// décodage inverse ; chiffrement, déchiffrement, soustraction et transport
// sont délégués au contexte.
// ============================================================================
pub trait EncryptionStrategy: Send + Sync {
    fn scheme(&self) -> Scheme;

    fn context(&self) -> Option<&EncryptionContext>;

    /// Remplace le contexte sans contrôle (voir `set_context`)
    fn install_context(&mut self, ctx: EncryptionContext);

    fn encode(&self, ctx: &EncryptionContext, values: &[f64]) -> Result<Vec<i64>>;

    fn decode(&self, ctx: &EncryptionContext, raw: &[i64]) -> Result<Vec<f64>>;

    // -----------------------------------------------------------------------
    // Gestion du contexte
    // -----------------------------------------------------------------------

    fn set_context(&mut self, ctx: EncryptionContext) -> Result<()> {
        if ctx.scheme() != self.scheme() {
            return Err(CryptoError::ContextMismatch(format!(
                "contexte {} fourni à une stratégie {}",
                ctx.scheme(),
                self.scheme()
            )));
        }
        self.install_context(ctx);
        Ok(())
    }

    fn require_context(&self) -> Result<&EncryptionContext> {
        self.context().ok_or(CryptoError::UninitializedContext)
    }

    // -----------------------------------------------------------------------
    // Chiffrement / déchiffrement
    // -----------------------------------------------------------------------

    fn encrypt(&self, values: &[f64]) -> Result<Ciphertext> {
        let ctx = self.require_context()?;
        let message = self.encode(ctx, values)?;
        let mut rng = OsRng.unwrap_err();
        ctx.encrypt_coeffs(&message, &mut rng)
    }

    fn decrypt(&self, ct: &Ciphertext) -> Result<Vec<f64>> {
        let ctx = self.require_context()?;
        let raw = ctx.decrypt_coeffs(ct)?;
        self.decode(ctx, &raw)
    }

    /// Enc(a) - Enc(b), sans qu'aucun clair n'apparaisse côté calcul
    fn homomorphic_subtract(&self, a: &Ciphertext, b: &Ciphertext) -> Result<Ciphertext> {
        self.require_context()?.subtract(a, b)
    }

    // -----------------------------------------------------------------------
    // Transport : bincode puis base64
    // -----------------------------------------------------------------------

    fn to_wire(&self, ct: &Ciphertext) -> Result<String> {
        Ok(encode_text(&ct.to_bytes()?))
    }

    fn from_wire(&self, text: &str) -> Result<Ciphertext> {
        let ctx = self.require_context()?;
        ctx.read_ciphertext(&decode_text(text)?)
    }

    // -----------------------------------------------------------------------
    // Réception du contexte public d'un pair
    //
    // Le contexte est réduit au public même si le pair a envoyé son secret,
    // persisté sous la clé de l'identité, puis installé.
    // -----------------------------------------------------------------------
    fn receive_public_context(
        &mut self,
        public_key: Option<&str>,
        store:      &dyn ByteStore,
        key:        &str,
    ) -> Result<()> {
        let text = public_key.ok_or_else(|| CryptoError::MissingKey("public_key".to_string()))?;
        let ctx = EncryptionContext::from_public_bytes(&decode_text(text)?)?;
        if ctx.scheme() != self.scheme() {
            return Err(CryptoError::ContextMismatch(format!(
                "contexte {} reçu par une stratégie {}",
                ctx.scheme(),
                self.scheme()
            )));
        }
        ctx.persist(store, key)?;
        info!(key, fingerprint = %format!("{:016x}", ctx.fingerprint()), "contexte public reçu");
        self.set_context(ctx)
    }
}

// ============================================================================
// Choix fermé de stratégie : le nom de configuration est résolu une fois
// (Scheme::from_str) puis dispatché par match.
// ============================================================================
#[derive(Debug)]
pub enum Strategy {
    Ckks(CkksStrategy),
    Bfv(BfvStrategy),
}

impl Strategy {
    pub fn for_scheme(scheme: Scheme) -> Self {
        match scheme {
            Scheme::Ckks => Strategy::Ckks(CkksStrategy::new()),
            Scheme::Bfv => Strategy::Bfv(BfvStrategy::new()),
        }
    }

    /// Stratégie déjà munie de son contexte (le schéma suit celui du contexte)
    pub fn with_context(ctx: EncryptionContext) -> Self {
        let mut strategy = Self::for_scheme(ctx.scheme());
        strategy.install_context(ctx);
        strategy
    }
}

impl EncryptionStrategy for Strategy {
    fn scheme(&self) -> Scheme {
        match self {
            Strategy::Ckks(s) => s.scheme(),
            Strategy::Bfv(s) => s.scheme(),
        }
    }

    fn context(&self) -> Option<&EncryptionContext> {
        match self {
            Strategy::Ckks(s) => s.context(),
            Strategy::Bfv(s) => s.context(),
        }
    }

    fn install_context(&mut self, ctx: EncryptionContext) {
        match self {
            Strategy::Ckks(s) => s.install_context(ctx),
            Strategy::Bfv(s) => s.install_context(ctx),
        }
    }

    fn encode(&self, ctx: &EncryptionContext, values: &[f64]) -> Result<Vec<i64>> {
        match self {
            Strategy::Ckks(s) => s.encode(ctx, values),
            Strategy::Bfv(s) => s.encode(ctx, values),
        }
    }

    fn decode(&self, ctx: &EncryptionContext, raw: &[i64]) -> Result<Vec<f64>> {
        match self {
            Strategy::Ckks(s) => s.decode(ctx, raw),
            Strategy::Bfv(s) => s.decode(ctx, raw),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeParams;
    use crate::storage::MemoryStore;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn small_params(scheme: Scheme) -> HeParams {
        match scheme {
            Scheme::Ckks => HeParams {
                poly_modulus_degree: 2048,
                coeff_mod_bit_sizes: vec![30, 24],
                plain_modulus:       None,
                global_scale_bits:   Some(30),
                integer_scale:       None,
            },
            Scheme::Bfv => HeParams {
                poly_modulus_degree: 2048,
                coeff_mod_bit_sizes: vec![54],
                plain_modulus:       Some(65537),
                global_scale_bits:   None,
                integer_scale:       Some(100),
            },
        }
    }

    fn secret_strategy(scheme: Scheme, seed: u64) -> Strategy {
        let mut rng = StdRng::seed_from_u64(seed);
        let ctx = EncryptionContext::create_secret_with_rng(scheme, &small_params(scheme), &mut rng)
            .unwrap();
        Strategy::with_context(ctx)
    }

    #[test]
    fn test_encrypt_without_context_fails() {
        for scheme in [Scheme::Ckks, Scheme::Bfv] {
            let s = Strategy::for_scheme(scheme);
            assert!(matches!(s.encrypt(&[1.0]), Err(CryptoError::UninitializedContext)));
            assert!(matches!(s.from_wire("AAAA"), Err(CryptoError::UninitializedContext)));
        }
    }

    #[test]
    fn test_subtraction_both_schemes() {
        for scheme in [Scheme::Ckks, Scheme::Bfv] {
            let s = secret_strategy(scheme, 10);
            let a = s.encrypt(&[1.5, -2.25, 3.0]).unwrap();
            let b = s.encrypt(&[0.5, 0.75, 3.0]).unwrap();
            let diff = s.decrypt(&s.homomorphic_subtract(&a, &b).unwrap()).unwrap();
            for (d, e) in diff.iter().zip([1.0, -3.0, 0.0]) {
                assert!((d - e).abs() < 1e-3, "{scheme}: {d} != {e}");
            }
        }
    }

    #[test]
    fn test_public_only_strategy_cannot_decrypt() {
        for scheme in [Scheme::Ckks, Scheme::Bfv] {
            let owner = secret_strategy(scheme, 11);
            let public_bytes = owner.require_context().unwrap().serialize(false).unwrap();
            let peer =
                Strategy::with_context(EncryptionContext::from_public_bytes(&public_bytes).unwrap());

            // Le pair public chiffre et soustrait, mais ne déchiffre jamais
            let a = peer.encrypt(&[4.0]).unwrap();
            let b = peer.encrypt(&[1.0]).unwrap();
            let diff = peer.homomorphic_subtract(&a, &b).unwrap();
            assert_eq!(peer.decrypt(&diff).unwrap_err(), CryptoError::NoSecretKey);

            // Le détenteur du secret, lui, retrouve 3 sur ses propres paramètres
            let plain = owner.decrypt(&diff).unwrap();
            assert!((plain[0] - 3.0).abs() < 1e-3, "{scheme}: {}", plain[0]);
        }
    }

    #[test]
    fn test_subtraction_across_contexts_is_rejected() {
        let s1 = secret_strategy(Scheme::Ckks, 12);
        let s2 = secret_strategy(Scheme::Ckks, 13);
        let a = s1.encrypt(&[1.0]).unwrap();
        let b = s2.encrypt(&[1.0]).unwrap();
        assert!(matches!(s1.homomorphic_subtract(&a, &b), Err(CryptoError::ContextMismatch(_))));
    }

    #[test]
    fn test_wire_roundtrip_and_foreign_context() {
        let s1 = secret_strategy(Scheme::Bfv, 14);
        let s2 = secret_strategy(Scheme::Bfv, 15);
        let ct = s1.encrypt(&[7.0, 8.0]).unwrap();
        let text = s1.to_wire(&ct).unwrap();

        // Sérialisation déterministe : relire puis réécrire redonne le même texte
        assert_eq!(s1.to_wire(&s1.from_wire(&text).unwrap()).unwrap(), text);
        assert!(matches!(s2.from_wire(&text), Err(CryptoError::Deserialization(_))));
        assert!(matches!(s1.from_wire("@@@"), Err(CryptoError::Deserialization(_))));
    }

    #[test]
    fn test_receive_public_context() {
        let owner = secret_strategy(Scheme::Bfv, 16);
        let text = encode_text(&owner.require_context().unwrap().serialize(false).unwrap());
        let store = MemoryStore::new();

        let mut server = Strategy::for_scheme(Scheme::Bfv);
        assert_eq!(
            server.receive_public_context(None, &store, "context_alice"),
            Err(CryptoError::MissingKey("public_key".to_string()))
        );
        server.receive_public_context(Some(&text), &store, "context_alice").unwrap();
        assert!(!server.require_context().unwrap().has_secret());

        // Persisté sous la clé de l'identité
        let stored = EncryptionContext::load(&store, "context_alice").unwrap().unwrap();
        assert_eq!(stored.fingerprint(), owner.require_context().unwrap().fingerprint());

        // Une stratégie CKKS refuse un contexte BFV
        let mut wrong = Strategy::for_scheme(Scheme::Ckks);
        assert!(matches!(
            wrong.receive_public_context(Some(&text), &store, "context_bob"),
            Err(CryptoError::ContextMismatch(_))
        ));
    }
}
