use num_traits::ToPrimitive;

use crate::context::{EncryptionContext, Scheme};
use crate::crypto_error::{CryptoError, Result};
use crate::strategy::strategy::EncryptionStrategy;

/// Coefficient encodé maximal : laisse un facteur 4 sous Q/2 pour la différence et le bruit
const I64_HEADROOM: f64 = (1u64 << 62) as f64;

// ============================================================================
// CKKS — réels encodés par l'échelle globale du contexte : m = round(v · 2^k)
// ============================================================================
#[derive(Debug, Default)]
pub struct CkksStrategy {
    context: Option<EncryptionContext>,
}

impl CkksStrategy {
    pub fn new() -> Self { Self::default() }
}

fn scale_of(ctx: &EncryptionContext) -> Result<f64> {
    let bits = ctx.params().global_scale_bits.ok_or_else(|| {
        CryptoError::Parameter("contexte CKKS sans global_scale_bits".to_string())
    })?;
    Ok(2f64.powi(bits as i32))
}

impl EncryptionStrategy for CkksStrategy {
    fn scheme(&self) -> Scheme { Scheme::Ckks }

    fn context(&self) -> Option<&EncryptionContext> { self.context.as_ref() }

    fn install_context(&mut self, ctx: EncryptionContext) {
        self.context = Some(ctx);
    }

    fn encode(&self, ctx: &EncryptionContext, values: &[f64]) -> Result<Vec<i64>> {
        let scale = scale_of(ctx)?;
        let q_quarter = (ctx.ciphertext_modulus()? >> 2u32).to_f64().unwrap_or(f64::MAX);
        let limit = q_quarter.min(I64_HEADROOM);

        values
            .iter()
            .map(|&v| {
                let scaled = (v * scale).round();
                if !scaled.is_finite() || scaled.abs() >= limit {
                    return Err(CryptoError::PlaintextOverflow { value: v, bound: limit / scale });
                }
                Ok(scaled as i64)
            })
            .collect()
    }

    fn decode(&self, ctx: &EncryptionContext, raw: &[i64]) -> Result<Vec<f64>> {
        let scale = scale_of(ctx)?;
        Ok(raw.iter().map(|&x| x as f64 / scale).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::HeParams;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn strategy() -> CkksStrategy {
        let params = HeParams {
            poly_modulus_degree: 4096,
            coeff_mod_bit_sizes: vec![60, 49],
            plain_modulus:       None,
            global_scale_bits:   Some(40),
            integer_scale:       None,
        };
        let mut rng = StdRng::seed_from_u64(31);
        let mut s = CkksStrategy::new();
        s.set_context(EncryptionContext::create_secret_with_rng(Scheme::Ckks, &params, &mut rng).unwrap())
            .unwrap();
        s
    }

    #[test]
    fn test_ckks_roundtrip_within_tolerance() {
        let s = strategy();
        let v = [0.123456, -98.5, 1e-3, 42.0];
        let back = s.decrypt(&s.encrypt(&v).unwrap()).unwrap();
        assert_eq!(back.len(), v.len());
        for (a, b) in back.iter().zip(&v) {
            assert!((a - b).abs() < 1e-6, "{a} != {b}");
        }
    }

    #[test]
    fn test_ckks_rejects_non_finite_and_huge_values() {
        let s = strategy();
        assert!(matches!(s.encrypt(&[f64::NAN]), Err(CryptoError::PlaintextOverflow { .. })));
        assert!(matches!(s.encrypt(&[1e30]), Err(CryptoError::PlaintextOverflow { .. })));
    }

    #[test]
    fn test_ckks_refuses_bfv_context() {
        let mut rng = StdRng::seed_from_u64(32);
        let params = HeParams {
            poly_modulus_degree: 2048,
            coeff_mod_bit_sizes: vec![54],
            plain_modulus:       Some(257),
            global_scale_bits:   None,
            integer_scale:       Some(10),
        };
        let bfv = EncryptionContext::create_secret_with_rng(Scheme::Bfv, &params, &mut rng).unwrap();
        let mut s = CkksStrategy::new();
        assert!(matches!(s.set_context(bfv), Err(CryptoError::ContextMismatch(_))));
        assert!(s.context().is_none());
    }
}
