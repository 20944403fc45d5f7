use crate::context::{EncryptionContext, Scheme};
use crate::crypto_error::{CryptoError, Result};
use crate::strategy::strategy::EncryptionStrategy;

// ============================================================================
// BFV — réels pré-multipliés par l'échelle entière du contexte puis arrondis.
//
// L'échelle fait partie des paramètres persistés : un changement d'échelle
// implique un nouveau contexte, donc des chiffrés incompatibles.
// ============================================================================
#[derive(Debug, Default)]
pub struct BfvStrategy {
    context: Option<EncryptionContext>,
}

impl BfvStrategy {
    pub fn new() -> Self { Self::default() }
}

/// (t, échelle entière) du contexte
fn plain_params(ctx: &EncryptionContext) -> Result<(u64, u64)> {
    let params = ctx.params();
    match (params.plain_modulus, params.integer_scale) {
        (Some(t), Some(scale)) => Ok((t, scale)),
        _ => Err(CryptoError::Parameter(
            "contexte BFV sans plain_modulus ou integer_scale".to_string(),
        )),
    }
}

impl EncryptionStrategy for BfvStrategy {
    fn scheme(&self) -> Scheme { Scheme::Bfv }

    fn context(&self) -> Option<&EncryptionContext> { self.context.as_ref() }

    fn install_context(&mut self, ctx: EncryptionContext) {
        self.context = Some(ctx);
    }

    // |round(v · s)| < t/4 : la différence de deux valeurs reste sous t/2
    fn encode(&self, ctx: &EncryptionContext, values: &[f64]) -> Result<Vec<i64>> {
        let (t, scale) = plain_params(ctx)?;
        let limit = t as f64 / 4.0;

        values
            .iter()
            .map(|&v| {
                let scaled = (v * scale as f64).round();
                if !scaled.is_finite() || scaled.abs() >= limit {
                    return Err(CryptoError::PlaintextOverflow {
                        value: v,
                        bound: limit / scale as f64,
                    });
                }
                Ok(scaled as i64)
            })
            .collect()
    }

    // Coefficients déjà centrés dans (-t/2, t/2] par fhe : il reste à diviser
    fn decode(&self, ctx: &EncryptionContext, raw: &[i64]) -> Result<Vec<f64>> {
        let (_, scale) = plain_params(ctx)?;
        Ok(raw.iter().map(|&m| m as f64 / scale as f64).collect())
    }
}
