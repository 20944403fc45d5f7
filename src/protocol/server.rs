// ============================================================================
// Côté serveur du protocole
//
// Fonctions libres : les composants de l'identité (stratégie, index, état,
// magasins) sont passés explicitement par l'appelant, qui détient déjà le
// verrou adéquat. Le serveur ne voit que des chiffrés et des clés de seau ;
// il ne calcule jamais de hachage lui-même.
// ============================================================================

use std::sync::Arc;
use tracing::{debug, info};

use crate::crypto_error::{CryptoError, Result};
use crate::lsh::{Hashing, HashingKind, HashingStrategy};
use crate::protocol::messages::{
    Ack, IndexPayload, IngestPayload, PublicKeyPayload, QueryPayload, QueryResponse, QueryResult,
};
use crate::protocol::state::ProtocolState;
use crate::storage::{ByteStore, EmbeddingStore};
use crate::strategy::EncryptionStrategy;

// ---------------------------------------------------------------------------
// Unkeyed → KeyExchanged
// ---------------------------------------------------------------------------
pub fn receive_public_key(
    strategy: &mut dyn EncryptionStrategy,
    phase:    &mut ProtocolState,
    payload:  &PublicKeyPayload,
    store:    &dyn ByteStore,
    key:      &str,
) -> Result<Ack> {
    strategy.receive_public_context(payload.public_key.as_deref(), store, key)?;
    phase.on_key_exchanged();
    Ok(Ack::new("clé publique enregistrée"))
}

// ---------------------------------------------------------------------------
// KeyExchanged → IndexReady
//
// Index vide aux paramètres du client : n_tables tables, aucune projection.
// Remplace tout index précédent (les anciennes clés de seau n'ont plus de
// sens sous de nouveaux paramètres).
// ---------------------------------------------------------------------------
pub fn receive_index_params(
    index:   &mut Option<Hashing>,
    phase:   &mut ProtocolState,
    payload: &IndexPayload,
    kind:    HashingKind,
    store:   Arc<dyn ByteStore>,
    key:     &str,
) -> Result<Ack> {
    phase.require_keyed()?;
    let fresh = kind.create(*payload, store, key)?;
    fresh.save()?;
    *index = Some(fresh);
    phase.on_index_ready()?;
    Ok(Ack::new("index initialisé"))
}

// ---------------------------------------------------------------------------
// Ingestion : chiffré et clés de seau sont validés avant toute écriture.
// L'embedding est stocké avant d'être indexé : un échec du magasin ne laisse
// jamais dans l'index un id sans chiffré.
// ---------------------------------------------------------------------------
pub fn ingest(
    strategy:   &dyn EncryptionStrategy,
    index:      &mut dyn HashingStrategy,
    phase:      &mut ProtocolState,
    embeddings: &dyn EmbeddingStore,
    identity:   &str,
    payload:    &IngestPayload,
) -> Result<Ack> {
    phase.require_index()?;
    strategy.from_wire(&payload.encrypted_data)?;
    index.validate_hashes(&payload.point_hash)?;

    let id = payload.point_identification;
    embeddings.append(identity, id, &payload.encrypted_data)?;
    index.update(&payload.point_hash, id, false)?;
    if payload.is_final {
        index.save()?;
        info!(identity, id, "lot ingéré, index sauvegardé");
    } else {
        debug!(identity, id, "embedding ingéré");
    }

    phase.on_operation();
    Ok(Ack::new("embedding ajouté"))
}

// ---------------------------------------------------------------------------
// Recherche : candidats LSH puis différence homomorphe par embedding stocké
// ---------------------------------------------------------------------------
pub fn query(
    strategy:   &dyn EncryptionStrategy,
    index:      &dyn HashingStrategy,
    phase:      ProtocolState,
    embeddings: &dyn EmbeddingStore,
    identity:   &str,
    payload:    &QueryPayload,
) -> Result<QueryResponse> {
    phase.require_index()?;
    let fresh = strategy.from_wire(&payload.encrypted_data)?;
    let candidates = index.nearest(&payload.point_hash)?;

    let mut result = QueryResult::default();
    for (id, text) in embeddings.fetch(identity, &candidates)? {
        let stored = strategy.from_wire(&text)?;
        let diff = strategy.homomorphic_subtract(&fresh, &stored)?;
        result.id.push(id);
        result.dis.push(strategy.to_wire(&diff)?);
    }
    debug!(identity, candidates = candidates.len(), pairs = result.id.len(), "recherche servie");
    Ok(QueryResponse { result })
}

// ---------------------------------------------------------------------------
// Sauvegarde explicite
// ---------------------------------------------------------------------------
pub fn save_index(index: Option<&Hashing>, phase: ProtocolState) -> Result<Ack> {
    phase.require_index()?;
    let index = index.ok_or_else(|| CryptoError::IndexNotReady("aucun index".to_string()))?;
    index.save()?;
    Ok(Ack::new("index sauvegardé"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::encode_text;
    use crate::context::{EncryptionContext, HeParams, Scheme};
    use crate::lsh::LshParams;
    use crate::storage::{MemoryEmbeddingStore, MemoryStore};
    use crate::strategy::Strategy;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::collections::BTreeSet;

    /// Magasin dont toute écriture échoue
    struct FullDisk;

    impl EmbeddingStore for FullDisk {
        fn append(&self, _: &str, _: u64, _: &str) -> Result<()> {
            Err(CryptoError::Storage("disk full".to_string()))
        }

        fn fetch(&self, _: &str, _: &BTreeSet<u64>) -> Result<Vec<(u64, String)>> {
            Ok(Vec::new())
        }
    }

    fn client_strategy() -> Strategy {
        let params = HeParams {
            poly_modulus_degree: 2048,
            coeff_mod_bit_sizes: vec![30, 24],
            plain_modulus:       None,
            global_scale_bits:   Some(30),
            integer_scale:       None,
        };
        let mut rng = StdRng::seed_from_u64(51);
        Strategy::with_context(
            EncryptionContext::create_secret_with_rng(Scheme::Ckks, &params, &mut rng).unwrap(),
        )
    }

    fn public_payload(client: &Strategy) -> PublicKeyPayload {
        let ctx = client.require_context().unwrap();
        PublicKeyPayload { public_key: Some(encode_text(&ctx.serialize(false).unwrap())) }
    }

    #[test]
    fn test_index_handshake_before_key_fails() {
        let store: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        let mut index = None;
        let mut phase = ProtocolState::Unkeyed;
        let params = LshParams { n_dimensions: 4, n_tables: 3, n_projections: 2 };
        let res = receive_index_params(&mut index, &mut phase, &params, HashingKind::Lsh, store, "model_a");
        assert_eq!(res, Err(CryptoError::UninitializedContext));
        assert!(index.is_none());
    }

    #[test]
    fn test_missing_public_key_field() {
        let store = MemoryStore::new();
        let mut server = Strategy::for_scheme(Scheme::Ckks);
        let mut phase = ProtocolState::Unkeyed;
        let res = receive_public_key(
            &mut server,
            &mut phase,
            &PublicKeyPayload { public_key: None },
            &store,
            "context_a",
        );
        assert_eq!(res, Err(CryptoError::MissingKey("public_key".to_string())));
        assert_eq!(phase, ProtocolState::Unkeyed);
    }

    #[test]
    fn test_ingest_then_query_roundtrip() {
        let blobs: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        let embeddings = MemoryEmbeddingStore::new();
        let client = client_strategy();

        let mut server = Strategy::for_scheme(Scheme::Ckks);
        let mut phase = ProtocolState::Unkeyed;
        let mut index = None;
        receive_public_key(&mut server, &mut phase, &public_payload(&client), blobs.as_ref(), "context_a")
            .unwrap();
        let params = LshParams { n_dimensions: 2, n_tables: 1, n_projections: 2 };
        receive_index_params(&mut index, &mut phase, &params, HashingKind::Lsh, blobs.clone(), "model_a")
            .unwrap();

        // Ingestion avant : refusée si la clé de seau est mal formée
        let mut payload = IngestPayload {
            encrypted_data:       client.to_wire(&client.encrypt(&[1.0, 2.0]).unwrap()).unwrap(),
            point_hash:           vec!["0".into()],
            point_identification: 1,
            is_final:             true,
        };
        let idx = index.as_mut().unwrap();
        assert!(matches!(
            ingest(&server, &mut *idx, &mut phase, &embeddings, "a", &payload),
            Err(CryptoError::InvalidBucketKey(_))
        ));
        assert_eq!(embeddings.fetch("a", &[1].into_iter().collect()).unwrap(), vec![]);

        payload.point_hash = vec!["01".into()];
        ingest(&server, &mut *idx, &mut phase, &embeddings, "a", &payload).unwrap();
        assert_eq!(phase, ProtocolState::Operational);
        assert!(blobs.read("model_a").unwrap().is_some());

        let q = QueryPayload {
            encrypted_data: client.to_wire(&client.encrypt(&[1.5, 2.0]).unwrap()).unwrap(),
            point_hash:     vec!["01".into()],
        };
        let resp = query(&server, index.as_ref().unwrap(), phase, &embeddings, "a", &q).unwrap();
        assert_eq!(resp.result.id, vec![1]);
        let diff = client.decrypt(&client.from_wire(&resp.result.dis[0]).unwrap()).unwrap();
        assert!((diff[0] - 0.5).abs() < 1e-3);
        assert!(diff[1].abs() < 1e-3);
    }

    #[test]
    fn test_failed_append_leaves_index_untouched() {
        let blobs: Arc<dyn ByteStore> = Arc::new(MemoryStore::new());
        let client = client_strategy();

        let mut server = Strategy::for_scheme(Scheme::Ckks);
        let mut phase = ProtocolState::Unkeyed;
        let mut index = None;
        receive_public_key(&mut server, &mut phase, &public_payload(&client), blobs.as_ref(), "context_a")
            .unwrap();
        let params = LshParams { n_dimensions: 2, n_tables: 1, n_projections: 2 };
        receive_index_params(&mut index, &mut phase, &params, HashingKind::Lsh, blobs.clone(), "model_a")
            .unwrap();

        let payload = IngestPayload {
            encrypted_data:       client.to_wire(&client.encrypt(&[1.0, 2.0]).unwrap()).unwrap(),
            point_hash:           vec!["10".into()],
            point_identification: 7,
            is_final:             true,
        };
        let idx = index.as_mut().unwrap();
        assert_eq!(
            ingest(&server, &mut *idx, &mut phase, &FullDisk, "a", &payload),
            Err(CryptoError::Storage("disk full".to_string()))
        );
        assert!(!idx.nearest(&payload.point_hash).unwrap().contains(&7));
        assert!(idx.is_empty());
        assert_eq!(phase, ProtocolState::IndexReady);
    }
}
