// ============================================================================
// Côté client du protocole
//
// Le client détient la clé secrète, les embeddings en clair et les
// projections LSH. Il ne transmet que le contexte public, les clés de seau
// et des chiffrés ; il déchiffre les différences renvoyées et les classe.
// ============================================================================

use std::sync::Arc;
use tracing::{info, warn};

use crate::codec::encode_text;
use crate::context::{EncryptionContext, HeParams, Scheme};
use crate::crypto_error::{CryptoError, Result};
use crate::lsh::{Hashing, HashingKind, HashingStrategy, LshParams};
use crate::protocol::messages::{
    IndexPayload, IngestPayload, PublicKeyPayload, QueryPayload, QueryResponse, Request, Response,
};
use crate::protocol::state::ProtocolState;
use crate::ranker::CandidateRanker;
use crate::storage::ByteStore;
use crate::strategy::{EncryptionStrategy, Strategy};

/// Canal vers le serveur (socket, appel local en test)
pub trait Transport {
    fn send(&mut self, request: Request) -> Result<Response>;
}

#[derive(Clone, Debug)]
pub struct ClientConfig {
    /// Préfixe des blobs de contexte : `<prefix>_private`, `<prefix>_public`
    pub key_prefix: String,
    pub model_key:  String,
    pub scheme:     Scheme,
    pub he_params:  HeParams,
    pub lsh:        LshParams,
    pub hashing:    HashingKind,
}

impl ClientConfig {
    pub fn private_key(&self) -> String { format!("{}_private", self.key_prefix) }

    pub fn public_key(&self) -> String { format!("{}_public", self.key_prefix) }
}

// ============================================================================
// ClientSession — une stratégie, un index, un transport
// ============================================================================
pub struct ClientSession<T: Transport> {
    strategy:  Strategy,
    index:     Hashing,
    phase:     ProtocolState,
    transport: T,
}

impl<T: Transport> ClientSession<T> {
    // -----------------------------------------------------------------------
    // Ouverture : recharge contexte secret et modèle LSH s'ils existent,
    // sinon les génère et les persiste immédiatement.
    // -----------------------------------------------------------------------
    pub fn open(config: &ClientConfig, store: Arc<dyn ByteStore>, transport: T) -> Result<Self> {
        let ctx = match EncryptionContext::load(store.as_ref(), &config.private_key())? {
            Some(ctx) => {
                if !ctx.has_secret() {
                    return Err(CryptoError::NoSecretKey);
                }
                if ctx.scheme() != config.scheme {
                    warn!(stored = %ctx.scheme(), configured = %config.scheme, "schéma persisté conservé");
                }
                ctx
            }
            None => {
                let ctx = EncryptionContext::create_secret(config.scheme, &config.he_params)?;
                ctx.persist(store.as_ref(), &config.private_key())?;
                ctx.persist_public(store.as_ref(), &config.public_key())?;
                ctx
            }
        };

        let index = match config.hashing.load(store.clone(), &config.model_key)? {
            Some(index) if index.is_ready() => {
                if index.params() != config.lsh {
                    warn!(configured = ?config.lsh, stored = ?index.params(), "paramètres LSH persistés conservés");
                }
                index
            }
            _ => {
                let mut index = config.hashing.create(config.lsh, store, &config.model_key)?;
                index.initialize();
                index.save()?;
                index
            }
        };

        info!(scheme = %ctx.scheme(), "session client ouverte");
        Ok(ClientSession {
            strategy: Strategy::with_context(ctx),
            index,
            phase: ProtocolState::IndexReady,
            transport,
        })
    }

    pub fn strategy(&self) -> &Strategy { &self.strategy }

    pub fn index(&self) -> &Hashing { &self.index }

    pub fn phase(&self) -> ProtocolState { self.phase }

    // -----------------------------------------------------------------------
    // Construction des charges utiles
    // -----------------------------------------------------------------------

    pub fn public_key_payload(&self) -> Result<PublicKeyPayload> {
        let ctx = self.strategy.require_context()?;
        Ok(PublicKeyPayload { public_key: Some(encode_text(&ctx.serialize(false)?)) })
    }

    pub fn index_payload(&self) -> IndexPayload {
        self.index.params()
    }

    pub fn ingest_payload(&self, id: u64, embedding: &[f64], is_final: bool) -> Result<IngestPayload> {
        let point_hash = self.index.point_hashes(embedding)?;
        let ct = self.strategy.encrypt(embedding)?;
        Ok(IngestPayload {
            encrypted_data: self.strategy.to_wire(&ct)?,
            point_hash,
            point_identification: id,
            is_final,
        })
    }

    pub fn query_payload(&self, embedding: &[f64]) -> Result<QueryPayload> {
        let point_hash = self.index.point_hashes(embedding)?;
        let ct = self.strategy.encrypt(embedding)?;
        Ok(QueryPayload { encrypted_data: self.strategy.to_wire(&ct)?, point_hash })
    }

    // -----------------------------------------------------------------------
    // Classement : distance = somme des valeurs absolues de la différence
    // -----------------------------------------------------------------------
    pub fn rank(&self, response: &QueryResponse) -> Result<CandidateRanker<u64>> {
        let QueryResponse { result } = response;
        if result.id.len() != result.dis.len() {
            return Err(CryptoError::DimensionMismatch {
                expected: result.id.len(),
                actual:   result.dis.len(),
            });
        }
        let mut ranker = CandidateRanker::new();
        for (&id, text) in result.id.iter().zip(&result.dis) {
            let diff = self.strategy.decrypt(&self.strategy.from_wire(text)?)?;
            let distance: f64 = diff.iter().map(|d| d.abs()).sum();
            ranker.insert(distance, id);
        }
        Ok(ranker)
    }

    // -----------------------------------------------------------------------
    // Échanges avec le serveur
    // -----------------------------------------------------------------------

    /// Envoie le contexte public puis les paramètres d'index
    pub fn handshake(&mut self) -> Result<()> {
        let key = self.public_key_payload()?;
        self.transport.send(Request::PublicKey(key))?.into_ack()?;
        let params = self.index_payload();
        self.transport.send(Request::IndexParams(params))?.into_ack()?;
        info!("poignée de main terminée");
        Ok(())
    }

    pub fn ingest(&mut self, id: u64, embedding: &[f64], is_final: bool) -> Result<()> {
        let payload = self.ingest_payload(id, embedding, is_final)?;
        self.transport.send(Request::AddFace(payload))?.into_ack()?;
        self.phase.on_operation();
        Ok(())
    }

    /// Enrôlement en masse : une seule sauvegarde côté serveur, à la fin
    pub fn enroll(&mut self, items: &[(u64, Vec<f64>)]) -> Result<()> {
        for (id, embedding) in items {
            self.ingest(*id, embedding, false)?;
        }
        self.save_remote()?;
        info!(count = items.len(), "enrôlement terminé");
        Ok(())
    }

    pub fn save_remote(&mut self) -> Result<()> {
        self.transport.send(Request::SaveIndex)?.into_ack()?;
        Ok(())
    }

    pub fn candidates(&mut self, embedding: &[f64]) -> Result<CandidateRanker<u64>> {
        let payload = self.query_payload(embedding)?;
        let response = self.transport.send(Request::Candidates(payload))?.into_candidates()?;
        self.phase.on_operation();
        self.rank(&response)
    }

    /// Jusqu'à k meilleurs (distance, id) ; vide si aucun seau partagé
    pub fn identify(&mut self, embedding: &[f64], k: usize) -> Result<Vec<(f64, u64)>> {
        Ok(self.candidates(embedding)?.top_k(k))
    }
}
