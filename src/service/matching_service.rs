// ============================================================================
// MatchingService — point d'entrée du serveur
//
// Pour chaque requête : validation de l'identité, résolution de ses
// composants dans le cache (chargement paresseux depuis les magasins), prise
// du verrou adéquat, puis appel explicite de l'opération du protocole.
// Aucun état global : tout ce qu'une opération touche lui est passé.
// ============================================================================

use std::sync::Arc;
use tracing::{debug, warn};

use crate::config::Settings;
use crate::context::EncryptionContext;
use crate::crypto_error::{CryptoError, Result};
use crate::lsh::HashingStrategy;
use crate::protocol::server;
use crate::protocol::{ProtocolState, QueryPayload, Request, Response, Transport};
use crate::registry::{IdentityCache, IdentitySlot, IdentityState};
use crate::storage::{BlobEmbeddingStore, ByteStore, EmbeddingStore, FileStore};
use crate::strategy::Strategy;

/// Longueur maximale d'une identité (elle entre dans les clés de blob)
const MAX_IDENTITY_LEN: usize = 128;

fn validate_identity(identity: &str) -> Result<()> {
    let ok = !identity.is_empty()
        && identity.len() <= MAX_IDENTITY_LEN
        && identity.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if ok {
        Ok(())
    } else {
        Err(CryptoError::Parameter(format!("identité invalide : {identity:?}")))
    }
}

pub struct MatchingService {
    settings:   Settings,
    cache:      IdentityCache,
    blobs:      Arc<dyn ByteStore>,
    embeddings: Arc<dyn EmbeddingStore>,
}

impl MatchingService {
    pub fn new(
        settings:   Settings,
        blobs:      Arc<dyn ByteStore>,
        embeddings: Arc<dyn EmbeddingStore>,
    ) -> Result<Self> {
        settings.validate()?;
        let cache = IdentityCache::new(settings.cache_capacity)?;
        Ok(MatchingService { settings, cache, blobs, embeddings })
    }

    /// Magasins sur disque sous `data_dir`
    pub fn open(settings: Settings) -> Result<Self> {
        let blobs: Arc<dyn ByteStore> = Arc::new(FileStore::open(&settings.data_dir)?);
        let embeddings = Arc::new(BlobEmbeddingStore::new(blobs.clone()));
        Self::new(settings, blobs, embeddings)
    }

    pub fn settings(&self) -> &Settings { &self.settings }

    pub fn cache(&self) -> &IdentityCache { &self.cache }

    // -----------------------------------------------------------------------
    // Traitement d'une requête : toute erreur devient Response::Error
    // -----------------------------------------------------------------------
    pub fn handle(&self, identity: &str, request: Request) -> Response {
        let name = request.name();
        debug!(identity, request = name, "requête reçue");
        match self.dispatch(identity, request) {
            Ok(response) => response,
            Err(e) => {
                warn!(identity, request = name, error = %e, "requête refusée");
                Response::Error(e)
            }
        }
    }

    fn dispatch(&self, identity: &str, request: Request) -> Result<Response> {
        validate_identity(identity)?;
        let slot = self.cache.get_or_load(identity, |id| self.load_identity(id))?;

        match request {
            Request::PublicKey(payload) => {
                let mut guard = slot.write()?;
                let state = &mut *guard;
                let key = self.settings.context_key(identity);
                server::receive_public_key(
                    &mut state.strategy,
                    &mut state.phase,
                    &payload,
                    self.blobs.as_ref(),
                    &key,
                )
                .map(Response::Ack)
            }
            Request::IndexParams(payload) => {
                let mut guard = slot.write()?;
                let state = &mut *guard;
                server::receive_index_params(
                    &mut state.index,
                    &mut state.phase,
                    &payload,
                    self.settings.hashing_strategy,
                    self.blobs.clone(),
                    &self.settings.model_key(identity),
                )
                .map(Response::Ack)
            }
            Request::AddFace(payload) => {
                let mut guard = slot.write()?;
                let state = &mut *guard;
                state.phase.require_index()?;
                let index = state
                    .index
                    .as_mut()
                    .ok_or_else(|| CryptoError::IndexNotReady("aucun index".to_string()))?;
                server::ingest(
                    &state.strategy,
                    index,
                    &mut state.phase,
                    self.embeddings.as_ref(),
                    identity,
                    &payload,
                )
                .map(Response::Ack)
            }
            Request::Candidates(payload) => self.candidates(&slot, identity, &payload),
            Request::SaveIndex => {
                let state = slot.read()?;
                server::save_index(state.index.as_ref(), state.phase).map(Response::Ack)
            }
        }
    }

    // Recherche sous verrou partagé ; le passage à Operational, s'il reste à
    // faire, prend brièvement le verrou exclusif après coup.
    fn candidates(
        &self,
        slot:     &IdentitySlot,
        identity: &str,
        payload:  &QueryPayload,
    ) -> Result<Response> {
        let (response, first_use) = {
            let state = slot.read()?;
            state.phase.require_index()?;
            let index = state
                .index
                .as_ref()
                .ok_or_else(|| CryptoError::IndexNotReady("aucun index".to_string()))?;
            let response = server::query(
                &state.strategy,
                index,
                state.phase,
                self.embeddings.as_ref(),
                identity,
                payload,
            )?;
            (response, state.phase == ProtocolState::IndexReady)
        };
        if first_use {
            slot.write()?.phase.on_operation();
        }
        Ok(Response::Candidates(response))
    }

    // -----------------------------------------------------------------------
    // Reconstitution d'une identité depuis les magasins
    // -----------------------------------------------------------------------
    fn load_identity(&self, identity: &str) -> Result<IdentityState> {
        let ctx = EncryptionContext::load(self.blobs.as_ref(), &self.settings.context_key(identity))?;
        let index = self
            .settings
            .hashing_strategy
            .load(self.blobs.clone(), &self.settings.model_key(identity))?;

        let phase = ProtocolState::restored(
            ctx.is_some(),
            index.is_some(),
            index.as_ref().is_some_and(|i| !i.is_empty()),
        );
        let strategy = match ctx {
            Some(ctx) => Strategy::with_context(ctx.strip_to_public()),
            None => Strategy::for_scheme(self.settings.encryption_strategy),
        };
        debug!(identity, %phase, "identité reconstituée");
        Ok(IdentityState { strategy, index, phase })
    }

    /// Sauvegarde de tous les index en cache (arrêt propre)
    pub fn flush(&self) -> Result<()> {
        self.cache.flush_all()
    }
}

// ============================================================================
// Transport en mémoire : le client appelle directement le service
// ============================================================================
pub struct LocalTransport {
    service:  Arc<MatchingService>,
    identity: String,
}

impl LocalTransport {
    pub fn new(service: Arc<MatchingService>, identity: impl Into<String>) -> Self {
        LocalTransport { service, identity: identity.into() }
    }
}

impl Transport for LocalTransport {
    fn send(&mut self, request: Request) -> Result<Response> {
        Ok(self.service.handle(&self.identity, request))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lsh::LshParams;
    use crate::protocol::PublicKeyPayload;
    use crate::storage::{MemoryEmbeddingStore, MemoryStore};

    fn service() -> MatchingService {
        MatchingService::new(
            Settings::default(),
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryEmbeddingStore::new()),
        )
        .unwrap()
    }

    #[test]
    fn test_invalid_identity_rejected() {
        let svc = service();
        let resp = svc.handle("../root", Request::SaveIndex);
        assert!(matches!(resp, Response::Error(CryptoError::Parameter(_))));
        assert!(svc.cache().is_empty());
    }

    #[test]
    fn test_operations_before_handshake() {
        let svc = service();
        let params = LshParams { n_dimensions: 4, n_tables: 3, n_projections: 2 };
        assert_eq!(
            svc.handle("alice", Request::IndexParams(params)),
            Response::Error(CryptoError::UninitializedContext)
        );
        let q = QueryPayload { encrypted_data: String::new(), point_hash: vec![] };
        assert_eq!(
            svc.handle("alice", Request::Candidates(q)),
            Response::Error(CryptoError::UninitializedContext)
        );
        assert_eq!(
            svc.handle("alice", Request::PublicKey(PublicKeyPayload { public_key: None })),
            Response::Error(CryptoError::MissingKey("public_key".to_string()))
        );
    }
}
