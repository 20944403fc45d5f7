use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::{Arc, Mutex};

use crate::codec::fnv1a_64;
use crate::crypto_error::{CryptoError, Result};
use crate::storage::byte_store::ByteStore;

// ============================================================================
// Magasin des embeddings chiffrés
//
// Une personne (id) peut avoir plusieurs embeddings : `append` ajoute,
// `fetch` rend un couple (id, chiffré) par embedding stocké, dans l'ordre
// croissant des identifiants puis dans l'ordre d'insertion.
// Les chiffrés sont conservés sous leur forme texte de transport.
// ============================================================================
pub trait EmbeddingStore: Send + Sync {
    fn append(&self, identity: &str, id: u64, ciphertext: &str) -> Result<()>;
    fn fetch(&self, identity: &str, ids: &BTreeSet<u64>) -> Result<Vec<(u64, String)>>;
}

// ---------------------------------------------------------------------------
// En mémoire
// ---------------------------------------------------------------------------
#[derive(Debug, Default)]
pub struct MemoryEmbeddingStore {
    rows: Mutex<HashMap<String, BTreeMap<u64, Vec<String>>>>,
}

impl MemoryEmbeddingStore {
    pub fn new() -> Self { Self::default() }
}

impl EmbeddingStore for MemoryEmbeddingStore {
    fn append(&self, identity: &str, id: u64, ciphertext: &str) -> Result<()> {
        let mut rows = self.rows.lock().map_err(|_| CryptoError::LockPoisoned)?;
        rows.entry(identity.to_string())
            .or_default()
            .entry(id)
            .or_default()
            .push(ciphertext.to_string());
        Ok(())
    }

    fn fetch(&self, identity: &str, ids: &BTreeSet<u64>) -> Result<Vec<(u64, String)>> {
        let rows = self.rows.lock().map_err(|_| CryptoError::LockPoisoned)?;
        let Some(per_id) = rows.get(identity) else {
            return Ok(Vec::new());
        };
        Ok(ids
            .iter()
            .filter_map(|id| per_id.get(id).map(|cts| (id, cts)))
            .flat_map(|(&id, cts)| cts.iter().map(move |ct| (id, ct.clone())))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Adossé à un ByteStore : un blob JSON (liste de chiffrés) par (identité, id)
//
// Les lecture-modification-écriture d'un même blob sont sérialisées par un
// verrou choisi parmi LOCK_STRIPES selon la clé : deux blobs distincts ne se
// bloquent que s'ils tombent sur la même bande.
// ---------------------------------------------------------------------------
const LOCK_STRIPES: usize = 64;

pub struct BlobEmbeddingStore {
    blobs:   Arc<dyn ByteStore>,
    stripes: Box<[Mutex<()>]>,
}

impl BlobEmbeddingStore {
    pub fn new(blobs: Arc<dyn ByteStore>) -> Self {
        let stripes = (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect();
        BlobEmbeddingStore { blobs, stripes }
    }

    fn key(identity: &str, id: u64) -> String {
        format!("embeddings_{identity}_{id}")
    }

    fn stripe(&self, key: &str) -> &Mutex<()> {
        &self.stripes[(fnv1a_64(key.as_bytes()) % self.stripes.len() as u64) as usize]
    }

    fn read_list(&self, key: &str) -> Result<Vec<String>> {
        match self.blobs.read(key)? {
            Some(bytes) => Ok(serde_json::from_slice(&bytes)?),
            None => Ok(Vec::new()),
        }
    }
}

impl EmbeddingStore for BlobEmbeddingStore {
    fn append(&self, identity: &str, id: u64, ciphertext: &str) -> Result<()> {
        let key = Self::key(identity, id);
        let _guard = self.stripe(&key).lock().map_err(|_| CryptoError::LockPoisoned)?;
        let mut list = self.read_list(&key)?;
        list.push(ciphertext.to_string());
        self.blobs.write(&key, &serde_json::to_vec(&list)?)
    }

    fn fetch(&self, identity: &str, ids: &BTreeSet<u64>) -> Result<Vec<(u64, String)>> {
        let mut out = Vec::new();
        for &id in ids {
            for ct in self.read_list(&Self::key(identity, id))? {
                out.push((id, ct));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::byte_store::MemoryStore;
    use std::thread;

    fn exercise(store: &dyn EmbeddingStore) {
        store.append("alice", 2, "ct-2a").unwrap();
        store.append("alice", 1, "ct-1").unwrap();
        store.append("alice", 2, "ct-2b").unwrap();
        store.append("bob", 1, "ct-bob").unwrap();

        let ids: BTreeSet<u64> = [1, 2, 3].into_iter().collect();
        let got = store.fetch("alice", &ids).unwrap();
        assert_eq!(
            got,
            vec![
                (1, "ct-1".to_string()),
                (2, "ct-2a".to_string()),
                (2, "ct-2b".to_string()),
            ]
        );
        // Cloisonnement par identité
        assert_eq!(store.fetch("carol", &ids).unwrap(), vec![]);
    }

    #[test]
    fn test_memory_embedding_store() {
        exercise(&MemoryEmbeddingStore::new());
    }

    #[test]
    fn test_blob_embedding_store() {
        exercise(&BlobEmbeddingStore::new(Arc::new(MemoryStore::new())));
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let store = Arc::new(BlobEmbeddingStore::new(Arc::new(MemoryStore::new())));
        let handles: Vec<_> = (0..8u64)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for n in 0..10 {
                        // Même blob pour tous les threads + un blob propre au thread
                        store.append("alice", 1, &format!("ct-{t}-{n}")).unwrap();
                        store.append("alice", 100 + t, &format!("own-{n}")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        let shared = store.fetch("alice", &[1].into_iter().collect()).unwrap();
        assert_eq!(shared.len(), 80);
        let own: BTreeSet<u64> = (100..108).collect();
        assert_eq!(store.fetch("alice", &own).unwrap().len(), 80);
    }
}
