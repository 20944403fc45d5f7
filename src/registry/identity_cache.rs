// ============================================================================
// IdentityCache — composants par identité, bornés et verrouillés
//
// Chaque identité authentifiée possède sa stratégie de chiffrement, son index
// LSH et l'état de son protocole, regroupés dans un IdentitySlot :
//   - Arc<IdentitySlot>     : partagé entre les threads qui servent l'identité
//   - RwLock<IdentityState> : requêtes de lecture (recherche) concurrentes,
//                             ingestion et sauvegarde exclusives
//
// La table identité → slot est elle-même derrière un Mutex, tenu seulement le
// temps d'une consultation : le chargement depuis le disque et le vidage d'un
// slot évincé se font hors de ce verrou, une identité lente ne bloque pas
// les autres.
//
// Éviction LRU : au-delà de `capacity`, le slot le moins récemment utilisé
// sort de la table et son index est sauvegardé. Un slot encore tenu par une
// requête en cours n'est jamais évincé : le recharger en créerait un second
// pour la même identité. Si tous le sont, la table dépasse temporairement
// `capacity`. Jusqu'à la fin de sa sauvegarde, un slot évincé reste dans
// `evicting` et une consultation le reprend tel quel au lieu de relire un
// disque pas encore à jour.
// ============================================================================

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tracing::{debug, info, warn};

use crate::crypto_error::{CryptoError, Result};
use crate::lsh::{Hashing, HashingStrategy};
use crate::protocol::ProtocolState;
use crate::strategy::Strategy;

// ============================================================================
// État d'une identité
// ============================================================================
#[derive(Debug)]
pub struct IdentityState {
    pub strategy: Strategy,
    /// None tant que la poignée de main d'index n'a pas eu lieu
    pub index:    Option<Hashing>,
    pub phase:    ProtocolState,
}

#[derive(Debug)]
pub struct IdentitySlot {
    identity: String,
    state:    RwLock<IdentityState>,
}

impl IdentitySlot {
    pub fn new(identity: impl Into<String>, state: IdentityState) -> Self {
        IdentitySlot { identity: identity.into(), state: RwLock::new(state) }
    }

    pub fn identity(&self) -> &str { &self.identity }

    pub fn read(&self) -> Result<RwLockReadGuard<'_, IdentityState>> {
        self.state.read().map_err(|_| CryptoError::LockPoisoned)
    }

    pub fn write(&self) -> Result<RwLockWriteGuard<'_, IdentityState>> {
        self.state.write().map_err(|_| CryptoError::LockPoisoned)
    }

    /// Sauvegarde l'index (sous verrou de lecture : exclut les écrivains)
    pub fn flush(&self) -> Result<()> {
        let state = self.read()?;
        match &state.index {
            Some(index) => index.save(),
            None => Ok(()),
        }
    }
}

// ============================================================================
// Table LRU
// ============================================================================
struct CacheInner {
    slots:    HashMap<String, (Arc<IdentitySlot>, u64)>,
    evicting: HashMap<String, Arc<IdentitySlot>>,
    tick:     u64,
}

impl CacheInner {
    fn touch(&mut self, identity: &str) -> Option<Arc<IdentitySlot>> {
        self.tick += 1;
        let tick = self.tick;
        if let Some((slot, used)) = self.slots.get_mut(identity) {
            *used = tick;
            return Some(slot.clone());
        }
        let slot = self.evicting.remove(identity)?;
        self.slots.insert(identity.to_string(), (slot.clone(), tick));
        debug!(identity, "slot repris pendant sa sauvegarde");
        Some(slot)
    }

    /// Seule la table tient le slot : aucun autre thread ne peut plus
    /// l'obtenir une fois retiré (le clonage passe par ce Mutex).
    fn evict_lru(&mut self) -> Option<Arc<IdentitySlot>> {
        let victim = self
            .slots
            .iter()
            .filter(|(_, (slot, _))| Arc::strong_count(slot) == 1)
            .min_by_key(|(_, (_, used))| *used)
            .map(|(id, _)| id.clone())?;
        self.slots.remove(&victim).map(|(slot, _)| slot)
    }
}

pub struct IdentityCache {
    capacity: usize,
    inner:    Mutex<CacheInner>,
}

impl IdentityCache {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(CryptoError::Parameter("capacité du cache nulle".to_string()));
        }
        Ok(IdentityCache {
            capacity,
            inner: Mutex::new(CacheInner {
                slots:    HashMap::new(),
                evicting: HashMap::new(),
                tick:     0,
            }),
        })
    }

    fn lock(&self) -> Result<MutexGuard<'_, CacheInner>> {
        self.inner.lock().map_err(|_| CryptoError::LockPoisoned)
    }

    pub fn capacity(&self) -> usize { self.capacity }

    pub fn len(&self) -> usize {
        self.inner.lock().map(|i| i.slots.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }

    pub fn contains(&self, identity: &str) -> bool {
        self.inner
            .lock()
            .map(|i| i.slots.contains_key(identity))
            .unwrap_or(false)
    }

    // -----------------------------------------------------------------------
    // Consultation paresseuse
    //
    // `load` construit l'état depuis les magasins au premier accès. Deux
    // threads peuvent charger la même identité en parallèle : le premier
    // inséré gagne, l'autre état est abandonné sans avoir été publié.
    // -----------------------------------------------------------------------
    pub fn get_or_load<F>(&self, identity: &str, load: F) -> Result<Arc<IdentitySlot>>
    where
        F: FnOnce(&str) -> Result<IdentityState>,
    {
        if let Some(slot) = self.lock()?.touch(identity) {
            return Ok(slot);
        }

        let state = load(identity)?;
        let fresh = Arc::new(IdentitySlot::new(identity, state));

        let (slot, evicted) = {
            let mut inner = self.lock()?;
            if let Some(existing) = inner.touch(identity) {
                (existing, Vec::new())
            } else {
                let tick = inner.tick;
                inner.slots.insert(identity.to_string(), (fresh.clone(), tick));
                let mut evicted = Vec::new();
                while inner.slots.len() > self.capacity {
                    match inner.evict_lru() {
                        Some(victim) => {
                            inner.evicting.insert(victim.identity().to_string(), victim.clone());
                            evicted.push(victim);
                        }
                        None => break,
                    }
                }
                (fresh, evicted)
            }
        };

        debug!(identity, "identité chargée dans le cache");
        for victim in evicted {
            info!(identity = victim.identity(), "identité évincée du cache");
            if let Err(e) = victim.flush() {
                warn!(identity = victim.identity(), error = %e, "sauvegarde à l'éviction impossible");
            }
            let mut inner = self.lock()?;
            if inner
                .evicting
                .get(victim.identity())
                .is_some_and(|pending| Arc::ptr_eq(pending, &victim))
            {
                inner.evicting.remove(victim.identity());
            }
        }
        Ok(slot)
    }

    /// Sauvegarde tous les index présents (arrêt du serveur)
    pub fn flush_all(&self) -> Result<()> {
        let slots: Vec<Arc<IdentitySlot>> =
            self.lock()?.slots.values().map(|(s, _)| s.clone()).collect();
        for slot in slots {
            slot.flush()?;
        }
        Ok(())
    }
}
