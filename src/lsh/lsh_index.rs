use rand::Rng;
use rand_distr::StandardNormal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::crypto_error::{CryptoError, Result};
use crate::storage::ByteStore;

/// Table de seaux : clé binaire → identifiants
pub type BucketMap = BTreeMap<String, BTreeSet<u64>>;

/// Matrice de projection : n_projections lignes de n_dimensions réels
pub type ProjectionMatrix = Vec<Vec<f64>>;

// ============================================================================
// Paramètres de l'index (aussi la charge utile de la poignée de main d'index)
// ============================================================================
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LshParams {
    pub n_dimensions:  usize,
    pub n_tables:      usize,
    pub n_projections: usize,
}

impl LshParams {
    pub fn validate(&self) -> Result<()> {
        if self.n_dimensions == 0 || self.n_tables == 0 || self.n_projections == 0 {
            return Err(CryptoError::Parameter(format!(
                "paramètres LSH nuls : {} dimensions, {} tables, {} projections",
                self.n_dimensions, self.n_tables, self.n_projections
            )));
        }
        Ok(())
    }
}

// ============================================================================
// Format persisté : bincode de { paramètres, projections, seaux }
// ============================================================================
#[derive(Serialize, Deserialize)]
struct LshModel {
    n_dimensions:  usize,
    n_tables:      usize,
    n_projections: usize,
    projections:   Vec<ProjectionMatrix>,
    bucket_maps:   Vec<BucketMap>,
}

#[derive(Serialize)]
struct LshModelRef<'a> {
    n_dimensions:  usize,
    n_tables:      usize,
    n_projections: usize,
    projections:   &'a [ProjectionMatrix],
    bucket_maps:   &'a [BucketMap],
}

/// Emplacement de persistance attaché à un index
#[derive(Clone)]
struct ModelSlot {
    store: Arc<dyn ByteStore>,
    key:   String,
}

// ============================================================================
// Hachage d'un point : signe de chaque projection (≥ 0 → '1', < 0 → '0')
// ============================================================================
pub fn hash_point(point: &[f64], matrix: &[Vec<f64>]) -> String {
    matrix
        .iter()
        .map(|row| {
            let dot: f64 = row.iter().zip(point).map(|(a, b)| a * b).sum();
            if dot >= 0.0 { '1' } else { '0' }
        })
        .collect()
}

// ============================================================================
// LshIndex — projections aléatoires gaussiennes, n_tables tables de seaux
//
// Invariants :
//   - bucket_maps.len() == n_tables
//   - projections vide (index reçu d'un pair, jamais haché localement)
//     ou exactement n_tables matrices n_projections × n_dimensions
//   - toute clé de seau fait n_projections caractères dans {'0', '1'}
// ============================================================================
#[derive(Clone)]
pub struct LshIndex {
    params:      LshParams,
    projections: Vec<ProjectionMatrix>,
    bucket_maps: Vec<BucketMap>,
    slot:        Option<ModelSlot>,
}

impl fmt::Debug for LshIndex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LshIndex")
            .field("params", &self.params)
            .field("ready", &self.is_ready())
            .field("buckets", &self.bucket_maps.iter().map(BTreeMap::len).sum::<usize>())
            .field("key", &self.slot.as_ref().map(|s| s.key.as_str()))
            .finish()
    }
}

impl LshIndex {
    /// Index vide : n_tables tables sans projections
    pub fn new(params: LshParams) -> Result<Self> {
        params.validate()?;
        Ok(LshIndex {
            params,
            projections: Vec::new(),
            bucket_maps: vec![BucketMap::new(); params.n_tables],
            slot: None,
        })
    }

    /// Attache un emplacement de persistance (utilisé par save / update commit)
    pub fn with_store(mut self, store: Arc<dyn ByteStore>, key: impl Into<String>) -> Self {
        self.slot = Some(ModelSlot { store, key: key.into() });
        self
    }

    // -----------------------------------------------------------------------
    // Initialisation des projections
    //
    // Régénérer les projections invalide toutes les clés calculées : les
    // seaux sont vidés en même temps. Tirage table par table, de sorte qu'un
    // index plus large de même graine prolonge les tables d'un index étroit.
    // -----------------------------------------------------------------------
    pub fn initialize(&mut self) {
        let mut rng = rand::rng();
        self.initialize_with_rng(&mut rng);
    }

    pub fn initialize_with_rng<R: Rng>(&mut self, rng: &mut R) {
        let LshParams { n_dimensions, n_tables, n_projections } = self.params;
        self.projections = (0..n_tables)
            .map(|_| {
                (0..n_projections)
                    .map(|_| (0..n_dimensions).map(|_| rng.sample::<f64, _>(StandardNormal)).collect())
                    .collect()
            })
            .collect();
        self.bucket_maps = vec![BucketMap::new(); n_tables];
        info!(n_dimensions, n_tables, n_projections, "projections LSH générées");
    }

    /// Index côté serveur : adopte les paramètres du pair, sans projections
    pub fn receive_model(&mut self, params: LshParams) -> Result<()> {
        params.validate()?;
        self.params = params;
        self.projections.clear();
        self.bucket_maps = vec![BucketMap::new(); params.n_tables];
        info!(
            n_dimensions = params.n_dimensions,
            n_tables = params.n_tables,
            n_projections = params.n_projections,
            "paramètres LSH reçus"
        );
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Hachage
    // -----------------------------------------------------------------------

    /// Une clé par table, dans l'ordre des tables
    pub fn point_hashes(&self, point: &[f64]) -> Result<Vec<String>> {
        if !self.is_ready() {
            return Err(CryptoError::IndexNotReady(
                "aucune projection : index reçu d'un pair ou non initialisé".to_string(),
            ));
        }
        if point.len() != self.params.n_dimensions {
            return Err(CryptoError::DimensionMismatch {
                expected: self.params.n_dimensions,
                actual:   point.len(),
            });
        }
        Ok(self.projections.iter().map(|m| hash_point(point, m)).collect())
    }

    /// Indexation en masse (sans persistance)
    pub fn build(&mut self, points: &[Vec<f64>], ids: &[u64]) -> Result<()> {
        if points.len() != ids.len() {
            return Err(CryptoError::DimensionMismatch {
                expected: points.len(),
                actual:   ids.len(),
            });
        }
        let all_hashes = points
            .iter()
            .map(|p| self.point_hashes(p))
            .collect::<Result<Vec<_>>>()?;
        for (hashes, &id) in all_hashes.iter().zip(ids) {
            self.insert(hashes, id);
        }
        debug!(points = points.len(), "index LSH construit");
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Mise à jour incrémentale
    //
    // commit = false permet de regrouper de nombreuses insertions avant une
    // seule écriture disque.
    // -----------------------------------------------------------------------
    pub fn update(&mut self, hashes: &[String], id: u64, commit: bool) -> Result<()> {
        self.validate_hashes(hashes)?;
        self.insert(hashes, id);
        if commit {
            self.save()?;
        }
        Ok(())
    }

    fn insert(&mut self, hashes: &[String], id: u64) {
        for (table, key) in self.bucket_maps.iter_mut().zip(hashes) {
            table.entry(key.clone()).or_default().insert(id);
        }
    }

    /// Union des seaux désignés, toutes tables confondues (approximatif)
    pub fn nearest(&self, hashes: &[String]) -> Result<BTreeSet<u64>> {
        self.validate_hashes(hashes)?;
        let mut candidates = BTreeSet::new();
        for (table, key) in self.bucket_maps.iter().zip(hashes) {
            if let Some(ids) = table.get(key) {
                candidates.extend(ids.iter().copied());
            }
        }
        Ok(candidates)
    }

    /// Une clé de seau bien formée par table
    pub fn validate_hashes(&self, hashes: &[String]) -> Result<()> {
        if hashes.len() != self.params.n_tables {
            return Err(CryptoError::DimensionMismatch {
                expected: self.params.n_tables,
                actual:   hashes.len(),
            });
        }
        hashes.iter().try_for_each(|h| validate_bucket_key(h, self.params.n_projections))
    }

    // -----------------------------------------------------------------------
    // Persistance
    // -----------------------------------------------------------------------

    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(&LshModelRef {
            n_dimensions:  self.params.n_dimensions,
            n_tables:      self.params.n_tables,
            n_projections: self.params.n_projections,
            projections:   &self.projections,
            bucket_maps:   &self.bucket_maps,
        })?)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let model: LshModel = bincode::deserialize(bytes)?;
        let params = LshParams {
            n_dimensions:  model.n_dimensions,
            n_tables:      model.n_tables,
            n_projections: model.n_projections,
        };
        params
            .validate()
            .map_err(|e| CryptoError::Deserialization(e.to_string()))?;

        let projections_ok = model.projections.is_empty()
            || (model.projections.len() == params.n_tables
                && model.projections.iter().all(|m| {
                    m.len() == params.n_projections
                        && m.iter().all(|row| row.len() == params.n_dimensions)
                }));
        let buckets_ok = model.bucket_maps.len() == params.n_tables
            && model
                .bucket_maps
                .iter()
                .flat_map(BTreeMap::keys)
                .all(|k| validate_bucket_key(k, params.n_projections).is_ok());
        if !projections_ok || !buckets_ok {
            return Err(CryptoError::Deserialization(
                "modèle LSH de forme incohérente".to_string(),
            ));
        }

        Ok(LshIndex {
            params,
            projections: model.projections,
            bucket_maps: model.bucket_maps,
            slot: None,
        })
    }

    /// Écrit le modèle dans l'emplacement attaché
    pub fn save(&self) -> Result<()> {
        let slot = self.slot.as_ref().ok_or_else(|| {
            CryptoError::Storage("index LSH sans emplacement de persistance".to_string())
        })?;
        slot.store.write(&slot.key, &self.to_bytes()?)?;
        debug!(key = %slot.key, "modèle LSH sauvegardé");
        Ok(())
    }

    /// Ok(None) si aucun modèle n'a été sauvegardé sous cette clé
    pub fn load(store: Arc<dyn ByteStore>, key: &str) -> Result<Option<Self>> {
        match store.read(key)? {
            Some(bytes) => Ok(Some(Self::from_bytes(&bytes)?.with_store(store, key))),
            None => Ok(None),
        }
    }

    // -----------------------------------------------------------------------
    // Accesseurs
    // -----------------------------------------------------------------------
    pub fn params(&self) -> LshParams { self.params }

    pub fn projections(&self) -> &[ProjectionMatrix] { &self.projections }

    pub fn bucket_maps(&self) -> &[BucketMap] { &self.bucket_maps }

    /// Projections présentes : l'index sait hacher des points
    pub fn is_ready(&self) -> bool { !self.projections.is_empty() }

    pub fn is_empty(&self) -> bool { self.bucket_maps.iter().all(BTreeMap::is_empty) }
}

fn validate_bucket_key(key: &str, n_projections: usize) -> Result<()> {
    if key.len() != n_projections || !key.bytes().all(|b| b == b'0' || b == b'1') {
        return Err(CryptoError::InvalidBucketKey(format!(
            "{key:?} (attendu : {n_projections} caractères '0'/'1')"
        )));
    }
    Ok(())
}
