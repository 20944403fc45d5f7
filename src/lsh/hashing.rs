use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;
use std::sync::Arc;

use crate::crypto_error::{CryptoError, Result};
use crate::lsh::lsh_index::{LshIndex, LshParams};
use crate::storage::ByteStore;

// ============================================================================
// HashingStrategy — opérations d'index vues par le protocole
// ============================================================================
pub trait HashingStrategy: Send + Sync {
    fn kind(&self) -> HashingKind;
    fn params(&self) -> LshParams;
    fn is_ready(&self) -> bool;
    /// Aucun identifiant dans aucune table
    fn is_empty(&self) -> bool;
    fn initialize(&mut self);
    fn receive_model(&mut self, params: LshParams) -> Result<()>;
    fn point_hashes(&self, point: &[f64]) -> Result<Vec<String>>;
    fn build(&mut self, points: &[Vec<f64>], ids: &[u64]) -> Result<()>;
    fn validate_hashes(&self, hashes: &[String]) -> Result<()>;
    fn update(&mut self, hashes: &[String], id: u64, commit: bool) -> Result<()>;
    fn nearest(&self, hashes: &[String]) -> Result<BTreeSet<u64>>;
    fn save(&self) -> Result<()>;
}

// ============================================================================
// Choix fermé de l'algorithme de hachage
// ============================================================================
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HashingKind {
    Lsh,
}

impl FromStr for HashingKind {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "lsh" => Ok(HashingKind::Lsh),
            other => Err(CryptoError::Parameter(format!("hachage inconnu : {other:?}"))),
        }
    }
}

impl HashingKind {
    /// Index vide (sans projections) adossé au magasin donné
    pub fn create(self, params: LshParams, store: Arc<dyn ByteStore>, key: &str) -> Result<Hashing> {
        match self {
            HashingKind::Lsh => Ok(Hashing::Lsh(LshIndex::new(params)?.with_store(store, key))),
        }
    }

    /// Index persisté, ou None s'il n'existe pas encore
    pub fn load(self, store: Arc<dyn ByteStore>, key: &str) -> Result<Option<Hashing>> {
        match self {
            HashingKind::Lsh => Ok(LshIndex::load(store, key)?.map(Hashing::Lsh)),
        }
    }
}

#[derive(Debug, Clone)]
pub enum Hashing {
    Lsh(LshIndex),
}

impl HashingStrategy for Hashing {
    fn kind(&self) -> HashingKind {
        match self {
            Hashing::Lsh(_) => HashingKind::Lsh,
        }
    }

    fn params(&self) -> LshParams {
        match self {
            Hashing::Lsh(idx) => idx.params(),
        }
    }

    fn is_ready(&self) -> bool {
        match self {
            Hashing::Lsh(idx) => idx.is_ready(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Hashing::Lsh(idx) => idx.is_empty(),
        }
    }

    fn initialize(&mut self) {
        match self {
            Hashing::Lsh(idx) => idx.initialize(),
        }
    }

    fn receive_model(&mut self, params: LshParams) -> Result<()> {
        match self {
            Hashing::Lsh(idx) => idx.receive_model(params),
        }
    }

    fn point_hashes(&self, point: &[f64]) -> Result<Vec<String>> {
        match self {
            Hashing::Lsh(idx) => idx.point_hashes(point),
        }
    }

    fn build(&mut self, points: &[Vec<f64>], ids: &[u64]) -> Result<()> {
        match self {
            Hashing::Lsh(idx) => idx.build(points, ids),
        }
    }

    fn validate_hashes(&self, hashes: &[String]) -> Result<()> {
        match self {
            Hashing::Lsh(idx) => idx.validate_hashes(hashes),
        }
    }

    fn update(&mut self, hashes: &[String], id: u64, commit: bool) -> Result<()> {
        match self {
            Hashing::Lsh(idx) => idx.update(hashes, id, commit),
        }
    }

    fn nearest(&self, hashes: &[String]) -> Result<BTreeSet<u64>> {
        match self {
            Hashing::Lsh(idx) => idx.nearest(hashes),
        }
    }

    fn save(&self) -> Result<()> {
        match self {
            Hashing::Lsh(idx) => idx.save(),
        }
    }
}
