use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::context::{context_key, HeParams, Scheme};
use crate::crypto_error::{CryptoError, Result};
use crate::lsh::{HashingKind, LshParams};
use crate::protocol::ClientConfig;

// ============================================================================
// Protection DoS — taille maximale du fichier de configuration JSON (64 Ko)
// ============================================================================
const MAX_CONFIG_FILE_BYTES: u64 = 65_536;

// ============================================================================
// Settings — valeurs par défaut, fichier JSON, puis variables d'environnement
//
// Ordre de priorité croissante : Default < fichier < environnement.
// ============================================================================
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Préfixe des blobs de contexte (`<key_file>_<identité>`)
    pub key_file:            String,
    /// Préfixe des modèles LSH (`<hashing_directory>_<identité>`)
    pub hashing_directory:   String,
    /// Racine du magasin d'octets
    pub data_dir:            PathBuf,
    pub hashing_strategy:    HashingKind,
    pub hashing:             LshParams,
    pub encryption_strategy: Scheme,
    pub ckks:                HeParams,
    pub bfv:                 HeParams,
    /// Borne du cache d'identités du serveur
    pub cache_capacity:      usize,
    pub server_addr:         String,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            key_file:            "context".to_string(),
            hashing_directory:   "lsh_model".to_string(),
            data_dir:            PathBuf::from("data"),
            hashing_strategy:    HashingKind::Lsh,
            hashing:             LshParams { n_dimensions: 128, n_tables: 15, n_projections: 40 },
            encryption_strategy: Scheme::Ckks,
            ckks:                HeParams::ckks_default(),
            bfv:                 HeParams::bfv_default(),
            cache_capacity:      1024,
            server_addr:         "127.0.0.1:7878".to_string(),
        }
    }
}

fn check_file_size(path: &Path) -> Result<()> {
    let meta = fs::metadata(path)?;
    if meta.len() > MAX_CONFIG_FILE_BYTES {
        return Err(CryptoError::Parameter(format!(
            "Fichier de configuration trop grand : {} octets (maximum autorisé : {} octets).",
            meta.len(),
            MAX_CONFIG_FILE_BYTES
        )));
    }
    Ok(())
}

fn parse_env<T: std::str::FromStr>(name: &str, raw: &str) -> Result<T> {
    raw.trim()
        .parse()
        .map_err(|_| CryptoError::Parameter(format!("{name}={raw:?} invalide")))
}

impl Settings {
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        check_file_size(path)?;
        let raw = fs::read_to_string(path)?;
        serde_json::from_str(&raw)
            .map_err(|e| CryptoError::Parameter(format!("configuration {}: {e}", path.display())))
    }

    /// Défauts ou fichier, puis environnement du processus, puis validation
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut settings = match path {
            Some(p) => Self::from_json_file(p)?,
            None => Self::default(),
        };
        settings.apply_env(|name| std::env::var(name).ok())?;
        settings.validate()?;
        Ok(settings)
    }

    // -----------------------------------------------------------------------
    // Surcharges d'environnement (mêmes noms que le déploiement d'origine)
    // -----------------------------------------------------------------------
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("KEY_FILE") {
            self.key_file = v;
        }
        if let Some(v) = lookup("HASHING_DIRECTORY") {
            self.hashing_directory = v;
        }
        if let Some(v) = lookup("DATA_DIR") {
            self.data_dir = PathBuf::from(v);
        }
        if let Some(v) = lookup("HASHING_STRATEGY") {
            self.hashing_strategy = v.parse()?;
        }
        if let Some(v) = lookup("HASHING_N_DIMENSIONS") {
            self.hashing.n_dimensions = parse_env("HASHING_N_DIMENSIONS", &v)?;
        }
        if let Some(v) = lookup("HASHING_N_TABLES") {
            self.hashing.n_tables = parse_env("HASHING_N_TABLES", &v)?;
        }
        if let Some(v) = lookup("HASHING_N_PROJECTIONS") {
            self.hashing.n_projections = parse_env("HASHING_N_PROJECTIONS", &v)?;
        }
        if let Some(v) = lookup("ENCRYPTION_STRATEGY") {
            self.encryption_strategy = v.parse()?;
        }
        if let Some(v) = lookup("CKKS_POLY_MODULUS_DEGREE") {
            self.ckks.poly_modulus_degree = parse_env("CKKS_POLY_MODULUS_DEGREE", &v)?;
        }
        if let Some(v) = lookup("CKKS_COEFF_MOD_BIT_SIZES") {
            self.ckks.coeff_mod_bit_sizes = serde_json::from_str(&v).map_err(|_| {
                CryptoError::Parameter(format!("CKKS_COEFF_MOD_BIT_SIZES={v:?} invalide"))
            })?;
        }
        if let Some(v) = lookup("BFV_POLY_MODULUS_DEGREE") {
            self.bfv.poly_modulus_degree = parse_env("BFV_POLY_MODULUS_DEGREE", &v)?;
        }
        if let Some(v) = lookup("BFV_PLAIN_MODULUS") {
            self.bfv.plain_modulus = Some(parse_env("BFV_PLAIN_MODULUS", &v)?);
        }
        if let Some(v) = lookup("BFV_SCALE") {
            self.bfv.integer_scale = Some(parse_env("BFV_SCALE", &v)?);
        }
        if let Some(v) = lookup("CACHE_CAPACITY") {
            self.cache_capacity = parse_env("CACHE_CAPACITY", &v)?;
        }
        if let Some(v) = lookup("SERVER_ADDR") {
            self.server_addr = v;
        }
        debug!(settings = ?self, "configuration chargée");
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        self.hashing.validate()?;
        self.he_params().normalized(self.encryption_strategy)?;
        if self.cache_capacity == 0 {
            return Err(CryptoError::Parameter("CACHE_CAPACITY doit être > 0".to_string()));
        }
        Ok(())
    }

    /// Paramètres du schéma configuré
    pub fn he_params(&self) -> HeParams {
        match self.encryption_strategy {
            Scheme::Ckks => self.ckks.clone(),
            Scheme::Bfv => self.bfv.clone(),
        }
    }

    pub fn context_key(&self, identity: &str) -> String {
        context_key(&self.key_file, identity)
    }

    pub fn model_key(&self, identity: &str) -> String {
        format!("{}_{identity}", self.hashing_directory)
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            key_prefix: self.key_file.clone(),
            model_key:  self.hashing_directory.clone(),
            scheme:     self.encryption_strategy,
            he_params:  self.he_params(),
            lsh:        self.hashing,
            hashing:    self.hashing_strategy,
        }
    }
}
