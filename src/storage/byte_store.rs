use std::collections::HashMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use tracing::debug;

use crate::crypto_error::{CryptoError, Result};

// ============================================================================
// Protection DoS — taille maximale d'un blob lu depuis le disque (1 Gio)
//
// Un modèle LSH volumineux (beaucoup de tables, beaucoup d'identifiants)
// reste bien en deçà. La métadonnée est lue avant le contenu.
// ============================================================================
pub const MAX_BLOB_BYTES: u64 = 1 << 30;

/// Longueur maximale d'une clé de blob (limite usuelle d'un nom de fichier)
const MAX_KEY_LEN: usize = 255;

/// Suffixe des fichiers temporaires, unique dans le processus
static TMP_COUNTER: AtomicU64 = AtomicU64::new(0);

// ============================================================================
// Magasin d'octets : blobs persistés indexés par une clé texte
//
// `read` renvoie Ok(None) si la clé n'a jamais été écrite : l'absence n'est
// pas une erreur (premier contact d'une identité).
// ============================================================================
pub trait ByteStore: Send + Sync {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>>;
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()>;
}

/// Clés acceptées : [A-Za-z0-9_.-], sans point initial, non vides.
/// Empêche toute traversée de répertoire via une identité forgée.
fn validate_key(key: &str) -> Result<()> {
    let ok = !key.is_empty()
        && key.len() <= MAX_KEY_LEN
        && !key.starts_with('.')
        && key.chars().all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if ok {
        Ok(())
    } else {
        Err(CryptoError::Storage(format!("clé de blob invalide : {key:?}")))
    }
}

// ============================================================================
// FileStore — un fichier par clé dans un répertoire racine
// ============================================================================
#[derive(Debug, Clone)]
pub struct FileStore {
    root: PathBuf,
}

impl FileStore {
    /// Ouvre (et crée si besoin) le répertoire racine
    pub fn open(root: impl AsRef<Path>) -> Result<Self> {
        let root = root.as_ref().to_path_buf();
        if !root.exists() {
            fs::create_dir_all(&root)?;
        }
        Ok(FileStore { root })
    }

    pub fn root(&self) -> &Path { &self.root }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(key))
    }
}

fn check_file_size(path: &Path) -> io::Result<()> {
    let meta = fs::metadata(path)?;
    if meta.len() > MAX_BLOB_BYTES {
        return Err(io::Error::new(
            io::ErrorKind::InvalidData,
            format!(
                "Blob trop grand : {} octets (maximum autorisé : {} octets).",
                meta.len(),
                MAX_BLOB_BYTES
            ),
        ));
    }
    Ok(())
}

impl ByteStore for FileStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let path = self.path_for(key)?;
        if !path.exists() {
            return Ok(None);
        }
        check_file_size(&path)?;
        Ok(Some(fs::read(&path)?))
    }

    // Écriture atomique : fichier temporaire puis rename. Un lecteur
    // concurrent voit l'ancien blob ou le nouveau, jamais un blob tronqué.
    // Le temporaire porte pid + compteur : deux écrivains (threads ou
    // processus) d'une même clé ne partagent jamais ce fichier.
    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        let path = self.path_for(key)?;
        let n = TMP_COUNTER.fetch_add(1, Ordering::Relaxed);
        let tmp = self.root.join(format!(".{key}.{}.{n}.tmp", std::process::id()));
        let written = fs::write(&tmp, bytes).and_then(|()| fs::rename(&tmp, &path));
        if let Err(e) = written {
            let _ = fs::remove_file(&tmp);
            return Err(e.into());
        }
        debug!(key, bytes = bytes.len(), "blob écrit");
        Ok(())
    }
}

// ============================================================================
// MemoryStore — tests et déploiements éphémères
// ============================================================================
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryStore {
    pub fn new() -> Self { Self::default() }

    pub fn len(&self) -> usize {
        self.blobs.lock().map(|b| b.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

impl ByteStore for MemoryStore {
    fn read(&self, key: &str) -> Result<Option<Vec<u8>>> {
        validate_key(key)?;
        let blobs = self.blobs.lock().map_err(|_| CryptoError::LockPoisoned)?;
        Ok(blobs.get(key).cloned())
    }

    fn write(&self, key: &str, bytes: &[u8]) -> Result<()> {
        validate_key(key)?;
        let mut blobs = self.blobs.lock().map_err(|_| CryptoError::LockPoisoned)?;
        blobs.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    fn temp_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("biomatch_store_{tag}_{}", std::process::id()));
        let _ = fs::remove_dir_all(&dir);
        dir
    }

    #[test]
    fn test_file_store_roundtrip_and_absence() {
        let dir = temp_dir("roundtrip");
        let store = FileStore::open(&dir).unwrap();
        assert_eq!(store.read("absent").unwrap(), None);

        store.write("ctx_alice", b"abc").unwrap();
        assert_eq!(store.read("ctx_alice").unwrap(), Some(b"abc".to_vec()));

        // Réécriture : remplace le contenu
        store.write("ctx_alice", b"xyz").unwrap();
        assert_eq!(store.read("ctx_alice").unwrap(), Some(b"xyz".to_vec()));
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_concurrent_writers_same_key() {
        let dir = temp_dir("writers");
        let store = Arc::new(FileStore::open(&dir).unwrap());
        let handles: Vec<_> = (0..8u8)
            .map(|t| {
                let store = store.clone();
                thread::spawn(move || {
                    for _ in 0..20 {
                        store.write("model_alice", &[t; 64]).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        // Contenu entier d'un seul écrivain, aucun temporaire résiduel
        let blob = store.read("model_alice").unwrap().unwrap();
        assert_eq!(blob.len(), 64);
        assert!(blob.iter().all(|&b| b == blob[0]));
        let names: Vec<_> = fs::read_dir(&dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .collect();
        assert_eq!(names, vec!["model_alice".to_string()]);
        let _ = fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_keys_cannot_escape_root() {
        let store = MemoryStore::new();
        for bad in ["", "../etc/passwd", ".hidden", "a/b", "a b"] {
            assert!(matches!(store.write(bad, b"x"), Err(CryptoError::Storage(_))), "{bad}");
        }
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryStore::new();
        assert!(store.is_empty());
        store.write("k", &[1, 2]).unwrap();
        assert_eq!(store.read("k").unwrap(), Some(vec![1, 2]));
        assert_eq!(store.len(), 1);
    }
}
