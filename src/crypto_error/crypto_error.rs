// ===========================================================================
// Gestion centralisée des erreurs
//
// Tous les modules utilisent ce type au lieu de panic!/assert!/unwrap().
// L'appelant (service, transport) reçoit une Err(...) dont la variante
// identifie la nature exacte du problème ; rien n'est avalé dans une
// erreur générique à l'intérieur du cœur.
//
// Le type est sérialisable : le serveur renvoie la variante telle quelle
// au client à travers le tunnel socket.
// ===========================================================================

use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CryptoError {
    // --- Configuration ---
    /// Paramètres de schéma ou de projection incohérents (fatal, jamais réessayé)
    Parameter(String),

    // --- Cycle de vie des clés ---
    /// Opération tentée avant l'échange de clés (aucun contexte installé)
    UninitializedContext,
    /// Déchiffrement demandé sur un contexte public uniquement
    NoSecretKey,
    /// Chiffrés ou contextes produits sous des paramètres publics différents
    ContextMismatch(String),

    // --- Charges utiles reçues ---
    /// Entrée binaire/texte malformée ou incompatible avec le contexte
    Deserialization(String),
    /// Champ attendu absent de la charge utile
    MissingKey(String),
    /// Deux vecteurs de tailles différentes
    DimensionMismatch { expected: usize, actual: usize },
    /// Clé de seau LSH invalide (longueur ou alphabet)
    InvalidBucketKey(String),
    /// Index LSH sans projections ou sans tables
    IndexNotReady(String),
    /// Valeur trop grande pour le module de texte clair après mise à l'échelle
    PlaintextOverflow { value: f64, bound: f64 },

    // --- Infrastructure ---
    /// Échec d'E/S sur le magasin d'octets (l'état mémoire est conservé)
    Storage(String),
    /// Verrou empoisonné (thread paniqué pendant un accès exclusif)
    LockPoisoned,
    /// Erreur du transport socket
    Transport(String),
}

impl fmt::Display for CryptoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CryptoError::Parameter(msg) =>
                write!(f, "Paramètres invalides : {msg}"),
            CryptoError::UninitializedContext =>
                write!(f, "Contexte non initialisé : l'échange de clé publique doit précéder cette opération"),
            CryptoError::NoSecretKey =>
                write!(f, "Le contexte est public : aucune clé secrète pour déchiffrer"),
            CryptoError::ContextMismatch(msg) =>
                write!(f, "Contextes incompatibles : {msg}"),
            CryptoError::Deserialization(msg) =>
                write!(f, "Désérialisation impossible : {msg}"),
            CryptoError::MissingKey(field) =>
                write!(f, "Champ requis absent : '{field}'"),
            CryptoError::DimensionMismatch { expected, actual } =>
                write!(f, "Dimension incorrecte : {expected} attendu(s), {actual} reçu(s)"),
            CryptoError::InvalidBucketKey(msg) =>
                write!(f, "Clé de seau invalide : {msg}"),
            CryptoError::IndexNotReady(msg) =>
                write!(f, "Index LSH non prêt : {msg}"),
            CryptoError::PlaintextOverflow { value, bound } =>
                write!(f, "Valeur {value} hors du domaine clair (|v| doit rester < {bound})"),
            CryptoError::Storage(msg) =>
                write!(f, "Erreur de stockage : {msg}"),
            CryptoError::LockPoisoned =>
                write!(f, "Verrou empoisonné, redémarrage requis"),
            CryptoError::Transport(msg) =>
                write!(f, "Erreur de transport : {msg}"),
        }
    }
}

impl std::error::Error for CryptoError {}

impl From<std::io::Error> for CryptoError {
    fn from(e: std::io::Error) -> Self {
        CryptoError::Storage(e.to_string())
    }
}

impl From<bincode::Error> for CryptoError {
    fn from(e: bincode::Error) -> Self {
        CryptoError::Deserialization(e.to_string())
    }
}

impl From<serde_json::Error> for CryptoError {
    fn from(e: serde_json::Error) -> Self {
        CryptoError::Deserialization(e.to_string())
    }
}

// ---------------------------------------------------------------------------
// Erreurs des bibliothèques homomorphes
//
// Paramètres refusés → Parameter ; octets illisibles → Deserialization ;
// le reste (contexte ou représentation incompatibles) → ContextMismatch.
// ---------------------------------------------------------------------------
impl From<fhe::Error> for CryptoError {
    fn from(e: fhe::Error) -> Self {
        match e {
            fhe::Error::ParametersError(p) => CryptoError::Parameter(p.to_string()),
            fhe::Error::SerializationError(s) => CryptoError::Deserialization(s.to_string()),
            fhe::Error::MathError(m) => CryptoError::from(m),
            other => CryptoError::ContextMismatch(other.to_string()),
        }
    }
}

impl From<fhe_math::Error> for CryptoError {
    fn from(e: fhe_math::Error) -> Self {
        match e {
            fhe_math::Error::InvalidModulus(_) => CryptoError::Parameter(e.to_string()),
            fhe_math::Error::Serialization(msg) => CryptoError::Deserialization(msg),
            other => CryptoError::ContextMismatch(other.to_string()),
        }
    }
}

pub type Result<T> = std::result::Result<T, CryptoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_names_the_missing_field() {
        let msg = CryptoError::MissingKey("public_key".into()).to_string();
        assert!(msg.contains("public_key"));
    }

    #[test]
    fn test_io_error_maps_to_storage() {
        let io = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "refusé");
        assert!(matches!(CryptoError::from(io), CryptoError::Storage(_)));
    }

    #[test]
    fn test_fhe_errors_keep_their_kind() {
        let bad = fhe_math::Error::Serialization("tronqué".into());
        assert_eq!(CryptoError::from(bad), CryptoError::Deserialization("tronqué".into()));
        assert!(matches!(
            CryptoError::from(fhe_math::Error::InvalidModulus(1)),
            CryptoError::Parameter(_)
        ));
        assert!(matches!(
            CryptoError::from(fhe::Error::MathError(fhe_math::Error::InvalidContext)),
            CryptoError::ContextMismatch(_)
        ));
    }

    #[test]
    fn test_error_kind_survives_bincode() {
        let err = CryptoError::DimensionMismatch { expected: 4, actual: 3 };
        let bytes = bincode::serialize(&err).unwrap();
        let back: CryptoError = bincode::deserialize(&bytes).unwrap();
        assert_eq!(back, err);
    }
}
