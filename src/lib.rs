// Déclaration des modules
pub mod crypto_error;
pub mod codec;
pub mod backend;
pub mod context;
pub mod strategy;
pub mod lsh;
pub mod ranker;
pub mod storage;
pub mod registry;
pub mod protocol;
pub mod service;
pub mod net;
pub mod config;

// Erreur centralisée
pub use crypto_error::{CryptoError, Result};

// Contexte et stratégies de chiffrement
pub use context::{EncryptionContext, HeParams, Scheme};
pub use strategy::{EncryptionStrategy, Strategy};
pub use backend::Ciphertext;

// Index approximatif et classement
pub use lsh::{Hashing, HashingKind, HashingStrategy, LshIndex, LshParams};
pub use ranker::CandidateRanker;

// Protocole client / serveur
pub use protocol::{ClientConfig, ClientSession, ProtocolState, Request, Response, Transport};
pub use service::{LocalTransport, MatchingService};

// Configuration
pub use config::Settings;
