use serde::{Deserialize, Serialize};

use crate::crypto_error::CryptoError;
use crate::lsh::LshParams;

// ============================================================================
// Charges utiles échangées entre client et serveur
//
// Les noms de champs reprennent le contrat du service d'origine (les mêmes
// structures sont acceptées en JSON par le client en ligne de commande).
// ============================================================================

/// Poignée de main de clé : contexte public en base64
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublicKeyPayload {
    #[serde(default)]
    pub public_key: Option<String>,
}

/// Poignée de main d'index : dimensions, tables, projections
pub type IndexPayload = LshParams;

/// Ingestion d'un embedding chiffré
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestPayload {
    pub encrypted_data:       String,
    pub point_hash:           Vec<String>,
    pub point_identification: u64,
    /// Dernier élément d'un lot : déclenche la sauvegarde de l'index
    #[serde(rename = "final")]
    pub is_final:             bool,
}

/// Recherche des candidats proches d'un embedding chiffré
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryPayload {
    pub encrypted_data: String,
    pub point_hash:     Vec<String>,
}

/// Un identifiant par embedding stocké, avec la différence chiffrée associée
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResult {
    pub id:  Vec<u64>,
    pub dis: Vec<String>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryResponse {
    pub result: QueryResult,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub message: String,
}

impl Ack {
    pub fn new(message: impl Into<String>) -> Self {
        Ack { message: message.into() }
    }
}

// ============================================================================
// Requêtes / réponses du protocole
// ============================================================================
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Request {
    PublicKey(PublicKeyPayload),
    IndexParams(IndexPayload),
    AddFace(IngestPayload),
    Candidates(QueryPayload),
    SaveIndex,
}

impl Request {
    pub fn name(&self) -> &'static str {
        match self {
            Request::PublicKey(_) => "public_key",
            Request::IndexParams(_) => "index_params",
            Request::AddFace(_) => "add_face",
            Request::Candidates(_) => "candidates",
            Request::SaveIndex => "save_index",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Response {
    Ack(Ack),
    Candidates(QueryResponse),
    /// La variante exacte de l'erreur traverse le transport
    Error(CryptoError),
}

impl Response {
    pub fn into_ack(self) -> Result<Ack, CryptoError> {
        match self {
            Response::Ack(ack) => Ok(ack),
            Response::Error(e) => Err(e),
            Response::Candidates(_) => Err(CryptoError::Transport(
                "réponse Candidates inattendue".to_string(),
            )),
        }
    }

    pub fn into_candidates(self) -> Result<QueryResponse, CryptoError> {
        match self {
            Response::Candidates(r) => Ok(r),
            Response::Error(e) => Err(e),
            Response::Ack(_) => Err(CryptoError::Transport("réponse Ack inattendue".to_string())),
        }
    }
}

impl From<Result<Ack, CryptoError>> for Response {
    fn from(r: Result<Ack, CryptoError>) -> Self {
        r.map(Response::Ack).unwrap_or_else(Response::Error)
    }
}

impl From<Result<QueryResponse, CryptoError>> for Response {
    fn from(r: Result<QueryResponse, CryptoError>) -> Self {
        r.map(Response::Candidates).unwrap_or_else(Response::Error)
    }
}
