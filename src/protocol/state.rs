use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto_error::{CryptoError, Result};

// ============================================================================
// Automate du protocole, une instance par identité
//
//   Unkeyed ──clé publique──▶ KeyExchanged ──paramètres d'index──▶ IndexReady
//   IndexReady ──première ingestion / recherche──▶ Operational
//
// Une nouvelle clé publique ne fait pas reculer l'état ; de nouveaux
// paramètres d'index ramènent à IndexReady (index vide).
// ============================================================================
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolState {
    Unkeyed,
    KeyExchanged,
    IndexReady,
    Operational,
}

impl ProtocolState {
    /// État reconstruit à partir de ce qui a été retrouvé sur disque
    pub fn restored(has_context: bool, has_index: bool, has_entries: bool) -> Self {
        match (has_context, has_index, has_entries) {
            (false, _, _) => ProtocolState::Unkeyed,
            (true, false, _) => ProtocolState::KeyExchanged,
            (true, true, false) => ProtocolState::IndexReady,
            (true, true, true) => ProtocolState::Operational,
        }
    }

    pub fn require_keyed(&self) -> Result<()> {
        match self {
            ProtocolState::Unkeyed => Err(CryptoError::UninitializedContext),
            _ => Ok(()),
        }
    }

    pub fn require_index(&self) -> Result<()> {
        self.require_keyed()?;
        match self {
            ProtocolState::KeyExchanged => Err(CryptoError::IndexNotReady(
                "paramètres d'index non reçus".to_string(),
            )),
            _ => Ok(()),
        }
    }

    pub fn on_key_exchanged(&mut self) {
        if *self == ProtocolState::Unkeyed {
            *self = ProtocolState::KeyExchanged;
        }
    }

    pub fn on_index_ready(&mut self) -> Result<()> {
        self.require_keyed()?;
        *self = ProtocolState::IndexReady;
        Ok(())
    }

    pub fn on_operation(&mut self) {
        if *self == ProtocolState::IndexReady {
            *self = ProtocolState::Operational;
        }
    }
}

impl fmt::Display for ProtocolState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ProtocolState::Unkeyed => "unkeyed",
            ProtocolState::KeyExchanged => "key_exchanged",
            ProtocolState::IndexReady => "index_ready",
            ProtocolState::Operational => "operational",
        };
        f.write_str(name)
    }
}
