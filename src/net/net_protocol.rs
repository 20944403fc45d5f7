// ============================================================================
// Protocole socket : trames préfixées par leur longueur
//
//   [ u32 big-endian : longueur ][ bincode(Envelope | Response) ]
//
// Le client envoie une Envelope (identité + requête), le serveur répond par
// une Response. L'authentification de l'identité reste à la charge du
// transport qui enveloppe ce canal.
// ============================================================================

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};

use crate::crypto_error::{CryptoError, Result};
use crate::protocol::{Request, Response, Transport};

/// Taille maximale d'une trame (protection DoS, vérifiée avant allocation)
pub const MAX_FRAME_BYTES: u32 = 128 * 1024 * 1024;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub identity: String,
    pub request:  Request,
}

pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, value: &T) -> Result<()> {
    let body = bincode::serialize(value)?;
    let len = u32::try_from(body.len())
        .ok()
        .filter(|&n| n <= MAX_FRAME_BYTES)
        .ok_or_else(|| CryptoError::Transport(format!("trame de {} octets trop grande", body.len())))?;
    writer
        .write_all(&len.to_be_bytes())
        .and_then(|_| writer.write_all(&body))
        .and_then(|_| writer.flush())
        .map_err(|e| CryptoError::Transport(e.to_string()))
}

/// Ok(None) si le pair a fermé la connexion proprement entre deux trames
pub fn read_frame<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<Option<T>> {
    let mut header = [0u8; 4];
    match reader.read_exact(&mut header) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(CryptoError::Transport(e.to_string())),
    }
    let len = u32::from_be_bytes(header);
    if len > MAX_FRAME_BYTES {
        return Err(CryptoError::Transport(format!(
            "trame annoncée de {len} octets (maximum {MAX_FRAME_BYTES})"
        )));
    }
    let mut body = vec![0u8; len as usize];
    reader
        .read_exact(&mut body)
        .map_err(|e| CryptoError::Transport(e.to_string()))?;
    Ok(Some(bincode::deserialize(&body)?))
}

// ============================================================================
// TcpTransport — côté client
// ============================================================================
pub struct TcpTransport {
    stream:   TcpStream,
    identity: String,
}

impl TcpTransport {
    pub fn connect(addr: impl ToSocketAddrs, identity: impl Into<String>) -> Result<Self> {
        let stream = TcpStream::connect(addr).map_err(|e| CryptoError::Transport(e.to_string()))?;
        Ok(TcpTransport { stream, identity: identity.into() })
    }
}

impl Transport for TcpTransport {
    fn send(&mut self, request: Request) -> Result<Response> {
        let envelope = Envelope { identity: self.identity.clone(), request };
        write_frame(&mut self.stream, &envelope)?;
        read_frame(&mut self.stream)?
            .ok_or_else(|| CryptoError::Transport("connexion fermée par le serveur".to_string()))
    }
}
