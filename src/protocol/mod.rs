pub mod messages;
pub mod state;
pub mod server;
pub mod client;

// Réexportations messages
pub use messages::{
    Ack, IndexPayload, IngestPayload, PublicKeyPayload, QueryPayload, QueryResponse, QueryResult,
    Request, Response,
};

// Réexportations state
pub use state::ProtocolState;

// Réexportations client
pub use client::{ClientConfig, ClientSession, Transport};
