pub mod params;
pub mod context;

// Réexportations params
pub use params::{HeParams, Scheme};

// Réexportations context
pub use context::{context_key, EncryptionContext};
