pub mod identity_cache;

pub use identity_cache::{IdentityCache, IdentitySlot, IdentityState};
