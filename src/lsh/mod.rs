pub mod lsh_index;
pub mod hashing;

// Réexportations lsh_index
pub use lsh_index::{hash_point, BucketMap, LshIndex, LshParams, ProjectionMatrix};

// Réexportations hashing
pub use hashing::{Hashing, HashingKind, HashingStrategy};
