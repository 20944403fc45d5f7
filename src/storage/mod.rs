pub mod byte_store;
pub mod embedding_store;

// Réexportations byte_store
pub use byte_store::{ByteStore, FileStore, MemoryStore, MAX_BLOB_BYTES};

// Réexportations embedding_store
pub use embedding_store::{BlobEmbeddingStore, EmbeddingStore, MemoryEmbeddingStore};
