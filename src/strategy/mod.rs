pub mod strategy;
pub mod ckks;
pub mod bfv;

pub use bfv::BfvStrategy;
pub use ckks::CkksStrategy;
pub use strategy::{EncryptionStrategy, Strategy};
