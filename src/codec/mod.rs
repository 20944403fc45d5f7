pub mod codec;

pub use codec::{decode_text, encode_text, fnv1a_64, MAX_WIRE_BYTES};
