pub mod net_protocol;

pub use net_protocol::{read_frame, write_frame, Envelope, TcpTransport, MAX_FRAME_BYTES};
