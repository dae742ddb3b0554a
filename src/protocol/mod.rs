//! Daemon protocol: frame codec, request body encoding and reply decoding.

pub mod frame;
pub mod reply;
pub mod request;

pub use frame::{CorrelationId, Frame, FrameCodec};
pub use reply::decode_reply;
pub use request::{keyed_map, Arguments, MapKey, MethodRequest};
