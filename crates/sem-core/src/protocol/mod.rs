//! Protocol module containing the transaction frame types and the binary codec.

pub mod codec;
pub mod frame;

pub use codec::{
    decode_request, decode_request_header, decode_response, encode_request, encode_response,
    request_from_parts, ProtocolError, RequestHeader,
};
pub use frame::*;
