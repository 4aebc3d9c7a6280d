//! # Rillrpc
//!
//! The call/reply envelope spoken between a computation and its proxy.
//!
//! Every message is a single `rillpack` value: either a `Call` carrying a
//! sequence number, a method name and positional arguments, or a `Reply`
//! carrying the same sequence number and either the results or a
//! `FailureReason`. Argument and result *types* are not on the wire; each
//! side reads positions with the types its method signature dictates.

pub mod error;
pub mod frame;

pub use error::Error;
pub use error::FailureReason;
pub use error::Result;
pub use frame::CallDecoder;
pub use frame::CallEncoder;
pub use frame::ReplyDecoder;
pub use frame::ReplyErrEncoder;
pub use frame::ReplyOkEncoder;
pub use frame::RpcFrame;
pub use frame::Values;
pub use frame::decode_seq;
