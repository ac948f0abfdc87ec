//! Wire-level encodings: SSE framing for `StreamEvent` and webhook
//! signature verification (spec.md §6).

pub mod sse;
pub mod webhook;

pub use sse::encode_sse;
pub use webhook::{sign, verify_signature, SignatureError};
