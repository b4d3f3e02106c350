//! Wire types for colony/agent RPC.
//!
//! All request/response pairs are prost messages carried as
//! `application/x-protobuf` bodies over the HTTP/2-capable listeners. Types
//! are versioned under [v1]; a breaking change gets a new version module, it
//! never mutates `v1`.

mod proto_body;
pub mod v1;

pub(crate) use proto_body::Proto;
