//! MaDRPC Common Types
//!
//! This crate provides the protocol definitions shared by the MaDRPC
//! client-side cluster layer and the endpoints it drives.
//!
//! # Overview
//!
//! A call travels through the system as an [`Invocation`]: a method name, its
//! JSON arguments, a string attachment map for cross-cutting metadata, and the
//! declared [`ReturnType`] used when partial results have to be merged. Every
//! endpoint answers with an [`RpcResult`] or a classified [`MadrpcError`].
//!
//! # Components
//!
//! - [`protocol`] - Invocation, result and error types
//!
//! # Example
//!
//! ```
//! use madrpc_common::{Invocation, MadrpcError, ReturnType, RpcResult};
//! use serde_json::json;
//!
//! let invocation = Invocation::new("compute", json!({"n": 1000}))
//!     .with_attachment("tenant", "blue")
//!     .with_return_type(ReturnType::Integer);
//!
//! let result = RpcResult::new(json!(42));
//! assert_eq!(result.value(), Some(&json!(42)));
//!
//! let error = MadrpcError::business("insufficient funds");
//! assert!(error.is_business());
//! # let _ = invocation;
//! ```

pub mod protocol;

pub use protocol::*;
