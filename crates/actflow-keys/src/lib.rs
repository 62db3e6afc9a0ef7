//! # actflow-keys
//!
//! Identity strings for actflow operations:
//! - Tags and structured keys generated from a resource schema
//! - Canonical, order-independent stringification of serializable values
//! - `prefix + SHA-1` idempotency keys
//!
//! Invalid input is reported as
//! [`actflow_core::Error::InvalidArgument`] with a stable code.

pub mod idempotency;
pub mod key_factory;

pub use idempotency::{
    make_idempotency_key, stable_hash, stable_stringify, Binary, IdempotencyKeyOptions, IsoDate,
};
pub use key_factory::{KeyFactory, KeyPart, ResourceSpec};
