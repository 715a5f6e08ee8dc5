//! Attribute Protocol (ATT) vocabulary
//!
//! This module defines the attribute-level requests, responses, and error
//! codes exchanged between a GATT client and server through the transport.
//! The wire encoding of these values is a transport concern; the core works
//! with the structured forms directly.

pub mod constants;
pub mod error;
pub mod types;

pub use self::constants::*;
pub use self::error::AttErrorCode;
pub use self::types::{AttCommand, AttRequest, AttResponse};
