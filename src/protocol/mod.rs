//! Wire protocol implementation
//!
//! This module handles:
//! * MySQL framing with per-socket sequence counters
//! * PostgreSQL framing, startup messages and authentication messages
//! * Length-encoded and NUL-terminated primitives shared by the codecs

pub mod mysql;
pub mod postgres;
pub mod primitives;
