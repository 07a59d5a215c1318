//! Password algorithms used when injecting credentials
//!
//! * [`mysql`]: `mysql_native_password`, `caching_sha2_password` and the RSA
//!   full-authentication exchange
//! * [`md5`]: the Postgres md5 password response
//! * [`scram`]: the SCRAM-SHA-256 client used for Postgres SASL

pub mod md5;
pub mod mysql;
pub mod scram;

pub use self::md5::md5_password;
pub use scram::{ChannelBinding, ScramClient, ScramError, ScramState};
