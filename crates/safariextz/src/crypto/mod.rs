//! Private key inspection.
//!
//! The packer never signs in-process; `openssl` does. This module only reads
//! enough of the private key to know how long its signatures will be.

pub mod key;

pub use key::{KeyKind, PrivateKeyInfo};
