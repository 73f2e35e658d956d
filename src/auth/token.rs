//! Token record and secret types.

pub mod record;
pub mod secret;
