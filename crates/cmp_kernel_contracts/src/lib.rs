#![forbid(unsafe_code)]

pub mod common;
pub mod complaint;
pub mod directory;
pub mod error;

pub use common::{ContractViolation, SchemaVersion, Validate};
pub use error::CmpError;
