#![forbid(unsafe_code)]

pub mod complaints;
pub mod credential;
pub mod directory;
pub mod ids;
pub mod locks;
pub mod notify;
pub mod store;
pub mod testing;

pub use store::StorageError;
