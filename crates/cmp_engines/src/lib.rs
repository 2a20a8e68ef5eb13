#![forbid(unsafe_code)]

pub mod analytics;
pub mod clock;
pub mod lifecycle;
pub mod portal;

pub use portal::ComplaintPortal;
