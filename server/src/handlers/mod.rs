//! Request handlers for versioned entities.

mod entities;

pub use entities::*;
