pub mod errors;

pub type Result<T> = std::result::Result<T, errors::TheseusError>;

pub mod backend;
pub mod claims;
pub mod config;
pub mod constraints;
pub mod engine;
pub mod operation;
pub mod result;
pub mod schema;
pub mod translate;

pub mod prelude {
    pub use super::errors::{ErrorKind, TheseusError};
    pub use super::Result;
}
