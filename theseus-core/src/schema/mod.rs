mod auth;
mod builder;
mod document;
mod model;
mod naming;

pub use auth::*;
pub use document::*;
pub use model::*;
pub use naming::{lower_first, pluralize, upper_first, EntityNames, RelationshipNames};
