pub mod logger;
pub mod surface;

pub use surface::{schema_surface, write_surface_report, EntitySurface};
