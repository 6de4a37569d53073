pub mod actor;
pub mod routing;
pub mod types;
pub mod workers;
