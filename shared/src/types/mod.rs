//! Domain type definitions

pub mod finding;
pub mod live;
pub mod metric;
