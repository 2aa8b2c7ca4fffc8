//! Repository implementations.

pub mod jobs;
pub mod packages;

pub use jobs::{JobRow, PgDeploymentJobRepo};
pub use packages::PgPackageCatalog;
