//! SeaORM entity definitions
//!
//! Enum-valued columns are stored as their string form; the repositories
//! convert to and from the domain enums in `crate::models`.

pub mod models;
pub mod service_providers;
pub mod services;
pub mod version_records;

pub mod prelude {
    pub use super::models::Entity as Models;
    pub use super::service_providers::Entity as ServiceProviders;
    pub use super::services::Entity as Services;
    pub use super::version_records::Entity as VersionRecords;
}
