//! Persistence port implementations
//!
//! One repository per aggregate, all speaking the [`traits::DataStore`]
//! surface over SeaORM.

pub mod model;
pub mod provider;
pub mod service;
pub mod traits;
pub mod version;

pub use model::{ModelKey, ModelRepository};
pub use provider::ProviderRepository;
pub use service::ServiceRepository;
pub use traits::{DataStore, FilterClause, ListParams, SortOrder};
pub use version::VersionRepository;

use std::sync::Arc;

use sea_orm::DatabaseConnection;

/// Bundle of all repositories, cloned freely across components.
#[derive(Clone)]
pub struct Repositories {
    pub services: ServiceRepository,
    pub providers: ProviderRepository,
    pub models: ModelRepository,
    pub versions: VersionRepository,
}

impl Repositories {
    pub fn new(connection: Arc<DatabaseConnection>) -> Self {
        Self {
            services: ServiceRepository::new(connection.clone()),
            providers: ProviderRepository::new(connection.clone()),
            models: ModelRepository::new(connection.clone()),
            versions: VersionRepository::new(connection),
        }
    }
}
