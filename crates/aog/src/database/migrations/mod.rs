//! SeaORM migrations
//!
//! The schema is small enough that the initial migration creates everything;
//! the seed migration inserts the closed service set and the version record.

use sea_orm_migration::prelude::*;

pub mod m20250901_000001_initial_schema;
pub mod m20250901_000002_seed_services;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250901_000001_initial_schema::Migration),
            Box::new(m20250901_000002_seed_services::Migration),
        ]
    }
}
