//! Database migrations for the Connections API.
//!
//! This module contains all database migrations using SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2025_12_01_100000_create_connections;
mod m2025_12_01_100100_create_authorization_states;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2025_12_01_100000_create_connections::Migration),
            Box::new(m2025_12_01_100100_create_authorization_states::Migration),
        ]
    }
}
