//! Database migrations for the launchgate service.
//!
//! Every table the service persists is created here with SeaORM Migration.

pub use sea_orm_migration::prelude::*;

mod m2026_01_05_000001_create_projects;
mod m2026_01_05_000002_create_connections;
mod m2026_01_05_000003_create_pending_oauth_requests;
mod m2026_01_05_000004_create_assets;
mod m2026_01_05_000005_create_analysis_jobs;
mod m2026_01_05_000006_create_automation_rules;
mod m2026_01_05_000007_create_campaigns;
mod m2026_01_05_000008_create_domain_events;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m2026_01_05_000001_create_projects::Migration),
            Box::new(m2026_01_05_000002_create_connections::Migration),
            Box::new(m2026_01_05_000003_create_pending_oauth_requests::Migration),
            Box::new(m2026_01_05_000004_create_assets::Migration),
            Box::new(m2026_01_05_000005_create_analysis_jobs::Migration),
            Box::new(m2026_01_05_000006_create_automation_rules::Migration),
            Box::new(m2026_01_05_000007_create_campaigns::Migration),
            Box::new(m2026_01_05_000008_create_domain_events::Migration),
        ]
    }
}
