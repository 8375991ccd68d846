pub mod assets;
pub mod config;
pub mod database;
pub mod errors;
pub mod importer;
pub mod models;
pub mod repositories;
