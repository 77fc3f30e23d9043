// Library for tests to access modules

pub mod aggregator;
pub mod collectors;
pub mod config;
pub mod error;
pub mod history_repo;
pub mod lifecycle;
pub mod models;
pub mod retention_worker;
pub mod routes;
pub mod settings;
pub mod version;
pub mod writer;
