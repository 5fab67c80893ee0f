pub mod cve_sources;
pub mod db;
pub mod export;
pub mod ingest;
pub mod normalize;
pub mod platform;
pub mod references;
