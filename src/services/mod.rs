pub mod audit_log;
pub mod directory_window;
pub mod extractor;
pub mod ingestion_service;
pub mod missing_files;
pub mod orchestrator;
pub mod readiness;
pub mod staging_store;
pub mod watch_service;

#[cfg(test)]
pub(crate) mod test_support;
