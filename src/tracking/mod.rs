pub mod estimator;
pub mod ingest;
pub mod session;
