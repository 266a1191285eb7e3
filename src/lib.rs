pub mod artifact;
pub mod codec;
pub mod config;
pub mod ingest;
pub mod logging;
pub mod options;
pub mod pipeline;
pub mod sequence;
pub mod stage;
