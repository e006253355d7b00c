pub mod config;
pub mod cursor;
pub mod decoder;
pub mod merger;
pub mod metrics;
pub mod queue;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;
