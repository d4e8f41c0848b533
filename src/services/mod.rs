//! Business logic services

pub mod classifier;
pub mod consumer;
#[cfg(test)]
pub mod geo;
pub mod locator;
pub mod processor;
pub mod publisher;
