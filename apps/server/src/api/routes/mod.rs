//! Route tables

pub mod definitions;
pub mod metrics;
pub mod modules;
