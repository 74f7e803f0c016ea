//! Core execution types shared by every pipeline stage.
//!
//! - **[`EtlContext`]**: the DataFusion session plus the identity of the run
//! - **[`EtlContextConfig`]**: engine settings (batch size, parallelism, memory)
//! - **[`JobInfo`]**: job name and run id resolved at startup

mod context;

pub use context::{EtlContext, EtlContextConfig, JobInfo};
