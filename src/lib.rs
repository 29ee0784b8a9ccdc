//! Project evaluation workflows: uploads, status-gated background
//! pipelines (remark clustering, checklist verification, final report)
//! and the worker pool that runs them.

pub mod app;
pub mod clustering;
pub mod config;
pub mod error;
pub mod llm;
pub mod logging;
pub mod pipeline;
pub mod rag;
pub mod remarks;
pub mod report;
pub mod repository;
pub mod service;
pub mod state_machine;
pub mod storage;
pub mod tasks;

#[cfg(test)]
mod test_support;
