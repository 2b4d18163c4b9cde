//! Collaborator stages (SPEC_FULL.md [SUPPLEMENT] "External collaborator
//! stages"): each one consumes the validated artifact and produces a
//! sibling output under `data/` or `reports/`, run in-process from
//! `pipeline::run_cycle` rather than as out-of-process plugins.

pub mod backup;
pub mod cross_cycle;
pub mod parquet;
pub mod quality;
pub mod transform;
pub mod validate;
