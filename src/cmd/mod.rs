//! CLI command implementations.
//!
//! | Module    | Commands handled |
//! |-----------|------------------|
//! | `serve`   | `Serve`          |
//! | `project` | `Init`, `State`  |
//! | `run`     | `Ingest`, `Audit`|

pub mod project;
pub mod run;
pub mod serve;

pub use project::{cmd_init, cmd_state};
pub use run::{AuditArgs, cmd_audit, cmd_ingest};
pub use serve::cmd_serve;
