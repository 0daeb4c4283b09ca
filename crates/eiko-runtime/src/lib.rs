//! Export and deployment of compiled Eiko models.
//!
//! The exporter lowers the compiler's object graph into a DAG of tasks,
//! one per handled resource; the deployer executes the DAG with bounded
//! concurrency, driving each task through a CRUD state machine and
//! resolving promises along the way.

pub mod deployer;
pub mod error;
pub mod exporter;
pub mod handler;
pub mod task;

pub use deployer::{CancelHandle, DeployReport, Deployer, TaskReport};
pub use error::{Error, Result};
pub use exporter::export;
pub use handler::{
    BoxFuture, CRUDHandler, Handler, HandlerContext, HandlerError, HandlerRegistry, HandlerResult,
};
pub use task::{Task, TaskGraph, TaskState};
