//! Handlers: host code that reads, creates, updates and deletes the
//! real-world object backing a resource.
//!
//! Handlers register by resource definition name and are linked to tasks
//! by the exporter. Trait methods return boxed futures so handlers stay
//! object-safe without an extra dependency; implementors wrap their
//! bodies in `Box::pin(async move { ... })`.

use std::collections::HashMap;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tracing::{debug, error, info, warn};

use eiko_compiler::value::ResourceCell;
use eiko_compiler::Value;

use crate::error::Error;

pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// Errors a handler method can produce.
#[derive(Debug, Clone, thiserror::Error)]
pub enum HandlerError {
    /// The CRUD method is not implemented; the state machine treats this
    /// as "nothing to do" rather than a failure.
    #[error("method not implemented")]
    NotImplemented,
    /// A promise this handler depends on was never resolved.
    #[error("unresolved promise '{0}'")]
    UnresolvedPromise(String),
    #[error("{0}")]
    Failed(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }
}

pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Captured log line on a task's own buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogLine {
    pub level: LogLevel,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

/// Everything a handler needs while deploying one task.
pub struct HandlerContext {
    /// The bound resource; immutable.
    pub resource: Arc<ResourceCell>,
    pub task_id: String,
    /// Changes discovered by `read`, consumed by `update`.
    pub changes: IndexMap<String, Value>,
    pub deployed: bool,
    pub updated: bool,
    pub failed: bool,
    /// Timeout for remote command execution, from project settings.
    pub command_timeout: Duration,
    pub dry_run: bool,
    logs: Vec<LogLine>,
    cache_root: PathBuf,
    scratch: Option<PathBuf>,
}

impl HandlerContext {
    pub fn new(
        resource: Arc<ResourceCell>,
        task_id: String,
        cache_root: PathBuf,
        command_timeout: Duration,
        dry_run: bool,
    ) -> Self {
        Self {
            resource,
            task_id,
            changes: IndexMap::new(),
            deployed: false,
            updated: false,
            failed: false,
            command_timeout,
            dry_run,
            logs: Vec::new(),
            cache_root,
            scratch: None,
        }
    }

    /// Read a property; a promise value suspends until its slot resolves.
    ///
    /// In dry-run mode nothing resolves promises, so an unresolved slot is
    /// reported immediately instead of awaited.
    pub async fn property(&self, name: &str) -> Result<Value, HandlerError> {
        let value = self.resource.get(name).ok_or_else(|| {
            HandlerError::failed(format!(
                "resource '{}' has no property '{name}'",
                self.task_id
            ))
        })?;
        match value {
            Value::Promise(promise) => {
                if self.dry_run {
                    return promise
                        .get()
                        .ok_or_else(|| HandlerError::UnresolvedPromise(promise.name.clone()));
                }
                match promise.wait().await {
                    Ok(value) => Ok(value),
                    Err(_state) => Err(HandlerError::UnresolvedPromise(promise.name.clone())),
                }
            }
            other => Ok(other),
        }
    }

    /// Write this task's own promise slot; exactly once.
    pub fn resolve_promise(&self, name: &str, value: Value) -> Result<(), Error> {
        let promise = self.resource.promise(name).ok_or_else(|| Error::HandlerFailed {
            task: self.task_id.clone(),
            message: format!("resource has no promise property '{name}'"),
        })?;
        if !value.type_of().is_subtype(&promise.ty) {
            return Err(Error::HandlerFailed {
                task: self.task_id.clone(),
                message: format!(
                    "promise '{name}' expects '{}', got '{}'",
                    promise.ty,
                    value.type_of()
                ),
            });
        }
        promise.resolve(value).map_err(|message| Error::HandlerFailed {
            task: self.task_id.clone(),
            message,
        })
    }

    pub fn add_change(&mut self, key: impl Into<String>, value: Value) {
        self.changes.insert(key.into(), value);
    }

    /// Run one remote command step under the configured `ssh_timeout`;
    /// expiry marks that command failed.
    pub async fn with_command_timeout<T, F>(&self, fut: F) -> Result<T, Error>
    where
        F: Future<Output = T>,
    {
        tokio::time::timeout(self.command_timeout, fut)
            .await
            .map_err(|_| Error::Timeout {
                task: self.task_id.clone(),
                seconds: self.command_timeout.as_secs(),
            })
    }

    /// Per-task scratch directory, created on first use.
    pub fn scratch_dir(&mut self) -> std::io::Result<&Path> {
        if self.scratch.is_none() {
            let dir = self.cache_root.join(self.normalized_task_id());
            std::fs::create_dir_all(&dir)?;
            self.scratch = Some(dir);
        }
        Ok(self.scratch.as_deref().expect("set above"))
    }

    /// Strip separators and colons so the task id works as a directory
    /// name on every platform.
    pub fn normalized_task_id(&self) -> String {
        self.task_id
            .replace(['\\', '/'], "-")
            .replace(' ', "")
            .replace(':', ".")
    }

    pub fn logs(&self) -> &[LogLine] {
        &self.logs
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        let message = message.into();
        debug!(task = %self.task_id, "{message}");
        self.logs.push(LogLine {
            level: LogLevel::Debug,
            message,
        });
    }

    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!(task = %self.task_id, "{message}");
        self.logs.push(LogLine {
            level: LogLevel::Info,
            message,
        });
    }

    pub fn warning(&mut self, message: impl Into<String>) {
        let message = message.into();
        warn!(task = %self.task_id, "{message}");
        self.logs.push(LogLine {
            level: LogLevel::Warning,
            message,
        });
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let message = message.into();
        error!(task = %self.task_id, "{message}");
        self.logs.push(LogLine {
            level: LogLevel::Error,
            message,
        });
    }
}

/// A handler with a single user-supplied step.
///
/// Success is signalled by setting `ctx.deployed`; failures either return
/// an error or set `ctx.failed`.
pub trait Handler: Send + Sync {
    fn pre<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn execute<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>>;

    /// Write promise slots after a successful execute.
    fn resolve_promises<'a>(
        &'a self,
        _ctx: &'a mut HandlerContext,
    ) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn post<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }

    /// Runs exactly once after every task reached a terminal state.
    fn cleanup<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn dry_run<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            ctx.info("Task would execute.");
            Ok(())
        })
    }
}

/// CRUD-shaped handler; `execute` drives read → create/update.
///
/// Unimplemented methods return `HandlerError::NotImplemented`, which the
/// driver interprets (a missing `read` means "always create").
pub trait CRUDHandler: Send + Sync {
    fn create<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Err(HandlerError::NotImplemented) })
    }

    fn read<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Err(HandlerError::NotImplemented) })
    }

    fn update<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Err(HandlerError::NotImplemented) })
    }

    fn delete<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Err(HandlerError::NotImplemented) })
    }

    fn resolve_promises<'a>(
        &'a self,
        _ctx: &'a mut HandlerContext,
    ) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn pre<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn post<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }

    fn cleanup<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async { Ok(()) })
    }
}

impl<T: CRUDHandler> Handler for T {
    fn pre<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        CRUDHandler::pre(self, ctx)
    }

    fn execute<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            ctx.failed = false;
            ctx.deployed = false;

            match self.read(ctx).await {
                Ok(()) | Err(HandlerError::NotImplemented) => {}
                Err(other) => return Err(other),
            }

            if !ctx.deployed {
                ctx.debug("Deploying resource.");
                match self.create(ctx).await {
                    Ok(()) => {}
                    Err(HandlerError::NotImplemented) => {
                        ctx.error("Tried to deploy resource, but handler has no create method.");
                        return Ok(());
                    }
                    Err(other) => return Err(other),
                }
            } else if !ctx.changes.is_empty() {
                ctx.deployed = false;
                ctx.debug("Updating resource.");
                match self.update(ctx).await {
                    Ok(()) => {}
                    Err(HandlerError::NotImplemented) => {
                        ctx.warning("Read returned changes for a handler without update method.");
                    }
                    Err(other) => return Err(other),
                }
            } else {
                ctx.debug("Resource is in its desired state.");
            }

            if !ctx.deployed {
                ctx.failed = true;
            }
            Ok(())
        })
    }

    fn resolve_promises<'a>(
        &'a self,
        ctx: &'a mut HandlerContext,
    ) -> BoxFuture<'a, HandlerResult<()>> {
        CRUDHandler::resolve_promises(self, ctx)
    }

    fn post<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        CRUDHandler::post(self, ctx)
    }

    fn cleanup<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        CRUDHandler::cleanup(self, ctx)
    }

    fn dry_run<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            ctx.debug("Reading resource.");
            match self.read(ctx).await {
                Ok(()) => {}
                Err(HandlerError::NotImplemented) => {
                    ctx.info("Resource would be created.");
                    return Ok(());
                }
                Err(HandlerError::UnresolvedPromise(_)) => {
                    ctx.info(
                        "Resource relies on promises that are unresolved; its state is unknown.",
                    );
                    return Ok(());
                }
                Err(other) => return Err(other),
            }

            if ctx.deployed {
                if ctx.changes.is_empty() {
                    ctx.info("Resource is in its desired state.");
                } else {
                    let changes: Vec<String> =
                        ctx.changes.keys().map(String::to_string).collect();
                    ctx.info(format!(
                        "Resource would be updated. (changes: {})",
                        changes.join(", ")
                    ));
                }
            } else if ctx.failed {
                ctx.error("Resource is in a failed state!");
            } else {
                ctx.info("Resource would be created.");
            }
            Ok(())
        })
    }
}

pub type HandlerFactory = Box<dyn Fn() -> Arc<dyn Handler> + Send + Sync>;

/// Handlers registered by resource definition name; the exporter links
/// them to tasks. Each task gets its own handler instance.
#[derive(Default)]
pub struct HandlerRegistry {
    factories: HashMap<String, HandlerFactory>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler type for a resource definition name (the
    /// `__eiko_resource__` tag of the host ABI).
    pub fn register<H, F>(&mut self, resource_name: impl Into<String>, factory: F)
    where
        H: Handler + 'static,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.factories
            .insert(resource_name.into(), Box::new(move || Arc::new(factory())));
    }

    pub fn contains(&self, resource_name: &str) -> bool {
        self.factories.contains_key(resource_name)
    }

    /// Instantiate a fresh handler for one task.
    pub fn make(&self, resource_name: &str) -> Option<Arc<dyn Handler>> {
        self.factories.get(resource_name).map(|f| f())
    }
}
