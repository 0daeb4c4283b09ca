//! The deployer: a bounded-concurrency executor over the task graph.
//!
//! Tasks run on the async scheduler as their predecessors reach a
//! successful terminal state; a failure cascades `Skipped` downstream and
//! fails the promise slots of everything that will never run.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tracing::{debug, error, info, instrument, warn};

use eiko_compiler::Value;

use crate::error::Error;
use crate::handler::{Handler, HandlerContext, LogLevel, LogLine};
use crate::task::{TaskGraph, TaskState};

/// Requests cooperative cancellation of a running deploy.
#[derive(Clone)]
pub struct CancelHandle(Arc<watch::Sender<bool>>);

impl CancelHandle {
    /// In-flight tasks finish their current step; nothing new starts.
    pub fn cancel(&self) {
        let _ = self.0.send(true);
    }
}

/// Outcome of one task.
pub struct TaskReport {
    pub state: TaskState,
    pub changes: IndexMap<String, Value>,
    pub logs: Vec<LogLine>,
}

/// Outcome of a whole deployment.
pub struct DeployReport {
    pub results: IndexMap<String, TaskReport>,
    pub cancelled: bool,
}

impl DeployReport {
    pub fn success(&self) -> bool {
        !self.cancelled
            && self
                .results
                .values()
                .all(|r| matches!(r.state, TaskState::Deployed))
    }

    pub fn state_of(&self, task_id: &str) -> Option<TaskState> {
        self.results.get(task_id).map(|r| r.state)
    }

    /// The first typed error of a run that did not converge.
    pub fn first_error(&self) -> Option<Error> {
        for (id, result) in &self.results {
            if matches!(result.state, TaskState::Failed) {
                let message = result
                    .logs
                    .iter()
                    .rev()
                    .find(|l| l.level == LogLevel::Error)
                    .map(|l| l.message.clone())
                    .unwrap_or_else(|| "task reached the Failed state".to_string());
                return Some(Error::HandlerFailed {
                    task: id.clone(),
                    message,
                });
            }
        }
        if self.cancelled {
            return Some(Error::Cancelled);
        }
        None
    }
}

pub struct Deployer {
    parallelism: usize,
    dry_run: bool,
    cache_root: PathBuf,
    command_timeout: Duration,
    cancel: Arc<watch::Sender<bool>>,
}

impl Default for Deployer {
    fn default() -> Self {
        Self::new()
    }
}

impl Deployer {
    pub fn new() -> Self {
        let (cancel, _) = watch::channel(false);
        Self {
            parallelism: 10,
            dry_run: false,
            cache_root: PathBuf::from(".eikobot_cache"),
            command_timeout: Duration::from_secs(3),
            cancel: Arc::new(cancel),
        }
    }

    pub fn with_parallelism(mut self, parallelism: usize) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn with_cache_root(mut self, cache_root: PathBuf) -> Self {
        self.cache_root = cache_root;
        self
    }

    pub fn with_command_timeout(mut self, timeout: Duration) -> Self {
        self.command_timeout = timeout;
        self
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel.clone())
    }

    /// Drive every task to a terminal state.
    #[instrument(skip_all, fields(tasks = graph.total_tasks, dry_run = self.dry_run))]
    pub async fn deploy(&self, graph: &TaskGraph) -> DeployReport {
        let mut states: IndexMap<String, TaskState> = graph
            .ids()
            .map(|id| (id.clone(), TaskState::Pending))
            .collect();
        let mut remaining: HashMap<String, usize> = graph
            .tasks()
            .map(|t| (t.id.clone(), t.depends_on.len()))
            .collect();
        let mut contexts: HashMap<String, HandlerContext> = HashMap::new();

        let semaphore = Arc::new(Semaphore::new(self.parallelism));
        let mut join_set: JoinSet<(String, HandlerContext, bool)> = JoinSet::new();
        let mut cancel_rx = self.cancel.subscribe();
        let mut cancelled = *cancel_rx.borrow();

        info!(tasks = graph.total_tasks, "deploy starting");

        // Base tasks are ready immediately.
        let ready: Vec<String> = graph
            .tasks()
            .filter(|t| t.depends_on.is_empty())
            .map(|t| t.id.clone())
            .collect();
        for id in ready {
            self.spawn_task(graph, &id, &mut states, &mut join_set, &semaphore);
        }

        while !join_set.is_empty() {
            tokio::select! {
                changed = cancel_rx.changed(), if !cancelled => {
                    if changed.is_ok() && *cancel_rx.borrow() {
                        cancelled = true;
                        warn!("deploy cancelled; waiting for running tasks");
                    }
                }
                joined = join_set.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((id, ctx, success)) => {
                            let state = if success {
                                TaskState::Deployed
                            } else {
                                TaskState::Failed
                            };
                            states.insert(id.clone(), state);
                            contexts.insert(id.clone(), ctx);

                            if success {
                                debug!(task = %id, "task deployed");
                                if !cancelled {
                                    let unblocked = self.release_dependants(graph, &id, &mut remaining, &states);
                                    for next in unblocked {
                                        self.spawn_task(graph, &next, &mut states, &mut join_set, &semaphore);
                                    }
                                }
                            } else {
                                error!(task = %id, "task failed");
                                fail_promises(graph, &id);
                                skip_downstream(graph, &id, &mut states);
                            }
                        }
                        Err(join_err) => {
                            error!("a task aborted unexpectedly: {join_err}");
                        }
                    }
                }
            }
        }

        // Whatever never started is skipped; its promises will never
        // resolve, so waiters must see the failure.
        for (id, state) in states.iter_mut() {
            if !state.is_terminal() {
                *state = TaskState::Skipped;
                fail_promises(graph, id);
            }
        }

        self.run_cleanup(graph, &mut contexts).await;

        let mut results = IndexMap::new();
        for (id, state) in states {
            let (changes, logs) = match contexts.remove(&id) {
                Some(ctx) => (ctx.changes.clone(), ctx.logs().to_vec()),
                None => (IndexMap::new(), Vec::new()),
            };
            results.insert(
                id,
                TaskReport {
                    state,
                    changes,
                    logs,
                },
            );
        }

        info!(cancelled, "deploy finished");
        DeployReport { results, cancelled }
    }

    fn spawn_task(
        &self,
        graph: &TaskGraph,
        id: &str,
        states: &mut IndexMap<String, TaskState>,
        join_set: &mut JoinSet<(String, HandlerContext, bool)>,
        semaphore: &Arc<Semaphore>,
    ) {
        let Some(task) = graph.get(id) else { return };
        if states.get(id) != Some(&TaskState::Pending) {
            return;
        }
        states.insert(id.to_string(), TaskState::Running);

        let handler = task.handler.clone();
        let resource = task.resource.clone();
        let task_id = task.id.clone();
        let semaphore = semaphore.clone();
        let cache_root = self.cache_root.clone();
        let timeout = self.command_timeout;
        let dry_run = self.dry_run;

        join_set.spawn(async move {
            let _permit = semaphore
                .acquire_owned()
                .await
                .expect("deploy semaphore is never closed");
            info!(task = %task_id, "starting task");
            let mut ctx =
                HandlerContext::new(resource, task_id.clone(), cache_root, timeout, dry_run);
            let success = run_task(handler.as_ref(), &mut ctx).await;
            (task_id, ctx, success)
        });
    }

    /// Dependants of a deployed task whose predecessors are now all done.
    fn release_dependants(
        &self,
        graph: &TaskGraph,
        id: &str,
        remaining: &mut HashMap<String, usize>,
        states: &IndexMap<String, TaskState>,
    ) -> Vec<String> {
        let mut unblocked = Vec::new();
        let Some(task) = graph.get(id) else {
            return unblocked;
        };
        for dependant in &task.dependants {
            if states.get(dependant) != Some(&TaskState::Pending) {
                continue;
            }
            if let Some(count) = remaining.get_mut(dependant) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    unblocked.push(dependant.clone());
                }
            }
        }
        unblocked
    }

    /// Run every handler's cleanup hook once all tasks are terminal.
    /// Failures are logged; they never change a task's outcome.
    async fn run_cleanup(&self, graph: &TaskGraph, contexts: &mut HashMap<String, HandlerContext>) {
        for task in graph.tasks() {
            let mut fresh;
            let ctx = match contexts.get_mut(&task.id) {
                Some(ctx) => ctx,
                None => {
                    fresh = HandlerContext::new(
                        task.resource.clone(),
                        task.id.clone(),
                        self.cache_root.clone(),
                        self.command_timeout,
                        self.dry_run,
                    );
                    &mut fresh
                }
            };
            if let Err(e) = task.handler.cleanup(ctx).await {
                error!(task = %task.id, "cleanup failed: {e}");
            }
        }
    }
}

/// Tasks downstream of a failure will never run.
fn skip_downstream(graph: &TaskGraph, id: &str, states: &mut IndexMap<String, TaskState>) {
    let Some(task) = graph.get(id) else { return };
    for dependant in task.dependants.clone() {
        if states
            .get(&dependant)
            .is_some_and(|s| *s == TaskState::Pending)
        {
            states.insert(dependant.clone(), TaskState::Skipped);
            warn!(task = %dependant, "skipped: a predecessor failed");
            fail_promises(graph, &dependant);
            skip_downstream(graph, &dependant, states);
        }
    }
}

/// Mark every unresolved promise slot of a task's resource as failed so
/// consumers waiting on them error out instead of hanging.
fn fail_promises(graph: &TaskGraph, id: &str) {
    if let Some(task) = graph.get(id) {
        for (_, promise) in task.resource.promises() {
            promise.fail();
        }
    }
}

/// Drive one task through its handler: pre, execute (or the CRUD flow),
/// promise resolution, post. Returns overall success.
async fn run_task(handler: &dyn Handler, ctx: &mut HandlerContext) -> bool {
    if ctx.dry_run {
        return match handler.dry_run(ctx).await {
            Ok(()) => true,
            Err(e) => {
                ctx.error(format!("dry run failed: {e}"));
                false
            }
        };
    }

    let result: Result<(), String> = async {
        handler.pre(ctx).await.map_err(|e| e.to_string())?;
        if ctx.failed {
            return Err("pre-deploy failed".to_string());
        }
        handler.execute(ctx).await.map_err(|e| e.to_string())?;
        if ctx.failed || !ctx.deployed {
            return Err("handler execution failed".to_string());
        }
        handler
            .resolve_promises(ctx)
            .await
            .map_err(|e| e.to_string())?;
        if ctx.failed {
            return Err("resolving promises failed".to_string());
        }
        Ok(())
    }
    .await;

    let mut success = match result {
        Ok(()) => true,
        Err(message) => {
            ctx.error(format!("failed to deploy '{}': {message}", ctx.task_id));
            ctx.failed = true;
            false
        }
    };

    // Post runs even after a failure.
    if let Err(e) = handler.post(ctx).await {
        ctx.error(format!("post-deploy failed: {e}"));
        success = false;
    }

    // A nominally successful handler that left its own promises open did
    // not actually converge.
    if success {
        for (name, promise) in ctx.resource.promises() {
            if promise.get().is_none() {
                ctx.error(format!(
                    "resource deployed, but promise '{name}' was not fulfilled"
                ));
                success = false;
            }
        }
    }

    success
}
