//! Exporter and deployer tests, driven end-to-end from Eiko source.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use eiko_compiler::{Compilation, Compiler, Value};
use eiko_runtime::{
    export, BoxFuture, CRUDHandler, Deployer, HandlerContext, HandlerError, HandlerRegistry,
    HandlerResult, TaskState,
};

fn compile(source: &str) -> Compilation {
    Compiler::default()
        .compile_source(source, None)
        .unwrap_or_else(|f| panic!("compilation failed:\n{}", f.render()))
}

/// Minimal CRUD handler recording call counts; `read` reports deployed
/// once `create` ran, making the second deploy a no-op.
#[derive(Default)]
struct Counting {
    created: AtomicBool,
    create_called: AtomicUsize,
    read_called: AtomicUsize,
    update_called: AtomicUsize,
    cleanup_called: AtomicUsize,
}

#[derive(Clone, Default)]
struct CountingHandle(Arc<Counting>);

impl CRUDHandler for CountingHandle {
    fn create<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            self.0.create_called.fetch_add(1, Ordering::SeqCst);
            self.0.created.store(true, Ordering::SeqCst);
            ctx.deployed = true;
            Ok(())
        })
    }

    fn read<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            self.0.read_called.fetch_add(1, Ordering::SeqCst);
            if self.0.created.load(Ordering::SeqCst) {
                ctx.deployed = true;
            }
            Ok(())
        })
    }

    fn cleanup<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            self.0.cleanup_called.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

const PYRAMID: &str = concat!(
    "resource BotRes:\n",
    "    ip: str\n",
    "resource MidRes:\n",
    "    name: str\n",
    "    bot: BotRes\n",
    "resource TopRes:\n",
    "    name: str\n",
    "    mid: MidRes\n",
    "resource Collector:\n",
    "    name: str\n",
    "    tops: list[TopRes]\n",
    "bot = BotRes(\"192.168.0.100\")\n",
    "m1 = MidRes(\"m1\", bot)\n",
    "m2 = MidRes(\"m2\", bot)\n",
    "t1 = TopRes(\"t1\", m1)\n",
    "t2 = TopRes(\"t2\", m2)\n",
    "c = Collector(\"c\", [t1, t2])\n",
);

fn register_counting(registry: &mut HandlerRegistry, names: &[&str]) -> Vec<CountingHandle> {
    let mut handles = Vec::new();
    for name in names {
        let handle = CountingHandle::default();
        handles.push(handle.clone());
        let cloned = handle.clone();
        registry.register(*name, move || cloned.clone());
    }
    handles
}

#[test]
fn exporter_builds_the_full_pyramid() {
    let compilation = compile(PYRAMID);
    let mut registry = HandlerRegistry::new();
    register_counting(
        &mut registry,
        &["BotRes", "MidRes", "TopRes", "Collector"],
    );

    let graph = export(&compilation, &registry).unwrap();
    assert_eq!(graph.total_tasks, 6);

    let bot = graph.get("BotRes-192.168.0.100").unwrap();
    assert!(bot.depends_on.is_empty());
    assert_eq!(bot.dependants.len(), 2);

    let m1 = graph.get("MidRes-m1").unwrap();
    assert_eq!(m1.depends_on, vec!["BotRes-192.168.0.100".to_string()]);

    let t1 = graph.get("TopRes-t1").unwrap();
    assert_eq!(t1.depends_on, vec!["MidRes-m1".to_string()]);
    let t2 = graph.get("TopRes-t2").unwrap();
    assert_eq!(t2.depends_on, vec!["MidRes-m2".to_string()]);

    // The collector waits on both tops, found nested inside a list.
    let collector = graph.get("Collector-c").unwrap();
    let mut deps = collector.depends_on.clone();
    deps.sort();
    assert_eq!(deps, vec!["TopRes-t1".to_string(), "TopRes-t2".to_string()]);

    assert_eq!(graph.base_tasks().len(), 1);
}

#[test]
fn handlerless_resources_pass_dependencies_through() {
    let compilation = compile(PYRAMID);
    let mut registry = HandlerRegistry::new();
    // MidRes and Collector have no handlers: their tasks disappear and
    // their dependencies flow through.
    register_counting(&mut registry, &["BotRes", "TopRes"]);

    let graph = export(&compilation, &registry).unwrap();
    assert_eq!(graph.total_tasks, 3);

    let t1 = graph.get("TopRes-t1").unwrap();
    assert_eq!(t1.depends_on, vec!["BotRes-192.168.0.100".to_string()]);

    let bot = graph.get("BotRes-192.168.0.100").unwrap();
    assert_eq!(bot.dependants.len(), 2);
    assert_eq!(graph.base_tasks().len(), 1);
}

#[test]
fn deduplicates_shared_children_by_index() {
    let source = concat!(
        "resource Host:\n",
        "    name: str\n",
        "resource Cmd:\n",
        "    cmd: str\n",
        "    host: Host\n",
        "h = Host(\"db\")\n",
        "c1 = Cmd(\"ls\", h)\n",
        "c2 = Cmd(\"pwd\", h)\n",
    );
    let compilation = compile(source);
    let mut registry = HandlerRegistry::new();
    register_counting(&mut registry, &["Host", "Cmd"]);

    let graph = export(&compilation, &registry).unwrap();
    // One Host task, two Cmd tasks; the shared child is not duplicated.
    assert_eq!(graph.total_tasks, 3);
    let host = graph.get("Host-db").unwrap();
    assert_eq!(host.dependants.len(), 2);
}

#[tokio::test]
async fn deploy_runs_predecessors_first() {
    let order: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));

    struct Recording {
        order: Arc<Mutex<Vec<String>>>,
    }

    impl CRUDHandler for Recording {
        fn create<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async move {
                self.order.lock().unwrap().push(ctx.task_id.clone());
                ctx.deployed = true;
                Ok(())
            })
        }
    }

    let compilation = compile(PYRAMID);
    let mut registry = HandlerRegistry::new();
    for name in ["BotRes", "MidRes", "TopRes", "Collector"] {
        let order = order.clone();
        registry.register(name, move || Recording {
            order: order.clone(),
        });
    }

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new().with_parallelism(4).deploy(&graph).await;
    assert!(report.success());

    let order = order.lock().unwrap();
    let position = |id: &str| order.iter().position(|t| t == id).unwrap();
    assert!(position("BotRes-192.168.0.100") < position("MidRes-m1"));
    assert!(position("BotRes-192.168.0.100") < position("MidRes-m2"));
    assert!(position("MidRes-m1") < position("TopRes-t1"));
    assert!(position("MidRes-m2") < position("TopRes-t2"));
    assert!(position("TopRes-t1") < position("Collector-c"));
    assert!(position("TopRes-t2") < position("Collector-c"));
}

#[tokio::test]
async fn second_deploy_is_idempotent() {
    let source = concat!(
        "resource File:\n",
        "    path: str\n",
        "f = File(\"/tmp/x\")\n",
    );
    let compilation = compile(source);
    let mut registry = HandlerRegistry::new();
    let handles = register_counting(&mut registry, &["File"]);

    let graph = export(&compilation, &registry).unwrap();
    let deployer = Deployer::new();

    let first = deployer.deploy(&graph).await;
    assert!(first.success());
    assert_eq!(handles[0].0.create_called.load(Ordering::SeqCst), 1);

    // Unchanged model, correct read: no create, no update.
    let second = deployer.deploy(&graph).await;
    assert!(second.success());
    assert_eq!(handles[0].0.create_called.load(Ordering::SeqCst), 1);
    assert_eq!(handles[0].0.update_called.load(Ordering::SeqCst), 0);
    assert_eq!(handles[0].0.read_called.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn read_changes_drive_update() {
    struct Drifting {
        updated: AtomicBool,
        update_called: AtomicUsize,
    }

    #[derive(Clone)]
    struct DriftingHandle(Arc<Drifting>);

    impl CRUDHandler for DriftingHandle {
        fn read<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async move {
                ctx.deployed = true;
                if !self.0.updated.load(Ordering::SeqCst) {
                    ctx.add_change("mode", Value::str("0644"));
                }
                Ok(())
            })
        }

        fn update<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async move {
                if ctx.changes.get("mode").is_none() {
                    return Err(HandlerError::failed("update without changes"));
                }
                self.0.update_called.fetch_add(1, Ordering::SeqCst);
                self.0.updated.store(true, Ordering::SeqCst);
                ctx.deployed = true;
                ctx.updated = true;
                Ok(())
            })
        }
    }

    let source = concat!(
        "resource File:\n",
        "    path: str\n",
        "f = File(\"/etc/motd\")\n",
    );
    let compilation = compile(source);
    let mut registry = HandlerRegistry::new();
    let handle = DriftingHandle(Arc::new(Drifting {
        updated: AtomicBool::new(false),
        update_called: AtomicUsize::new(0),
    }));
    let cloned = handle.clone();
    registry.register("File", move || cloned.clone());

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new().deploy(&graph).await;
    assert!(report.success());
    assert_eq!(handle.0.update_called.load(Ordering::SeqCst), 1);
    // The change the read discovered is reported on the task.
    let result = &report.results["File-/etc/motd"];
    assert_eq!(result.changes.get("mode"), Some(&Value::str("0644")));
}

#[tokio::test]
async fn failure_cascades_skipped_downstream() {
    struct Failing;
    impl CRUDHandler for Failing {
        fn create<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async { Err(HandlerError::failed("disk on fire")) })
        }
    }

    let compilation = compile(PYRAMID);
    let mut registry = HandlerRegistry::new();
    registry.register("BotRes", || Failing);
    register_counting(&mut registry, &["MidRes", "TopRes", "Collector"]);

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new().deploy(&graph).await;

    assert!(!report.success());
    assert_eq!(
        report.state_of("BotRes-192.168.0.100"),
        Some(TaskState::Failed)
    );
    for id in ["MidRes-m1", "MidRes-m2", "TopRes-t1", "TopRes-t2", "Collector-c"] {
        assert_eq!(report.state_of(id), Some(TaskState::Skipped), "task {id}");
    }
}

const PROMISE_CHAIN: &str = concat!(
    "resource Vm:\n",
    "    name: str\n",
    "    promise ip: str\n",
    "resource App:\n",
    "    name: str\n",
    "    vm_ip: str\n",
    "vm = Vm(\"vm1\")\n",
    "app = App(\"app1\", vm.ip)\n",
);

struct VmHandler;

impl CRUDHandler for VmHandler {
    fn create<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
        Box::pin(async move {
            ctx.resolve_promise("ip", Value::str("10.0.0.7"))
                .map_err(|e| HandlerError::failed(e.to_string()))?;
            ctx.deployed = true;
            Ok(())
        })
    }
}

#[tokio::test]
async fn promises_flow_to_downstream_tasks() {
    struct AppHandler {
        seen: Arc<Mutex<Option<Value>>>,
    }

    impl CRUDHandler for AppHandler {
        fn create<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async move {
                let ip = ctx.property("vm_ip").await?;
                *self.seen.lock().unwrap() = Some(ip);
                ctx.deployed = true;
                Ok(())
            })
        }
    }

    let compilation = compile(PROMISE_CHAIN);
    let seen: Arc<Mutex<Option<Value>>> = Arc::new(Mutex::new(None));
    let mut registry = HandlerRegistry::new();
    registry.register("Vm", || VmHandler);
    let seen_clone = seen.clone();
    registry.register("App", move || AppHandler {
        seen: seen_clone.clone(),
    });

    let graph = export(&compilation, &registry).unwrap();
    // Consuming the promise created a dependency edge.
    assert_eq!(
        graph.get("App-app1").unwrap().depends_on,
        vec!["Vm-vm1".to_string()]
    );

    let report = Deployer::new().deploy(&graph).await;
    assert!(report.success());
    assert_eq!(*seen.lock().unwrap(), Some(Value::str("10.0.0.7")));
}

#[tokio::test]
async fn unfulfilled_own_promise_fails_the_task() {
    struct Forgetful;
    impl CRUDHandler for Forgetful {
        fn create<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async move {
                // Deploys fine but never writes the ip slot.
                ctx.deployed = true;
                Ok(())
            })
        }
    }

    let compilation = compile(PROMISE_CHAIN);
    let mut registry = HandlerRegistry::new();
    registry.register("Vm", || Forgetful);
    register_counting(&mut registry, &["App"]);

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new().deploy(&graph).await;
    assert_eq!(report.state_of("Vm-vm1"), Some(TaskState::Failed));
    assert_eq!(report.state_of("App-app1"), Some(TaskState::Skipped));
}

#[tokio::test]
async fn failed_upstream_fails_promise_waiters() {
    struct Broken;
    impl CRUDHandler for Broken {
        fn create<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async { Err(HandlerError::failed("boot failure")) })
        }
    }

    let compilation = compile(PROMISE_CHAIN);
    let mut registry = HandlerRegistry::new();
    registry.register("Vm", || Broken);
    register_counting(&mut registry, &["App"]);

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new().deploy(&graph).await;
    assert_eq!(report.state_of("Vm-vm1"), Some(TaskState::Failed));
    assert_eq!(report.state_of("App-app1"), Some(TaskState::Skipped));

    // The slot is failed, so any waiter errors instead of hanging.
    let vm = graph.get("Vm-vm1").unwrap();
    let promise = vm.resource.promise("ip").unwrap();
    let waited = promise.wait().await;
    assert!(waited.is_err());
}

#[tokio::test]
async fn dry_run_only_reads() {
    let source = concat!(
        "resource File:\n",
        "    path: str\n",
        "f = File(\"/tmp/y\")\n",
    );
    let compilation = compile(source);
    let mut registry = HandlerRegistry::new();
    let handles = register_counting(&mut registry, &["File"]);

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new().with_dry_run(true).deploy(&graph).await;
    assert!(report.success());
    assert_eq!(handles[0].0.read_called.load(Ordering::SeqCst), 1);
    assert_eq!(handles[0].0.create_called.load(Ordering::SeqCst), 0);
    // The dry run narrates what would happen.
    let logs = &report.results["File-/tmp/y"].logs;
    assert!(logs.iter().any(|l| l.message.contains("would be created")));
}

#[tokio::test]
async fn cleanup_runs_once_per_task_even_when_skipped() {
    struct Failing;
    impl CRUDHandler for Failing {
        fn create<'a>(&'a self, _ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async { Err(HandlerError::failed("nope")) })
        }
    }

    let source = concat!(
        "resource A:\n",
        "    name: str\n",
        "resource B:\n",
        "    name: str\n",
        "    a: A\n",
        "a = A(\"a\")\n",
        "b = B(\"b\", a)\n",
    );
    let compilation = compile(source);
    let mut registry = HandlerRegistry::new();
    registry.register("A", || Failing);
    let handles = register_counting(&mut registry, &["B"]);

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new().deploy(&graph).await;
    assert_eq!(report.state_of("B-b"), Some(TaskState::Skipped));
    // Cleanup ran for the skipped task too, exactly once.
    assert_eq!(handles[0].0.cleanup_called.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn cancellation_skips_pending_tasks() {
    struct Slow;
    impl CRUDHandler for Slow {
        fn create<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_millis(50)).await;
                ctx.deployed = true;
                Ok(())
            })
        }
    }

    let source = concat!(
        "resource A:\n",
        "    name: str\n",
        "resource B:\n",
        "    name: str\n",
        "    a: A\n",
        "a = A(\"a\")\n",
        "b = B(\"b\", a)\n",
    );
    let compilation = compile(source);
    let mut registry = HandlerRegistry::new();
    registry.register("A", || Slow);
    registry.register("B", || Slow);

    let graph = export(&compilation, &registry).unwrap();
    let deployer = Deployer::new();
    let cancel = deployer.cancel_handle();

    let canceller = tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(10)).await;
        cancel.cancel();
    });

    let report = deployer.deploy(&graph).await;
    canceller.await.unwrap();

    assert!(report.cancelled);
    // The in-flight task finished its step; the dependant never started.
    assert_eq!(report.state_of("A-a"), Some(TaskState::Deployed));
    assert_eq!(report.state_of("B-b"), Some(TaskState::Skipped));
}

#[tokio::test]
async fn scratch_dirs_are_keyed_by_task() {
    let dir = tempfile::tempdir().unwrap();

    struct Scratcher;
    impl CRUDHandler for Scratcher {
        fn create<'a>(&'a self, ctx: &'a mut HandlerContext) -> BoxFuture<'a, HandlerResult<()>> {
            Box::pin(async move {
                let scratch = ctx
                    .scratch_dir()
                    .map_err(|e| HandlerError::failed(e.to_string()))?
                    .to_path_buf();
                std::fs::write(scratch.join("state"), b"ok")
                    .map_err(|e| HandlerError::failed(e.to_string()))?;
                ctx.deployed = true;
                Ok(())
            })
        }
    }

    let source = concat!(
        "resource File:\n",
        "    path: str\n",
        "f = File(\"unit\")\n",
    );
    let compilation = compile(source);
    let mut registry = HandlerRegistry::new();
    registry.register("File", || Scratcher);

    let graph = export(&compilation, &registry).unwrap();
    let report = Deployer::new()
        .with_cache_root(dir.path().to_path_buf())
        .deploy(&graph)
        .await;
    assert!(report.success());
    assert!(dir.path().join("File-unit").join("state").is_file());
}
