use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Value, json};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::sync::watch;
use tokio::time::{Duration, sleep};
use tracing::info;
use tracing_subscriber::EnvFilter;

use loom_core::domain::Continuation;
use loom_core::impls::{HandlerRegistry, InMemoryJobStore};
use loom_core::ports::{ActivityHandler, JobStore};
use loom_core::{
    Activity, ActivityError, EngineBuilder, EngineConfig, ExceptionFilter, JobId, JobStatus,
    QueueConfiguration,
};

/// RUST_LOG で制御、デフォルトは info
fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

#[derive(Debug, Deserialize)]
struct GreetArgs {
    name: String,
}

/// 最初の数回はわざと失敗する
struct GreetHandler {
    remaining_failures: AtomicU32,
}

impl GreetHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl ActivityHandler for GreetHandler {
    async fn invoke(&self, method: &str, arguments: &[Value]) -> Result<Option<Activity>, ActivityError> {
        let args: GreetArgs = serde_json::from_value(arguments.first().cloned().unwrap_or(Value::Null))?;

        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(format!("intentional failure (left={left})").into());
        }

        match method {
            "hello" => println!("Hello, {}!", args.name),
            "bye" => println!("Bye, {}!", args.name),
            other => return Err(format!("unknown method {other}").into()),
        }
        Ok(None)
    }
}

/// 注文を受けて、梱包と発送を子 activity として返す
struct OrderHandler;

#[async_trait]
impl ActivityHandler for OrderHandler {
    async fn invoke(&self, _method: &str, arguments: &[Value]) -> Result<Option<Activity>, ActivityError> {
        let order = arguments.first().cloned().unwrap_or(Value::Null);
        println!("order accepted: {order}");
        let ship = Activity::run("warehouse", "ship", vec![order.clone()])
            .with_exception_filter(ExceptionFilter::new("ops", "record_failure"))
            .on_failed(Activity::run("ops", "refund", vec![order.clone()]))
            .continue_after_handling_failure();
        Ok(Some(
            Activity::sequence(vec![Activity::run("warehouse", "pack", vec![order]), ship])
                .then(Activity::run("ops", "close_order", vec![json!(42)])),
        ))
    }
}

struct WarehouseHandler;

#[async_trait]
impl ActivityHandler for WarehouseHandler {
    async fn invoke(&self, method: &str, arguments: &[Value]) -> Result<Option<Activity>, ActivityError> {
        match method {
            "pack" => {
                let order = arguments.first().ok_or("pack needs an order")?;
                println!("packing {order}");
            }
            "ship" => return Err("carrier unreachable".into()),
            other => return Err(format!("unknown method {other}").into()),
        }
        Ok(None)
    }
}

/// exception filter と失敗ハンドラ
struct OpsHandler;

#[async_trait]
impl ActivityHandler for OpsHandler {
    async fn invoke(&self, method: &str, arguments: &[Value]) -> Result<Option<Activity>, ActivityError> {
        println!("[ops] {method}: {}", Value::Array(arguments.to_vec()));
        Ok(None)
    }
}

fn default_config() -> EngineConfig {
    EngineConfig::default()
        .with_default_queue(QueueConfiguration::default().with_retry(2, std::time::Duration::from_millis(200)))
        .with_activity(
            "greet",
            QueueConfiguration::default()
                .with_max_workers(2)
                .with_retry(3, std::time::Duration::from_millis(100)),
        )
        .with_retry_timer_interval(std::time::Duration::from_millis(100))
}

fn load_config() -> Result<EngineConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => Ok(EngineConfig::from_json_str(&std::fs::read_to_string(path)?)?),
        None => Ok(default_config()),
    }
}

fn demo_activity() -> Activity {
    Activity::parallel(vec![
        Activity::run("greet", "hello", vec![json!({ "name": "alice" })]),
        Activity::sequence(vec![
            Activity::run("greet", "hello", vec![json!({ "name": "bob" })]),
            Activity::run("order", "place", vec![json!({ "id": 42, "item": "loom" })]),
        ]),
    ])
    .on_any_failed(Activity::run("ops", "page", vec![json!("demo tree had a failure")]))
    .then(Activity::run("greet", "bye", vec![json!({ "name": "everyone" })]))
}

async fn print_tree(store: &dyn JobStore, node: &Continuation, depth: usize) -> Result<(), Box<dyn Error>> {
    let indent = "  ".repeat(depth);
    match node.id {
        Some(id) => {
            let job = store.load(id).await?.ok_or("job missing from store")?;
            println!(
                "{indent}- {}.{} [{}] dispatches={}",
                job.job_type, job.method, job.status, job.dispatch_count
            );
            if let Some(children) = &job.continuation {
                Box::pin(print_tree(store, children, depth + 1)).await?;
            }
        }
        None => println!("{indent}- {:?}", node.kind),
    }
    for child in &node.children {
        Box::pin(print_tree(store, child, depth + 1)).await?;
    }
    for (label, branch) in [
        ("on_any_failed", &node.on_any_failed),
        ("on_all_failed", &node.on_all_failed),
        ("next", &node.next),
    ] {
        if let Some(branch) = branch {
            println!("{indent}  {label}:");
            Box::pin(print_tree(store, branch, depth + 2)).await?;
        }
    }
    Ok(())
}

async fn wait_until_terminal(store: &dyn JobStore, id: JobId) -> Result<JobStatus, Box<dyn Error>> {
    loop {
        let job = store.load(id).await?.ok_or("root job missing from store")?;
        if job.status.is_terminal() {
            return Ok(job.status);
        }
        sleep(Duration::from_millis(50)).await;
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    // (A) Store と handler を用意
    let store = Arc::new(InMemoryJobStore::new());
    let mut registry = HandlerRegistry::new();
    registry.register("greet", Arc::new(GreetHandler::new(2)))?;
    registry.register("order", Arc::new(OrderHandler))?;
    registry.register("warehouse", Arc::new(WarehouseHandler))?;
    registry.register("ops", Arc::new(OpsHandler))?;

    // (B) engine を構築して起動
    let scheduler = Arc::new(
        EngineBuilder::new(load_config()?)
            .store(store.clone())
            .resolver(Arc::new(registry))
            .build()
            .await?,
    );
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let running = {
        let scheduler = scheduler.clone();
        tokio::spawn(async move { scheduler.start(shutdown_rx).await })
    };

    // (C) activity tree を投入
    let root_id = scheduler
        .schedule(demo_activity(), Some("demo-order-42".to_string()))
        .await?;
    info!(%root_id, "scheduled demo tree");

    // (D) root が終わるまで待って、tree を表示
    let status = wait_until_terminal(store.as_ref(), root_id).await?;
    println!("root {root_id} finished as {status}");
    for (queue, stats) in scheduler.queue_stats().await {
        println!("queue {queue}: {stats:?}");
    }
    if let Some(tree) = store.get(root_id).and_then(|root| root.continuation) {
        print_tree(store.as_ref(), &tree, 0).await?;
    }

    let _ = shutdown_tx.send(true);
    running.await??;
    Ok(())
}
