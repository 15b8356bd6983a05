//! Routes exchanges through an advised pipeline and logs a summary.

use std::sync::Arc;
use std::time::{Duration, Instant};

use clap::Parser;
use switchyard_core::{processor_fn, Exchange, NodeDefinition, Processor, RouteContext, Value};
use switchyard_engine::advices::{
    BacklogTracer, DefaultInflightRepository, DefaultMessageHistoryFactory,
    DefaultStreamCachingStrategy, DelayAdvice, DelayCancel, InflightAdvice, InflightRepository,
    MessageHistoryAdvice, MessageHistoryFactory, RouteLifecycleAdvice, StreamCachingAdvice, TracerAdvice,
    UnitOfWorkAdvice,
};
use switchyard_engine::config::TracerConfig;
use switchyard_engine::{
    AdviceChainExecutor, BeforeFailurePolicy, DefaultUnitOfWorkFactory, EngineConfig,
    EngineContext, ExecutorService, Instrumented, Pipeline, Scheduler, ShutdownController,
    ShutdownStrategy, TrampolineScheduler, WorkerScheduler,
};
use tower::{Service, ServiceExt};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "route-demo", about = "Route exchanges through an advised pipeline")]
struct Args {
    /// Number of steps in the pipeline.
    #[arg(long, env = "SWITCHYARD_STEPS", default_value_t = 10)]
    steps: usize,

    /// Number of exchanges to route.
    #[arg(long, env = "SWITCHYARD_EXCHANGES", default_value_t = 100)]
    exchanges: usize,

    /// Route exchanges as transacted (inline dispatch).
    #[arg(long, env = "SWITCHYARD_TRANSACTED")]
    transacted: bool,

    /// Run `after` for advices whose `before` succeeded when a later `before` fails.
    #[arg(long, env = "SWITCHYARD_UNWIND")]
    unwind: bool,

    /// Run post-dispatch work on a tokio worker instead of the trampoline.
    #[arg(long, env = "SWITCHYARD_WORKER")]
    worker: bool,

    /// Enable the backlog tracer.
    #[arg(long, env = "SWITCHYARD_TRACE")]
    trace: bool,

    /// Delay before each route, in milliseconds.
    #[arg(long, env = "SWITCHYARD_DELAY_MS")]
    delay_ms: Option<u64>,

    /// Emit logs as JSON.
    #[arg(long, env = "SWITCHYARD_LOG_JSON")]
    log_json: bool,
}

fn init_tracing(json: bool) {
    let filter = tracing_subscriber::EnvFilter::try_from_env("SWITCHYARD_LOG")
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn engine_config(args: &Args) -> EngineConfig {
    EngineConfig {
        name: "route-demo".to_string(),
        before_failure_policy: if args.unwind {
            BeforeFailurePolicy::Unwind
        } else {
            BeforeFailurePolicy::SkipAfter
        },
        tracer: TracerConfig {
            backlog_size: args.steps.saturating_add(1).saturating_mul(args.exchanges).max(1),
            ..TracerConfig::default()
        },
        delay: args.delay_ms.map(Duration::from_millis),
        ..EngineConfig::default()
    }
}

/// Increments the `hops` header.
fn hop() -> Arc<dyn Processor> {
    Arc::new(processor_fn(|exchange: &Exchange| {
        exchange.with_in(|m| {
            let hops = m.headers.get("hops").and_then(Value::as_int).unwrap_or(0);
            m.headers.insert("hops".to_string(), Value::Int(hops + 1));
        });
        Ok(())
    }))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing(args.log_json);

    let config = engine_config(&args);
    let controller = Arc::new(ShutdownController::new());
    let worker = args.worker.then(|| Arc::new(WorkerScheduler::start()));
    let scheduler: Arc<dyn Scheduler> = match &worker {
        Some(worker) => Arc::clone(worker) as Arc<dyn Scheduler>,
        None => Arc::new(TrampolineScheduler::new()),
    };
    let ctx = EngineContext::new(
        config,
        Arc::clone(&controller) as Arc<dyn ShutdownStrategy>,
        scheduler,
    );

    let route = RouteContext::new("demo").with_description("route-demo");
    let inflight = Arc::new(DefaultInflightRepository::new());
    let tracer = Arc::new(BacklogTracer::new(ctx.config.tracer.clone()));
    tracer.set_enabled(args.trace);
    let history: Arc<dyn MessageHistoryFactory> = Arc::new(DefaultMessageHistoryFactory);

    let steps: Vec<Arc<dyn Processor>> = (0..args.steps)
        .map(|i| {
            let node = NodeDefinition::new(format!("hop-{i}"), route.route_id.clone());
            let executor = AdviceChainExecutor::new(format!("demo/hop-{i}"), Some(hop()), &ctx)
                .with_advice(MessageHistoryAdvice::new(Arc::clone(&history), node.clone()))
                .with_advice(TracerAdvice::new(Arc::clone(&tracer), node, i == 0));
            Arc::new(executor) as Arc<dyn Processor>
        })
        .collect();
    let pipeline: Arc<dyn Processor> = Arc::new(Pipeline::new("demo", steps, &ctx));

    let delay_cancel = Arc::new(DelayCancel::new());
    let mut route_executor = AdviceChainExecutor::new("demo", Some(pipeline), &ctx);
    route_executor
        .add_advice(Instrumented::new(UnitOfWorkAdvice::new(
            Some(route.clone()),
            Arc::new(DefaultUnitOfWorkFactory),
        )))
        .add_advice(InflightAdvice::new(
            Arc::clone(&inflight) as Arc<dyn InflightRepository>,
            route.route_id.clone(),
        ))
        .add_advice(RouteLifecycleAdvice::new(route.clone()))
        .add_advice(StreamCachingAdvice::new(Arc::new(
            DefaultStreamCachingStrategy::new(ctx.config.stream_caching.clone()),
        )));
    if let Some(delay) = ctx.config.delay {
        route_executor.add_advice(DelayAdvice::new(delay, Arc::clone(&delay_cancel)));
    }
    tracing::info!(
        route = %route,
        chain = ?route_executor.chain().names(),
        steps = args.steps,
        "route assembled"
    );

    let service = ExecutorService::new(Arc::new(route_executor));
    controller.set_running();

    let started = Instant::now();
    let mut failed = 0_usize;
    let mut last_hops = None;
    for _ in 0..args.exchanges {
        let exchange = Exchange::with_body(Value::from("payload"));
        exchange.set_transacted(args.transacted);
        let mut ready = service.clone();
        ServiceExt::<Exchange>::ready(&mut ready).await?;
        // Dispatch may block (transacted steps, delays); keep it off the runtime threads.
        let pending = tokio::task::spawn_blocking(move || ready.call(exchange)).await?;
        let exchange = pending.await?;
        if let Some(err) = exchange.error() {
            failed += 1;
            tracing::warn!(exchange_id = %exchange.id(), error = %err, "exchange failed");
        }
        last_hops = exchange.with_in(|m| m.headers.get("hops").and_then(Value::as_int));
    }
    let elapsed = started.elapsed();

    controller.trigger_shutdown();
    delay_cancel.cancel();
    let drained = controller
        .wait_for_drain(inflight.as_ref(), Duration::from_secs(5))
        .await;
    if let Some(worker) = worker {
        worker.stop().await;
    }

    tracing::info!(
        exchanges = args.exchanges,
        failed,
        hops = ?last_hops,
        traced = tracer.backlog_len(),
        drained,
        elapsed_ms = elapsed.as_millis(),
        "routing complete"
    );
    Ok(())
}
