//! Breaker, retry and deadline behaviour seen through the engine.

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use mnemo_adapters::{
    Adapter, AdapterError, AdapterResult, AnalyzerOperation, Context, Experience, GraphAdapter,
    InMemoryGraph, KeywordAnalyzer, Memory, OperationAdapter, OperationConfig, ReflectOutcome,
    Task,
};
use mnemo_core::{Adapters, BreakerState, EngineConfig, EngineError, MemoryEngine};

/// How a scripted operation adapter misbehaves.
#[derive(Clone, Copy)]
enum Script {
    Sleep(Duration),
    FailFirst(u32),
    /// Fail the first `n` calls, hang on the next one, then behave.
    FailThenHang(u32),
    RejectInput,
}

struct ScriptedOperation {
    inner: AnalyzerOperation,
    script: Script,
    calls: AtomicU32,
}

impl ScriptedOperation {
    fn new(script: Script) -> Self {
        Self {
            inner: AnalyzerOperation::new(
                &OperationConfig::default(),
                Arc::new(KeywordAnalyzer::new()),
            )
            .unwrap(),
            script,
            calls: AtomicU32::new(0),
        }
    }

    async fn before_call(&self) -> AdapterResult<()> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        match self.script {
            Script::Sleep(d) => {
                tokio::time::sleep(d).await;
                Ok(())
            }
            Script::FailFirst(k) if n < k => Err(AdapterError::internal("operation", "flaky")),
            Script::FailFirst(_) => Ok(()),
            Script::FailThenHang(k) if n < k => {
                Err(AdapterError::internal("operation", "backend down"))
            }
            Script::FailThenHang(k) if n == k => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(())
            }
            Script::FailThenHang(_) => Ok(()),
            Script::RejectInput => Err(AdapterError::invalid_input("operation", "rejected")),
        }
    }
}

impl Adapter for ScriptedOperation {
    fn name(&self) -> &str {
        "operation"
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[async_trait]
impl OperationAdapter for ScriptedOperation {
    async fn retain(&self, experience: &Experience, context: &Context) -> AdapterResult<Memory> {
        self.before_call().await?;
        self.inner.retain(experience, context).await
    }

    async fn reflect(
        &self,
        memories: &[Memory],
        task: &Task,
        context: &Context,
    ) -> AdapterResult<ReflectOutcome> {
        self.before_call().await?;
        self.inner.reflect(memories, task, context).await
    }
}

fn engine_with_operation(
    operation: Arc<ScriptedOperation>,
    config: &EngineConfig,
) -> MemoryEngine {
    let mut adapters = Adapters::in_memory(Arc::new(KeywordAnalyzer::new())).unwrap();
    adapters.operation = operation as Arc<dyn OperationAdapter>;
    MemoryEngine::with_adapters(adapters, config).unwrap()
}

fn experience(text: &str) -> Experience {
    Experience::new(text)
}

// -------------------------------------------------------------------------
// Deadlines
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_slow_operation_times_out() {
    let mut config = EngineConfig::default();
    config.orchestrator.operation_timeout_ms = 100;
    let op = Arc::new(ScriptedOperation::new(Script::Sleep(Duration::from_secs(5))));
    let engine = engine_with_operation(op, &config);

    let err = engine
        .retain(&experience("Slow analysis"), &Context::default(), None)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert!(matches!(err, EngineError::Retain(_)));
    assert_eq!(engine.metrics().operations["retain"].failure_count, 1);
}

#[tokio::test(start_paused = true)]
async fn test_waiting_for_a_slot_counts_toward_deadline() {
    let mut config = EngineConfig::default();
    config.orchestrator.max_concurrent_operations = 1;
    config.orchestrator.operation_timeout_ms = 500;
    let op = Arc::new(ScriptedOperation::new(Script::Sleep(Duration::from_millis(300))));
    let engine = engine_with_operation(op, &config);
    let ctx = Context::default();

    let first_exp = experience("First in line");
    let second_exp = experience("Second in line");
    let (first, second) = tokio::join!(
        engine.retain(&first_exp, &ctx, None),
        engine.retain(&second_exp, &ctx, None),
    );
    assert!(first.is_ok());
    assert!(second.unwrap_err().is_timeout());
}

// -------------------------------------------------------------------------
// Retry
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_transient_failure_is_retried() {
    let op = Arc::new(ScriptedOperation::new(Script::FailFirst(2)));
    let engine = engine_with_operation(Arc::clone(&op), &EngineConfig::default());

    let m = engine
        .retain(&experience("Retried until it worked"), &Context::default(), None)
        .await
        .unwrap();
    assert_eq!(m.content, "Retried until it worked");
    assert_eq!(op.calls.load(Ordering::SeqCst), 3);

    let operation = engine
        .health_check()
        .adapters
        .into_iter()
        .find(|a| a.name == "operation")
        .unwrap();
    assert_eq!(operation.breaker, BreakerState::Closed);
}

#[tokio::test]
async fn test_bad_input_is_not_retried_and_keeps_breaker_closed() {
    let mut config = EngineConfig::default();
    config.resilience.failure_threshold = 1;
    let op = Arc::new(ScriptedOperation::new(Script::RejectInput));
    let engine = engine_with_operation(Arc::clone(&op), &config);

    for _ in 0..3 {
        let err = engine
            .retain(&experience("Never accepted"), &Context::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Retain(_)));
    }
    assert_eq!(op.calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.adapters().operation.breaker_state(), BreakerState::Closed);
}

// -------------------------------------------------------------------------
// Circuit breaker
// -------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_graph_breaker_opens_and_recovers() {
    let mut config = EngineConfig::default();
    config.resilience.failure_threshold = 2;
    config.resilience.max_retries = 0;
    config.resilience.recovery_timeout_ms = 1_000;

    let graph = Arc::new(InMemoryGraph::new());
    let mut adapters = Adapters::in_memory(Arc::new(KeywordAnalyzer::new())).unwrap();
    adapters.graph = Arc::clone(&graph) as Arc<dyn GraphAdapter>;
    let engine = MemoryEngine::with_adapters(adapters, &config).unwrap();
    let ctx = Context::session("s1");
    engine
        .retain(&experience("Coffee beans arrive on Monday"), &ctx, None)
        .await
        .unwrap();

    graph.set_available(false);
    // Distinct queries so the cache never short-circuits the graph strategy.
    for query in ["coffee", "coffee beans"] {
        assert!(!engine.recall(query, Some(&ctx), None, 5).await.unwrap().is_empty());
    }
    assert_eq!(engine.adapters().graph.breaker_state(), BreakerState::Open);

    graph.set_available(true);
    let health = engine.health_check();
    assert!(!health.adapter("graph").unwrap().available);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    assert_eq!(engine.adapters().graph.breaker_state(), BreakerState::HalfOpen);

    engine
        .recall("beans monday", Some(&ctx), None, 5)
        .await
        .unwrap();
    assert_eq!(engine.adapters().graph.breaker_state(), BreakerState::Closed);
    assert!(engine.health_check().adapter("graph").unwrap().available);
}

#[tokio::test(start_paused = true)]
async fn test_breaker_recovers_after_trial_call_hits_operation_deadline() {
    let mut config = EngineConfig::default();
    config.resilience.failure_threshold = 1;
    config.resilience.max_retries = 0;
    config.resilience.recovery_timeout_ms = 1_000;
    config.orchestrator.operation_timeout_ms = 200;
    let op = Arc::new(ScriptedOperation::new(Script::FailThenHang(1)));
    let engine = engine_with_operation(Arc::clone(&op), &config);
    let ctx = Context::default();

    assert!(engine.retain(&experience("First attempt"), &ctx, None).await.is_err());
    assert_eq!(engine.adapters().operation.breaker_state(), BreakerState::Open);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    let err = engine
        .retain(&experience("Trial that hangs"), &ctx, None)
        .await
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(engine.adapters().operation.breaker_state(), BreakerState::Open);

    tokio::time::advance(Duration::from_millis(1_001)).await;
    engine
        .retain(&experience("Backend is healthy again"), &ctx, None)
        .await
        .unwrap();
    assert_eq!(op.calls.load(Ordering::SeqCst), 3);
    assert_eq!(engine.adapters().operation.breaker_state(), BreakerState::Closed);
    assert!(engine.health_check().adapter("operation").unwrap().available);
}
