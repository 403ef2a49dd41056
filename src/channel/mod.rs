//! Channel executor: sequential source processors followed by parallel
//! destinations, with failure-store capture and replay wiring.

mod registry;
mod replay;

pub use registry::ChannelRegistry;

use std::collections::HashMap;
use std::sync::Arc;

use tracing::warn;
use uuid::Uuid;

use crate::domain::{
    Content, Destination, DestinationsFlow, ErrorInfo, Message, MessageContext, Processor,
    ProcessorOutcome,
};
use crate::error::{FabricError, Result};
use crate::listener::{ListenerConfig, StoreListener};
use crate::store::MessageStore;

/// The successful outcome of `execute`/`replay`.
#[derive(Debug, Clone)]
pub struct ExecutionResult {
    /// The message as it stood at the end of the run, including the updated
    /// `skipDestinations` set.
    pub message: Message,
    /// Per-destination results, keyed by destination name. Omits
    /// destinations skipped via `skipDestinations` or a short-circuiting
    /// preprocessor.
    pub destination_results: HashMap<String, Content>,
}

/// Optional failure-handling configuration for a channel.
#[derive(Default)]
pub struct FailureConfig {
    failure_store: Option<Arc<dyn MessageStore>>,
    replay_store: Option<Arc<dyn MessageStore>>,
    replay_listener_config: Option<ListenerConfig>,
    dead_letter_store: Option<Arc<dyn MessageStore>>,
}

impl FailureConfig {
    /// Create an empty configuration (no failure store, no replay wiring).
    pub fn new() -> Self {
        Self::default()
    }

    /// Persist `ExecutionError`s to this store.
    pub fn with_failure_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.failure_store = Some(store);
        self
    }

    /// Poll this store for replay instead of the failure store.
    pub fn with_replay_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.replay_store = Some(store);
        self
    }

    /// Auto-attach a replay listener with this configuration. Its
    /// `max_retries` governs service-layer replay attempts, not the
    /// underlying listener (which always runs with zero retries).
    pub fn with_replay_listener(mut self, config: ListenerConfig) -> Self {
        self.replay_listener_config = Some(config);
        self
    }

    /// Dead-letter store for the auto-attached replay listener.
    pub fn with_dead_letter_store(mut self, store: Arc<dyn MessageStore>) -> Self {
        self.dead_letter_store = Some(store);
        self
    }
}

/// A channel: a named pipeline of source processors feeding parallel
/// destinations, with optional failure capture and replay.
pub struct Channel {
    name: String,
    source_flow: Vec<Processor>,
    destinations_flow: DestinationsFlow,
    failure_store: Option<Arc<dyn MessageStore>>,
    replay_listener: parking_lot::Mutex<Option<Arc<StoreListener>>>,
}

impl Channel {
    /// The channel's unique, registered name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run a fresh message through the channel.
    ///
    /// Assigns a new `id`. `skip_destinations` is honored symmetrically with
    /// `replay`: any named destination is treated as already succeeded for
    /// this run.
    pub async fn execute(
        &self,
        content: Content,
        skip_destinations: Vec<String>,
    ) -> Result<ExecutionResult> {
        let id = Uuid::now_v7().to_string();
        let ctx = MessageContext::new(id, content, skip_destinations);
        let result = self.run(ctx).await;
        if let Err(err) = &result {
            if let Some(message) = err.message() {
                self.persist_failure(message).await;
            }
        }
        result
    }

    /// Replay a previously captured message, honoring its `skipDestinations`
    /// so already-successful destinations are not re-invoked.
    ///
    /// Equivalent to `replay_with(message, true)` — by default a failed
    /// replay is not re-written to the failure store, to avoid an infinite
    /// loop through the replay listener.
    pub async fn replay(&self, message: Message) -> Result<ExecutionResult> {
        self.replay_with(message, true).await
    }

    /// Replay with explicit control over whether a failure is re-persisted.
    pub async fn replay_with(
        &self,
        message: Message,
        skip_failure_store: bool,
    ) -> Result<ExecutionResult> {
        let ctx = MessageContext::from_message(message);
        let result = self.run(ctx).await;
        if !skip_failure_store {
            if let Err(err) = &result {
                if let Some(message) = err.message() {
                    self.persist_failure(message).await;
                }
            }
        }
        result
    }

    /// Stop the auto-attached replay listener, if one is running.
    pub async fn stop_replay_listener(&self) {
        let listener = self.replay_listener.lock().clone();
        if let Some(listener) = listener {
            listener.graceful_stop().await;
        }
    }

    async fn run(&self, ctx: MessageContext) -> Result<ExecutionResult> {
        let ctx = match self.run_source(ctx).await? {
            ProcessorOutcome::ShortCircuit(ctx) => {
                return Ok(ExecutionResult {
                    message: ctx.into_message(),
                    destination_results: HashMap::new(),
                });
            }
            ProcessorOutcome::Continue(ctx) => ctx,
        };
        self.run_destinations(ctx).await
    }

    async fn run_source(&self, mut ctx: MessageContext) -> Result<ProcessorOutcome> {
        for processor in &self.source_flow {
            let snapshot = ctx.snapshot();
            let name = processor.name().to_string();
            let task_processor = processor.clone();
            let task = tokio::spawn(async move { task_processor.invoke(ctx).await });
            ctx = match task.await {
                Ok(Ok(ProcessorOutcome::Continue(ctx))) => ctx,
                Ok(short_circuit @ Ok(ProcessorOutcome::ShortCircuit(_))) => {
                    return Ok(short_circuit.unwrap());
                }
                Ok(Err(message)) => {
                    return Err(FabricError::Processor {
                        handler_name: name,
                        message,
                        failed_message: Box::new(snapshot),
                    });
                }
                Err(join_err) => {
                    return Err(FabricError::Processor {
                        handler_name: name,
                        message: format!("processor panicked: {join_err}"),
                        failed_message: Box::new(snapshot),
                    });
                }
            };
        }
        Ok(ProcessorOutcome::Continue(ctx))
    }

    async fn run_destinations(&self, mut ctx: MessageContext) -> Result<ExecutionResult> {
        let destinations = self
            .destinations_flow
            .resolve(&ctx)
            .await
            .map_err(|message| FabricError::Routing {
                handler_name: "destinationRouter".to_string(),
                message,
            })?;

        let skip = ctx.skip_destinations();
        let mut tasks = Vec::new();
        for destination in destinations {
            if skip.contains(&destination.name().to_string()) {
                continue;
            }
            let local_ctx = ctx.clone();
            tasks.push(tokio::spawn(async move {
                run_one_destination(local_ctx, destination).await
            }));
        }

        let mut successes = HashMap::new();
        let mut failures = HashMap::new();
        for task in tasks {
            match task.await {
                Ok((name, DestinationOutcome::Success(content))) => {
                    successes.insert(name, content);
                }
                Ok((name, DestinationOutcome::Failure(err))) => {
                    failures.insert(name, err);
                }
                Ok((_, DestinationOutcome::SkippedByPreprocessor)) => {}
                Err(join_err) => {
                    warn!(error = %join_err, "destination task panicked");
                }
            }
        }

        for name in successes.keys() {
            ctx.add_skip_destination(name.clone());
        }

        if failures.is_empty() {
            Ok(ExecutionResult {
                message: ctx.to_message(),
                destination_results: successes,
            })
        } else {
            ctx.set_error_info(ErrorInfo::from_destination_failures(&failures));
            Err(FabricError::Destination {
                failures,
                message: Box::new(ctx.to_message()),
            })
        }
    }

    async fn persist_failure(&self, message: &Message) {
        if let Some(store) = &self.failure_store {
            let value = match serde_json::to_value(message) {
                Ok(value) => value,
                Err(err) => {
                    warn!(error = %err, "failed to serialize failure message");
                    return;
                }
            };
            if let Err(err) = store.store(value).await {
                warn!(error = %err, "failed to persist failure message");
            }
        }
    }
}

enum DestinationOutcome {
    Success(Content),
    Failure(String),
    SkippedByPreprocessor,
}

async fn run_one_destination(
    ctx: MessageContext,
    destination: Destination,
) -> (String, DestinationOutcome) {
    let name = destination.name().to_string();
    let mut local_ctx = ctx;
    for preprocessor in destination.preprocessors() {
        match preprocessor.invoke(local_ctx).await {
            Ok(ProcessorOutcome::Continue(ctx)) => local_ctx = ctx,
            Ok(ProcessorOutcome::ShortCircuit(_)) => {
                return (name, DestinationOutcome::SkippedByPreprocessor)
            }
            Err(err) => return (name, DestinationOutcome::Failure(err)),
        }
    }
    match destination.invoke(local_ctx).await {
        Ok(content) => (name, DestinationOutcome::Success(content)),
        Err(err) => (name, DestinationOutcome::Failure(err)),
    }
}

/// Builds and registers a [`Channel`].
pub struct ChannelBuilder {
    name: String,
    source_flow: Vec<Processor>,
    destinations_flow: Option<DestinationsFlow>,
    failure_config: FailureConfig,
}

impl ChannelBuilder {
    /// Start building a channel with the given (eventually unique) name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            source_flow: Vec::new(),
            destinations_flow: None,
            failure_config: FailureConfig::default(),
        }
    }

    /// Append one source processor.
    pub fn source(mut self, processor: Processor) -> Self {
        self.source_flow.push(processor);
        self
    }

    /// Replace the whole source flow.
    pub fn source_flow(mut self, processors: Vec<Processor>) -> Self {
        self.source_flow = processors;
        self
    }

    /// Set a single destination.
    pub fn destination(mut self, destination: Destination) -> Self {
        self.destinations_flow = Some(DestinationsFlow::Single(destination));
        self
    }

    /// Set a fixed set of destinations.
    pub fn destinations(mut self, destinations: Vec<Destination>) -> Self {
        self.destinations_flow = Some(DestinationsFlow::Many(destinations));
        self
    }

    /// Set a destination router.
    pub fn destinations_flow(mut self, flow: DestinationsFlow) -> Self {
        self.destinations_flow = Some(flow);
        self
    }

    /// Attach failure/replay configuration.
    pub fn failure_config(mut self, config: FailureConfig) -> Self {
        self.failure_config = config;
        self
    }

    /// Validate, register and return the channel.
    ///
    /// Fails with `FabricError::Config` on an empty source flow, a missing
    /// destinations flow, an empty handler name, a duplicate handler name
    /// within the channel, or a channel name already present in the
    /// [`ChannelRegistry`].
    pub fn build(self) -> Result<Arc<Channel>> {
        if self.name.is_empty() {
            return Err(FabricError::Config("channel name must not be empty".into()));
        }
        if self.source_flow.is_empty() {
            return Err(FabricError::Config(
                "source flow must contain at least one processor".into(),
            ));
        }
        let Some(destinations_flow) = self.destinations_flow else {
            return Err(FabricError::Config(
                "destinations flow must be configured".into(),
            ));
        };

        let mut seen_names = std::collections::HashSet::new();
        for processor in &self.source_flow {
            if processor.name().is_empty() {
                return Err(FabricError::Config(
                    "every processor must have a non-empty name".into(),
                ));
            }
            if !seen_names.insert(processor.name().to_string()) {
                return Err(FabricError::Config(format!(
                    "duplicate handler name {:?}",
                    processor.name()
                )));
            }
        }
        if let DestinationsFlow::Many(destinations) = &destinations_flow {
            for destination in destinations {
                if destination.name().is_empty() {
                    return Err(FabricError::Config(
                        "every destination must have a non-empty name".into(),
                    ));
                }
                if !seen_names.insert(destination.name().to_string()) {
                    return Err(FabricError::Config(format!(
                        "duplicate handler name {:?}",
                        destination.name()
                    )));
                }
            }
        }

        let channel = Arc::new(Channel {
            name: self.name,
            source_flow: self.source_flow,
            destinations_flow,
            failure_store: self.failure_config.failure_store.clone(),
            replay_listener: parking_lot::Mutex::new(None),
        });
        ChannelRegistry::register(Arc::clone(&channel))?;

        if let Some(listener_config) = self.failure_config.replay_listener_config {
            let target_store = self
                .failure_config
                .replay_store
                .or_else(|| self.failure_config.failure_store.clone());
            match target_store {
                Some(store) => {
                    let listener = replay::wire(
                        Arc::clone(&channel),
                        store,
                        listener_config,
                        self.failure_config.dead_letter_store,
                    );
                    *channel.replay_listener.lock() = Some(listener);
                }
                None => warn!(
                    channel = %channel.name,
                    "replay listener configured but neither a replay store nor a failure store was set; skipping"
                ),
            }
        }

        Ok(channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as SyncMutex;
    use serde_json::json;
    use serial_test::serial;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn upper_transform() -> Processor {
        Processor::transform("upper", |mut ctx| async move {
            if let Some(s) = ctx.content().as_str() {
                let upper = s.to_uppercase();
                ctx.set_content(json!(upper));
            }
            Ok(ctx)
        })
    }

    #[serial]
    #[tokio::test]
    async fn s1_happy_path() {
        ChannelRegistry::reset();
        let sink: Arc<SyncMutex<Vec<Content>>> = Arc::new(SyncMutex::new(Vec::new()));
        let sink_clone = sink.clone();
        let channel = ChannelBuilder::new("s1")
            .source(upper_transform())
            .destination(Destination::new("sink", move |ctx| {
                let sink = sink_clone.clone();
                async move {
                    sink.lock().push(ctx.content().clone());
                    Ok(ctx.content().clone())
                }
            }))
            .build()
            .unwrap();

        let result = channel.execute(json!("hello"), vec![]).await.unwrap();
        assert_eq!(
            result.destination_results.get("sink"),
            Some(&json!("HELLO"))
        );
    }

    #[serial]
    #[tokio::test]
    async fn s2_partial_failure_then_replay_skips_succeeded_destination() {
        ChannelRegistry::reset();
        let a_calls = Arc::new(AtomicUsize::new(0));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let a_calls_clone = a_calls.clone();
        let b_calls_clone = b_calls.clone();

        let channel = ChannelBuilder::new("s2")
            .source(Processor::generic("noop", |ctx| async move { Ok(ctx) }))
            .destinations(vec![
                Destination::new("A", move |ctx| {
                    let calls = a_calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(ctx.content().clone())
                    }
                }),
                Destination::new("B", move |ctx| {
                    let calls = b_calls_clone.clone();
                    async move {
                        let n = calls.fetch_add(1, Ordering::SeqCst);
                        if n == 0 {
                            Err("not yet".to_string())
                        } else {
                            Ok(ctx.content().clone())
                        }
                    }
                }),
            ])
            .build()
            .unwrap();

        let err = channel.execute(json!("x"), vec![]).await.unwrap_err();
        let message = err.message().unwrap().clone();
        assert_eq!(message.skip_destinations(), vec!["A".to_string()]);

        let result = channel.replay(message).await.unwrap();
        assert!(result.destination_results.contains_key("B"));
        assert_eq!(a_calls.load(Ordering::SeqCst), 1);
        assert_eq!(b_calls.load(Ordering::SeqCst), 2);
    }

    #[serial]
    #[tokio::test]
    async fn filter_false_short_circuits_with_no_destination_calls() {
        ChannelRegistry::reset();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let channel = ChannelBuilder::new("filter-channel")
            .source(Processor::filter("reject-all", |ctx| async move {
                Ok((ctx, false))
            }))
            .destination(Destination::new("sink", move |ctx| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ctx.content().clone())
                }
            }))
            .build()
            .unwrap();

        let result = channel.execute(json!("x"), vec![]).await.unwrap();
        assert!(result.destination_results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[serial]
    #[tokio::test]
    async fn skip_destinations_on_execute_blocks_first_run() {
        ChannelRegistry::reset();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let channel = ChannelBuilder::new("skip-on-execute")
            .source(Processor::generic("noop", |ctx| async move { Ok(ctx) }))
            .destination(Destination::new("A", move |ctx| {
                let calls = calls_clone.clone();
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(ctx.content().clone())
                }
            }))
            .build()
            .unwrap();

        let result = channel
            .execute(json!("x"), vec!["A".to_string()])
            .await
            .unwrap();
        assert!(result.destination_results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[serial]
    #[tokio::test]
    async fn s6_duplicate_channel_name_is_a_config_error() {
        ChannelRegistry::reset();
        let build = || {
            ChannelBuilder::new("dup")
                .source(Processor::generic("noop", |ctx| async move { Ok(ctx) }))
                .destination(Destination::new("sink", |ctx| async move {
                    Ok(ctx.content().clone())
                }))
                .build()
        };
        build().unwrap();
        assert!(build().is_err());
    }

    #[serial]
    #[tokio::test]
    async fn empty_source_flow_is_a_config_error() {
        ChannelRegistry::reset();
        let result = ChannelBuilder::new("empty-source")
            .destination(Destination::new("sink", |ctx| async move {
                Ok(ctx.content().clone())
            }))
            .build();
        assert!(result.is_err());
    }

    #[serial]
    #[tokio::test]
    async fn panicking_source_processor_surfaces_as_processor_error_not_a_panic() {
        ChannelRegistry::reset();
        let channel = ChannelBuilder::new("panicking-source")
            .source(Processor::generic("boom", |_ctx| async move {
                panic!("source processor exploded")
            }))
            .destination(Destination::new("sink", |ctx| async move {
                Ok(ctx.content().clone())
            }))
            .build()
            .unwrap();

        let err = channel.execute(json!("x"), vec![]).await.unwrap_err();
        match err {
            FabricError::Processor { handler_name, .. } => assert_eq!(handler_name, "boom"),
            other => panic!("expected FabricError::Processor, got {other:?}"),
        }
    }

    #[serial]
    #[tokio::test]
    async fn preprocessor_short_circuit_skips_destination_without_failing_run() {
        ChannelRegistry::reset();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        let gate = Processor::filter("gate", |ctx| async move { Ok((ctx, false)) });
        let channel = ChannelBuilder::new("preproc-skip")
            .source(Processor::generic("noop", |ctx| async move { Ok(ctx) }))
            .destination(
                Destination::new("sink", move |ctx| {
                    let calls = calls_clone.clone();
                    async move {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok(ctx.content().clone())
                    }
                })
                .with_preprocessors(vec![gate]),
            )
            .build()
            .unwrap();

        let result = channel.execute(json!("x"), vec![]).await.unwrap();
        assert!(result.destination_results.is_empty());
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(result.message.skip_destinations().is_empty());
    }

    #[serial]
    #[tokio::test]
    async fn replay_convergence_within_bounded_attempts() {
        ChannelRegistry::reset();
        let b_calls = Arc::new(AtomicUsize::new(0));
        let b_calls_clone = b_calls.clone();
        let channel = ChannelBuilder::new("replay-convergence")
            .source(Processor::generic("noop", |ctx| async move { Ok(ctx) }))
            .destination(Destination::new("B", move |ctx| {
                let calls = b_calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n < 2 {
                        Err("not yet".to_string())
                    } else {
                        Ok(ctx.content().clone())
                    }
                }
            }))
            .build()
            .unwrap();

        let err = channel.execute(json!("x"), vec![]).await.unwrap_err();
        let mut message = err.message().unwrap().clone();
        let mut attempts = 1;
        loop {
            match channel.replay(message.clone()).await {
                Ok(_) => break,
                Err(err) => {
                    message = err.message().unwrap().clone();
                    attempts += 1;
                }
            }
            assert!(attempts <= 3, "did not converge within bound");
        }
        assert_eq!(b_calls.load(Ordering::SeqCst), 3);
    }

    #[serial]
    #[tokio::test]
    async fn replay_auto_wiring_reprocesses_failure_store_entries() {
        ChannelRegistry::reset();
        let failure_store: Arc<dyn MessageStore> = Arc::new(crate::store::InMemoryStore::new(
            crate::store::StoreOrder::Fifo,
        ));
        let b_calls = Arc::new(AtomicUsize::new(0));
        let b_calls_clone = b_calls.clone();
        let channel = ChannelBuilder::new("auto-replay")
            .source(Processor::generic("noop", |ctx| async move { Ok(ctx) }))
            .destination(Destination::new("B", move |ctx| {
                let calls = b_calls_clone.clone();
                async move {
                    let n = calls.fetch_add(1, Ordering::SeqCst);
                    if n == 0 {
                        Err("not yet".to_string())
                    } else {
                        Ok(ctx.content().clone())
                    }
                }
            }))
            .failure_config(
                FailureConfig::new()
                    .with_failure_store(failure_store.clone())
                    .with_replay_listener(
                        ListenerConfig::new()
                            .with_polling_interval(Duration::from_millis(5))
                            .with_max_retries(3)
                            .with_retry_interval(Duration::from_millis(5)),
                    ),
            )
            .build()
            .unwrap();

        channel.execute(json!("x"), vec![]).await.unwrap_err();
        tokio::time::sleep(Duration::from_millis(100)).await;
        channel.stop_replay_listener().await;
        assert_eq!(b_calls.load(Ordering::SeqCst), 2);
    }
}
