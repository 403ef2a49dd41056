//! Handler kinds: the sealed variants a channel's source flow and
//! destinations flow are built from.
//!
//! Every processor/destination/router is constructed with a mandatory,
//! unique `name` — there is no runtime annotation discovery; registration is
//! always explicit (see [`crate::channel::ChannelBuilder`]).

use std::{future::Future, pin::Pin, sync::Arc};

use super::context::MessageContext;
use super::message::Content;

/// A boxed, owned future returned by a handler closure.
///
/// Handler closures take ownership of the [`MessageContext`] rather than
/// borrowing it, so the returned future has no lifetime tied to the
/// argument — this keeps handler construction free of higher-rank trait
/// bound gymnastics.
pub type HandlerFuture<T> = Pin<Box<dyn Future<Output = Result<T, String>> + Send>>;

type GenericFn = Arc<dyn Fn(MessageContext) -> HandlerFuture<MessageContext> + Send + Sync>;
type FilterFn = Arc<dyn Fn(MessageContext) -> HandlerFuture<(MessageContext, bool)> + Send + Sync>;
type TransformFn = Arc<dyn Fn(MessageContext) -> HandlerFuture<MessageContext> + Send + Sync>;
type RouterFn =
    Arc<dyn Fn(MessageContext) -> HandlerFuture<(MessageContext, Option<Processor>)> + Send + Sync>;
type DestinationFn = Arc<dyn Fn(MessageContext) -> HandlerFuture<Content> + Send + Sync>;
type DestinationRouterFn =
    Arc<dyn Fn(MessageContext) -> HandlerFuture<Option<Vec<Destination>>> + Send + Sync>;

/// The kind tag associated with a handler at registration time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HandlerKind {
    /// Side-effect-only source processor.
    GenericProcessor,
    /// Source processor that may short-circuit the pipeline.
    Filter,
    /// Source processor that replaces the message content.
    Transformer,
    /// Source processor that dynamically selects the next processor.
    ProcessorRouter,
    /// Terminal handler invoked in parallel with its peers.
    Destination,
    /// Selects the destination set for a run.
    DestinationRouter,
}

/// A single source-flow step.
///
/// `Generic` always continues the pipeline with its (possibly mutated)
/// context. `Filter`/`Router` may short-circuit: a `false` filter result or a
/// `None` router result ends the run immediately with the current message,
/// skipping all destinations, and without a failure-store write.
#[derive(Clone)]
pub struct Processor {
    name: String,
    kind: ProcessorVariant,
}

#[derive(Clone)]
enum ProcessorVariant {
    Generic(GenericFn),
    Filter(FilterFn),
    Transform(TransformFn),
    Router(RouterFn),
}

impl Processor {
    /// The handler's unique, human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The handler kind this processor was registered as.
    pub fn kind(&self) -> HandlerKind {
        match self.kind {
            ProcessorVariant::Generic(_) => HandlerKind::GenericProcessor,
            ProcessorVariant::Filter(_) => HandlerKind::Filter,
            ProcessorVariant::Transform(_) => HandlerKind::Transformer,
            ProcessorVariant::Router(_) => HandlerKind::ProcessorRouter,
        }
    }

    /// Register a side-effect-only generic processor.
    pub fn generic<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageContext, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: ProcessorVariant::Generic(Arc::new(move |ctx| Box::pin(f(ctx)))),
        }
    }

    /// Register a filter. Returning `Ok((ctx, false))` short-circuits.
    pub fn filter<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(MessageContext, bool), String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: ProcessorVariant::Filter(Arc::new(move |ctx| Box::pin(f(ctx)))),
        }
    }

    /// Register a transformer. The closure is responsible for calling
    /// [`MessageContext::set_content`] before returning.
    pub fn transform<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<MessageContext, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: ProcessorVariant::Transform(Arc::new(move |ctx| Box::pin(f(ctx)))),
        }
    }

    /// Register a processor router. Returning `Ok((ctx, None))` short-circuits.
    pub fn router<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(MessageContext, Option<Processor>), String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            kind: ProcessorVariant::Router(Arc::new(move |ctx| Box::pin(f(ctx)))),
        }
    }

    pub(crate) async fn invoke(&self, ctx: MessageContext) -> Result<ProcessorOutcome, String> {
        match &self.kind {
            ProcessorVariant::Generic(f) => Ok(ProcessorOutcome::Continue(f(ctx).await?)),
            ProcessorVariant::Filter(f) => {
                let (ctx, keep) = f(ctx).await?;
                Ok(if keep {
                    ProcessorOutcome::Continue(ctx)
                } else {
                    ProcessorOutcome::ShortCircuit(ctx)
                })
            }
            ProcessorVariant::Transform(f) => Ok(ProcessorOutcome::Continue(f(ctx).await?)),
            ProcessorVariant::Router(f) => {
                let (ctx, next) = f(ctx).await?;
                match next {
                    Some(processor) => Box::pin(processor.invoke(ctx)).await,
                    None => Ok(ProcessorOutcome::ShortCircuit(ctx)),
                }
            }
        }
    }
}

/// The result of running one source-flow step.
pub(crate) enum ProcessorOutcome {
    /// Proceed to the next processor (or to destinations).
    Continue(MessageContext),
    /// End the run immediately with this context; no destinations run, no
    /// failure-store write.
    ShortCircuit(MessageContext),
}

/// A terminal handler, optionally gated by its own preprocessors.
///
/// If a preprocessor short-circuits, this destination is treated as "skipped
/// by preprocessor" for this run: not a failure, not a success, and — unlike
/// a genuine success — NOT added to `skipDestinations`, so it is attempted
/// again on replay.
#[derive(Clone)]
pub struct Destination {
    name: String,
    preprocessors: Vec<Processor>,
    handler: DestinationFn,
}

impl Destination {
    /// Register a destination with no preprocessors.
    pub fn new<F, Fut>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Content, String>> + Send + 'static,
    {
        Self {
            name: name.into(),
            preprocessors: Vec::new(),
            handler: Arc::new(move |ctx| Box::pin(f(ctx))),
        }
    }

    /// Attach preprocessors, run sequentially before this destination.
    pub fn with_preprocessors(mut self, preprocessors: Vec<Processor>) -> Self {
        self.preprocessors = preprocessors;
        self
    }

    /// The destination's unique, human-readable name.
    pub fn name(&self) -> &str {
        &self.name
    }

    pub(crate) fn preprocessors(&self) -> &[Processor] {
        &self.preprocessors
    }

    pub(crate) async fn invoke(&self, ctx: MessageContext) -> Result<Content, String> {
        (self.handler)(ctx).await
    }
}

/// The destinations flow of a channel: a fixed set, or a router that selects
/// the set dynamically per run.
#[derive(Clone)]
pub enum DestinationsFlow {
    /// A single destination.
    Single(Destination),
    /// A fixed set of destinations, all attempted on every run (subject to
    /// `skipDestinations`).
    Many(Vec<Destination>),
    /// A router that selects the destination set for this run. `None`
    /// yields an empty `destinationResults`.
    Router(DestinationRouterFn),
}

impl DestinationsFlow {
    /// Build a router-driven destinations flow.
    pub fn router<F, Fut>(f: F) -> Self
    where
        F: Fn(MessageContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Option<Vec<Destination>>, String>> + Send + 'static,
    {
        DestinationsFlow::Router(Arc::new(move |ctx| Box::pin(f(ctx))))
    }

    pub(crate) async fn resolve(&self, ctx: &MessageContext) -> Result<Vec<Destination>, String> {
        match self {
            DestinationsFlow::Single(d) => Ok(vec![d.clone()]),
            DestinationsFlow::Many(ds) => Ok(ds.clone()),
            DestinationsFlow::Router(f) => Ok(f(ctx.clone()).await?.unwrap_or_default()),
        }
    }
}
