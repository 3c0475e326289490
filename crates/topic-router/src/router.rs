//! # Topic Router
//!
//! Owns the single subscription to the physical queue and dispatches every
//! delivered envelope to the handler registered for its topic.
//!
//! ```text
//!   enqueue(key, payload)                      listen_queue(key, handler)
//!          │                                              │
//!          ▼                                              ▼
//!   registered? ──no──► NoListener           ┌─────────────────────────┐
//!          │ yes                             │ registry[id] = handler  │
//!          ▼                                 └────────────┬────────────┘
//!   envelope::encode                                      │ first call only
//!          │                                              ▼
//!          ▼                                  queue.subscribe(dispatch)
//!   ┌───────────────┐      deliver(raw)      ┌─────────────────────────┐
//!   │ PhysicalQueue │ ─────────────────────► │ decode → lookup → call  │
//!   └───────────────┘ ◄────── Result ─────── └─────────────────────────┘
//! ```
//!
//! ## State
//!
//! | State        | Entered by                  | Leaves via           |
//! |--------------|-----------------------------|----------------------|
//! | Unsubscribed | construction                | first `listen_queue` |
//! | Subscribed   | first `listen_queue`        | `close`              |
//! | Closed       | `close` or drop             | never                |

use crate::config::RouterConfig;
use crate::domain::envelope;
use crate::domain::{EnqueueOptions, HandlerError, RouterError, TopicId, TopicKey};
use crate::ports::{DeliveryCallback, PhysicalQueue};
use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// A registered topic handler.
pub type Handler = Arc<dyn Fn(Value) -> BoxFuture<'static, Result<(), HandlerError>> + Send + Sync>;

/// Topic identifier → handler mapping shared with the dispatch callback.
#[derive(Default)]
struct HandlerRegistry {
    handlers: RwLock<HashMap<TopicId, Handler>>,
}

impl HandlerRegistry {
    /// Insert or replace. Returns `true` if a handler was replaced.
    fn insert(&self, topic: TopicId, handler: Handler) -> bool {
        self.handlers.write().insert(topic, handler).is_some()
    }

    fn get(&self, topic: &TopicId) -> Option<Handler> {
        self.handlers.read().get(topic).cloned()
    }

    fn contains(&self, topic: &TopicId) -> bool {
        self.handlers.read().contains_key(topic)
    }

    fn topics(&self) -> Vec<TopicId> {
        let mut topics: Vec<TopicId> = self.handlers.read().keys().cloned().collect();
        topics.sort();
        topics
    }
}

/// Multiplexes logical topics over one [`PhysicalQueue`].
pub struct TopicRouter<Q: PhysicalQueue> {
    queue: Arc<Q>,
    registry: Arc<HandlerRegistry>,
    subscription: OnceCell<()>,
    closed: Arc<AtomicBool>,
    config: RouterConfig,
}

impl<Q: PhysicalQueue> TopicRouter<Q> {
    /// Create a router over `queue` with default configuration.
    #[must_use]
    pub fn new(queue: Arc<Q>) -> Self {
        Self::with_config(queue, RouterConfig::default())
    }

    /// Create a router over `queue` with explicit configuration.
    #[must_use]
    pub fn with_config(queue: Arc<Q>, config: RouterConfig) -> Self {
        Self {
            queue,
            registry: Arc::new(HandlerRegistry::default()),
            subscription: OnceCell::new(),
            closed: Arc::new(AtomicBool::new(false)),
            config,
        }
    }

    /// Run `f` with a fresh router and close it afterwards.
    ///
    /// The router is closed once `f` completes. If `f` panics, dropping the
    /// last handle releases the queue in the background.
    pub async fn scoped<F, Fut, T>(queue: Arc<Q>, config: RouterConfig, f: F) -> T
    where
        F: FnOnce(Arc<Self>) -> Fut,
        Fut: Future<Output = T>,
    {
        let router = Arc::new(Self::with_config(queue, config));
        let output = f(Arc::clone(&router)).await;
        router.close().await;
        output
    }

    /// Register `handler` for `key`.
    ///
    /// A later registration for the same topic replaces the earlier one. The
    /// first registration on this instance subscribes to the physical queue;
    /// later ones never do.
    ///
    /// # Errors
    ///
    /// - `ConnectionClosed` after [`close`](Self::close)
    /// - `Subscribe` if the physical queue refused the subscription
    pub async fn listen_queue<K, F, Fut>(&self, key: K, handler: F) -> Result<(), RouterError>
    where
        K: Into<TopicKey>,
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.ensure_open()?;

        let topic = key.into().identifier();
        let boxed: Handler = Arc::new(move |payload: Value| handler(payload).boxed());

        if self.registry.insert(topic.clone(), boxed) {
            if self.config.warn_on_replace {
                warn!(topic = %topic, "Replaced existing topic handler");
            }
        } else {
            debug!(topic = %topic, "Topic handler registered");
        }

        if self.config.listen {
            self.ensure_subscribed().await?;
        }
        Ok(())
    }

    /// Register a handler that receives payloads deserialized as `T`.
    ///
    /// A payload that does not deserialize fails the delivery with
    /// `RouterError::Payload`.
    ///
    /// # Errors
    ///
    /// Same as [`listen_queue`](Self::listen_queue).
    pub async fn listen_queue_typed<T, K, F, Fut>(
        &self,
        key: K,
        handler: F,
    ) -> Result<(), RouterError>
    where
        T: DeserializeOwned + Send + 'static,
        K: Into<TopicKey>,
        F: Fn(T) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        let key = key.into();
        let topic = key.identifier();

        self.listen_queue(key, move |payload: Value| {
            let topic = topic.clone();
            let call = serde_json::from_value::<T>(payload).map(|value| handler(value));
            async move {
                match call {
                    Ok(fut) => fut.await,
                    Err(e) => Err(Box::new(RouterError::Payload {
                        topic,
                        reason: e.to_string(),
                    }) as HandlerError),
                }
            }
        })
        .await
    }

    /// Submit `payload` to the handler registered for `key`.
    ///
    /// `options` is forwarded to the physical queue unchanged.
    ///
    /// # Errors
    ///
    /// - `NoListener` if no handler is registered for `key` on this instance
    /// - `EnqueueFailed` if the physical queue rejected the record
    /// - `Encoding` if the payload cannot be represented as JSON
    /// - `ConnectionClosed` after [`close`](Self::close)
    pub async fn enqueue<K, P>(
        &self,
        key: K,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<(), RouterError>
    where
        K: Into<TopicKey>,
        P: Serialize + ?Sized,
    {
        let (topic, record) = self.prepare(key.into(), payload, &options)?;

        self.queue
            .submit(record, &options)
            .await
            .map_err(|source| {
                warn!(topic = %topic, error = %source, "Physical queue rejected message");
                RouterError::EnqueueFailed {
                    topic: topic.clone(),
                    source,
                }
            })?;

        debug!(topic = %topic, "Message enqueued");
        Ok(())
    }

    /// Stage `payload` into the caller's transaction.
    ///
    /// Nothing is sent until the caller commits `tx`; the commit decides
    /// whether the message is delivered.
    ///
    /// # Errors
    ///
    /// `NoListener`, `Encoding` or `ConnectionClosed`, as for
    /// [`enqueue`](Self::enqueue).
    pub fn enqueue_atomic<K, P>(
        &self,
        tx: &mut Q::Transaction,
        key: K,
        payload: &P,
        options: EnqueueOptions,
    ) -> Result<(), RouterError>
    where
        K: Into<TopicKey>,
        P: Serialize + ?Sized,
    {
        let (topic, record) = self.prepare(key.into(), payload, &options)?;
        self.queue.stage(tx, record, &options);
        debug!(topic = %topic, "Message staged into transaction");
        Ok(())
    }

    /// Release the physical queue connection.
    ///
    /// Idempotent. Does not wait for in-flight handler invocations.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        self.queue.release().await;
        info!(topics = self.registry.topics().len(), "Topic router closed");
    }

    /// Whether a handler is registered for `key`.
    pub fn has_listener<K: Into<TopicKey>>(&self, key: K) -> bool {
        self.registry.contains(&key.into().identifier())
    }

    /// Registered topic identifiers, sorted.
    #[must_use]
    pub fn topics(&self) -> Vec<TopicId> {
        self.registry.topics()
    }

    /// Whether the physical queue subscription has been established.
    #[must_use]
    pub fn is_subscribed(&self) -> bool {
        self.subscription.initialized()
    }

    /// Whether [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// The underlying physical queue.
    #[must_use]
    pub fn queue(&self) -> &Arc<Q> {
        &self.queue
    }

    fn ensure_open(&self) -> Result<(), RouterError> {
        if self.is_closed() {
            return Err(RouterError::ConnectionClosed);
        }
        Ok(())
    }

    fn prepare<P>(
        &self,
        key: TopicKey,
        payload: &P,
        options: &EnqueueOptions,
    ) -> Result<(TopicId, Value), RouterError>
    where
        P: Serialize + ?Sized,
    {
        self.ensure_open()?;

        let topic = key.identifier();
        if !self.registry.contains(&topic) {
            return Err(RouterError::NoListener { topic });
        }

        let payload =
            serde_json::to_value(payload).map_err(|e| RouterError::Encoding(e.to_string()))?;
        let record = envelope::encode(&key, payload, &options.keys_if_undelivered);
        Ok((topic, record))
    }

    async fn ensure_subscribed(&self) -> Result<(), RouterError> {
        self.subscription
            .get_or_try_init(|| async {
                let callback = dispatch_callback(
                    Arc::clone(&self.registry),
                    Arc::clone(&self.closed),
                );
                self.queue
                    .subscribe(callback)
                    .await
                    .map_err(RouterError::Subscribe)?;
                info!("Subscribed to physical queue");
                Ok::<(), RouterError>(())
            })
            .await?;
        Ok(())
    }
}

impl<Q: PhysicalQueue> Drop for TopicRouter<Q> {
    fn drop(&mut self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }

        let queue = Arc::clone(&self.queue);
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                runtime.spawn(async move { queue.release().await });
                debug!("Topic router dropped without close; releasing queue");
            }
            Err(_) => warn!("Topic router dropped outside a runtime; queue not released"),
        }
    }
}

/// Build the one callback handed to the physical queue.
fn dispatch_callback(registry: Arc<HandlerRegistry>, closed: Arc<AtomicBool>) -> DeliveryCallback {
    Arc::new(move |raw: Value| {
        let registry = Arc::clone(&registry);
        let closed = Arc::clone(&closed);
        async move { dispatch(&registry, &closed, raw).await }.boxed()
    })
}

async fn dispatch(
    registry: &HandlerRegistry,
    closed: &AtomicBool,
    raw: Value,
) -> Result<(), RouterError> {
    if closed.load(Ordering::Acquire) {
        return Err(RouterError::ConnectionClosed);
    }

    let envelope = envelope::decode(raw).inspect_err(|e| {
        warn!(error = %e, "Rejected delivery with unrecognized format");
    })?;
    let topic = envelope.topic;

    let Some(handler) = registry.get(&topic) else {
        warn!(topic = %topic, "No local listener for delivered message");
        return Err(RouterError::NoListener { topic });
    };

    debug!(topic = %topic, "Dispatching message");
    handler(envelope.payload).await.map_err(|e| match e.downcast::<RouterError>() {
        Ok(router_error) => *router_error,
        Err(other) => RouterError::Handler {
            topic,
            reason: other.to_string(),
        },
    })
}
