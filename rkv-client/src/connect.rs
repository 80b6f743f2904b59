//! # Connection Establishment
//!
//! Purpose: Turn the event stream of a transport's reconnect loop into one
//! deterministic outcome: a ready client or a fatal error.
//!
//! ## Design Principles
//! 1. **Tri-State Machine**: `Connecting` moves to `Ready` or `Failed` exactly
//!    once; both are terminal.
//! 2. **Single-Assignment Completion**: The outcome travels through a oneshot
//!    sender held in an `Option`; settling takes it, so a second settle has
//!    nothing to send.
//! 3. **Idempotent Detach**: Dropping the event subscription is safe to repeat,
//!    and events handled after settlement are ignored.
//! 4. **Budgeted Refusals**: Only refused connections count against
//!    `retry_attempts`; other failures are logged and the wait continues until
//!    the transport itself gives up.
//!
//! ## State Diagram
//!
//! ```text
//!              Reconnecting (counter += 1)
//!                 ┌─────┐
//!                 ▼     │
//! INIT ──► CONNECTING ──┘
//!             │   │
//!     Ready   │   │  Error(refused) with counter >= retry_attempts,
//!             │   │  or End
//!             ▼   ▼
//!          READY  FAILED
//! ```

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use rkv_common::{
    ConnectionError, ConnectionOptions, ConnectionTarget, RkvError, RkvResult,
    DEFAULT_CONNECTION_NAME,
};

use crate::client::{KvClient, RedisClient};
use crate::cluster::{ClusterClient, ClusterConnection};
use crate::retry::{RetryHook, RetryPolicy};
use crate::transport::{LifecycleEvent, NodeConnection, NodeSetup, Transport};

/// Macro state of an establishment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EstablishState {
    Connecting,
    Ready,
    Failed,
}

/// Drives one establishment from lifecycle events to a settled outcome.
///
/// `C` is the value handed to the caller once the transport is ready.
pub struct ConnectionEstablisher<C> {
    state: EstablishState,
    reconnects: u32,
    retry_attempts: u32,
    verbose: bool,
    name: String,
    ready: Option<C>,
    last_error: Option<RkvError>,
    subscription: Option<mpsc::UnboundedReceiver<LifecycleEvent>>,
    completion: Option<oneshot::Sender<RkvResult<C>>>,
}

impl<C> ConnectionEstablisher<C> {
    /// Subscribes to `events` and returns the pending outcome.
    pub fn new(
        ready: C,
        events: mpsc::UnboundedReceiver<LifecycleEvent>,
        options: &ConnectionOptions,
    ) -> (Self, oneshot::Receiver<RkvResult<C>>) {
        let (completion, outcome) = oneshot::channel();
        let establisher = ConnectionEstablisher {
            state: EstablishState::Connecting,
            reconnects: 0,
            retry_attempts: options.retry_attempts,
            verbose: options.verbose_retry_log,
            name: options.label().to_string(),
            ready: Some(ready),
            last_error: None,
            subscription: Some(events),
            completion: Some(completion),
        };
        (establisher, outcome)
    }

    pub fn state(&self) -> EstablishState {
        self.state
    }

    pub fn reconnects(&self) -> u32 {
        self.reconnects
    }

    pub fn is_settled(&self) -> bool {
        self.state != EstablishState::Connecting
    }

    /// Applies one lifecycle event. No-op once settled.
    pub fn handle(&mut self, event: LifecycleEvent) {
        if self.is_settled() {
            return;
        }

        match event {
            LifecycleEvent::Reconnecting { .. } => {
                self.reconnects += 1;
            }
            LifecycleEvent::Ready => {
                self.detach();
                match self.ready.take() {
                    Some(ready) => {
                        info!(target: "rkv::connect", connection = %self.name, "connection ready");
                        self.settle(Ok(ready));
                    }
                    None => self.settle(Err(ConnectionError::Closed.into())),
                }
            }
            LifecycleEvent::Error(err) if err.is_connection_refused() => {
                if self.reconnects >= self.retry_attempts {
                    self.detach();
                    self.settle(Err(err));
                    return;
                }
                error!(
                    target: "rkv::connect",
                    "Unable to connect to the database{}.{} Retrying ({})...",
                    self.connection_token(),
                    self.verbose_message(&err),
                    self.reconnects
                );
                self.last_error = Some(err);
            }
            LifecycleEvent::Error(err) => {
                warn!(
                    target: "rkv::connect",
                    connection = %self.name,
                    error = %err,
                    "connection error while establishing"
                );
                self.last_error = Some(err);
            }
            LifecycleEvent::End => {
                self.detach();
                let err = self.last_error.take().unwrap_or_else(|| {
                    ConnectionError::Exhausted {
                        attempts: self.reconnects,
                    }
                    .into()
                });
                self.settle(Err(err));
            }
        }
    }

    /// Waits on the subscription until the outcome is settled.
    ///
    /// A closed event channel counts as `End`.
    pub async fn run(mut self) {
        while let Some(subscription) = self.subscription.as_mut() {
            let event = subscription.recv().await.unwrap_or(LifecycleEvent::End);
            self.handle(event);
        }
    }

    fn settle(&mut self, outcome: RkvResult<C>) {
        let completion = match self.completion.take() {
            Some(completion) => completion,
            None => return,
        };
        self.state = match outcome {
            Ok(_) => EstablishState::Ready,
            Err(_) => EstablishState::Failed,
        };
        // The receiver may already be gone; the state still records the outcome.
        let _ = completion.send(outcome);
    }

    fn detach(&mut self) {
        self.subscription = None;
    }

    fn connection_token(&self) -> String {
        if self.name == DEFAULT_CONNECTION_NAME {
            String::new()
        } else {
            format!(" ({})", self.name)
        }
    }

    fn verbose_message(&self, err: &RkvError) -> String {
        if self.verbose {
            format!(" Message: {}.", err)
        } else {
            String::new()
        }
    }
}

/// Runs an establisher to completion and returns its outcome.
pub async fn establish<C>(
    ready: C,
    events: mpsc::UnboundedReceiver<LifecycleEvent>,
    options: &ConnectionOptions,
) -> RkvResult<C> {
    let (establisher, outcome) = ConnectionEstablisher::new(ready, events, options);
    establisher.run().await;
    match outcome.await {
        Ok(result) => result,
        Err(_) => Err(ConnectionError::Closed.into()),
    }
}

/// A ready connection of either mode.
#[derive(Debug, Clone)]
pub enum Connection {
    Single(RedisClient),
    Cluster(ClusterClient),
}

impl Connection {
    /// Closes the underlying connection. The host calls this once at teardown.
    pub async fn shutdown(&self) -> RkvResult<()> {
        match self {
            Connection::Single(client) => client.shutdown().await,
            Connection::Cluster(client) => client.shutdown().await,
        }
    }

    pub fn as_single(&self) -> Option<&RedisClient> {
        match self {
            Connection::Single(client) => Some(client),
            Connection::Cluster(_) => None,
        }
    }

    pub fn as_cluster(&self) -> Option<&ClusterClient> {
        match self {
            Connection::Cluster(client) => Some(client),
            Connection::Single(_) => None,
        }
    }
}

/// Connects in the mode selected by `options`.
pub async fn connect(
    options: &ConnectionOptions,
    on_retry: Option<RetryHook>,
) -> RkvResult<Connection> {
    match options.target {
        ConnectionTarget::Default(_) => Ok(Connection::Single(
            create_client(options, on_retry).await?,
        )),
        ConnectionTarget::Cluster(_) => Ok(Connection::Cluster(
            create_cluster(options, on_retry).await?,
        )),
    }
}

/// Connects to a single node, retrying refused connections per `options`.
pub async fn create_client(
    options: &ConnectionOptions,
    on_retry: Option<RetryHook>,
) -> RkvResult<RedisClient> {
    options.validate()?;
    let node = match &options.target {
        ConnectionTarget::Default(node) => node,
        ConnectionTarget::Cluster(_) => {
            return Err(RkvError::Config(
                "cluster options passed to a single-node connect".to_string(),
            ))
        }
    };

    let policy = RetryPolicy::from_options(options).with_on_retry(on_retry);
    let (conn, events) = NodeConnection::open(node.address(), NodeSetup::from_options(options), policy);
    let client = KvClient::new(Arc::clone(&conn));

    let result = establish(client, events, options).await;
    if result.is_err() {
        // Stops the reconnect loop if it is still sleeping between attempts.
        let _ = conn.shutdown().await;
    }
    result
}

/// Connects to a cluster through its startup nodes.
pub async fn create_cluster(
    options: &ConnectionOptions,
    on_retry: Option<RetryHook>,
) -> RkvResult<ClusterClient> {
    options.validate()?;
    let cluster = match &options.target {
        ConnectionTarget::Cluster(cluster) => cluster,
        ConnectionTarget::Default(_) => {
            return Err(RkvError::Config(
                "single-node options passed to a cluster connect".to_string(),
            ))
        }
    };

    let policy = RetryPolicy::from_options(options).with_on_retry(on_retry);
    let (conn, events) = ClusterConnection::open(
        cluster.startup_nodes.clone(),
        NodeSetup::from_options(options),
        policy,
    );
    let client = KvClient::new(Arc::clone(&conn));

    let result = establish(client, events, options).await;
    if result.is_err() {
        let _ = conn.shutdown().await;
    }
    result
}
