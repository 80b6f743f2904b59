//! Reconnect loop shared by the node and cluster transports.

use std::future::Future;

use tokio::sync::mpsc::UnboundedSender;
use tracing::debug;

use rkv_common::RkvResult;

use super::LifecycleEvent;
use crate::retry::{RetryDecision, RetryPolicy};

/// Calls `connect` until it succeeds or `policy` stops, publishing each step.
///
/// Send failures are ignored: a dropped receiver means nobody is listening.
pub(crate) async fn drive<F, Fut>(
    name: &str,
    policy: &RetryPolicy,
    events: &UnboundedSender<LifecycleEvent>,
    mut connect: F,
) where
    F: FnMut() -> Fut,
    Fut: Future<Output = RkvResult<()>>,
{
    let mut attempt = 0u32;
    loop {
        match connect().await {
            Ok(()) => {
                debug!(transport = name, "transport ready");
                let _ = events.send(LifecycleEvent::Ready);
                return;
            }
            Err(err) if err.is_closed() => {
                debug!(transport = name, "transport closed while connecting");
                let _ = events.send(LifecycleEvent::End);
                return;
            }
            Err(err) => {
                debug!(transport = name, error = %err, attempt, "connect attempt failed");
                let _ = events.send(LifecycleEvent::Error(err));

                attempt += 1;
                match policy.compute(attempt) {
                    RetryDecision::Stop => {
                        debug!(transport = name, attempt, "retry policy stopped reconnecting");
                        let _ = events.send(LifecycleEvent::End);
                        return;
                    }
                    RetryDecision::Retry(delay) => {
                        let _ = events.send(LifecycleEvent::Reconnecting { attempt, delay });
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }
    }
}
