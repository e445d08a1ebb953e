use common::domain::{DocumentTransition, DomainError};
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use shipment_api::StatusTransitionGateway;
use std::future::Future;
use std::sync::Arc;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Transition command received over NATS request/reply
#[derive(Debug, Deserialize)]
pub struct TransitionCommand {
    pub document_id: String,
    pub transition: String,
}

#[derive(Debug, Serialize, PartialEq)]
pub struct TransitionReply {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl TransitionReply {
    fn applied() -> Self {
        Self {
            ok: true,
            message: None,
        }
    }

    fn failed(err: &DomainError) -> Self {
        Self {
            ok: false,
            message: Some(err.user_message()),
        }
    }
}

/// Decode and execute one command, producing the reply to send back
pub async fn handle_command(gateway: &StatusTransitionGateway, payload: &[u8]) -> TransitionReply {
    let command: TransitionCommand = match serde_json::from_slice(payload) {
        Ok(command) => command,
        Err(e) => {
            return TransitionReply::failed(&DomainError::ValidationError(format!(
                "malformed command: {}",
                e
            )))
        }
    };

    let transition: DocumentTransition = match command.transition.parse() {
        Ok(transition) => transition,
        Err(msg) => return TransitionReply::failed(&DomainError::ValidationError(msg)),
    };

    match gateway.transition(&command.document_id, transition).await {
        Ok(()) => TransitionReply::applied(),
        Err(err) => TransitionReply::failed(&err),
    }
}

/// Requests still being executed, drained before the command loop returns
#[derive(Default)]
struct InFlight {
    tasks: JoinSet<()>,
}

impl InFlight {
    fn spawn<F>(&mut self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.tasks.spawn(task);
    }

    /// Collect tasks that already finished
    fn reap(&mut self) {
        while let Some(joined) = self.tasks.try_join_next() {
            log_join(joined);
        }
    }

    async fn drain(mut self) {
        if !self.tasks.is_empty() {
            info!(in_flight = self.tasks.len(), "waiting for in-flight transition commands");
        }
        while let Some(joined) = self.tasks.join_next().await {
            log_join(joined);
        }
    }

    fn len(&self) -> usize {
        self.tasks.len()
    }
}

fn log_join(joined: Result<(), JoinError>) {
    if let Err(e) = joined {
        warn!(error = %e, "transition command task panicked");
    }
}

/// Serve transition commands on `subject` until `token` is cancelled.
///
/// Each request runs on its own task so one retrying transition does not
/// hold up the rest. Requests already accepted still get their reply before
/// this returns.
pub async fn run_transition_commands(
    client: async_nats::Client,
    subject: String,
    gateway: Arc<StatusTransitionGateway>,
    token: CancellationToken,
) -> anyhow::Result<()> {
    let mut subscriber = client.subscribe(subject.clone()).await?;
    info!(subject = %subject, "accepting transition commands");

    let mut in_flight = InFlight::default();
    loop {
        in_flight.reap();
        let message = tokio::select! {
            _ = token.cancelled() => break,
            message = subscriber.next() => match message {
                Some(message) => message,
                None => {
                    warn!(subject = %subject, "command subscription closed");
                    break;
                }
            },
        };

        let Some(reply_to) = message.reply.clone() else {
            debug!(subject = %message.subject, "ignoring command without reply subject");
            continue;
        };

        let client = client.clone();
        let gateway = Arc::clone(&gateway);
        in_flight.spawn(async move {
            let reply = handle_command(&gateway, &message.payload).await;
            let body = match serde_json::to_vec(&reply) {
                Ok(body) => body,
                Err(e) => {
                    warn!(error = %e, "failed to encode command reply");
                    return;
                }
            };
            if let Err(e) = client.publish(reply_to, body.into()).await {
                warn!(error = %e, "failed to publish command reply");
            }
        });
    }

    if let Err(e) = subscriber.unsubscribe().await {
        debug!(error = %e, "command unsubscribe failed");
    }
    in_flight.drain().await;
    debug!("transition command loop stopped");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::domain::{Actor, MockTransitionOracle, StaticSession};
    use common::telemetry::TracingLogSink;
    use depot_resilience::{ErrorThrottle, RateLimiters, RetryPolicy};
    use std::time::Duration;

    fn gateway(oracle: MockTransitionOracle) -> StatusTransitionGateway {
        StatusTransitionGateway::new(
            Arc::new(oracle),
            Arc::new(StaticSession::signed_in(Actor::new("svc-dispatch", "service"))),
            Arc::new(RateLimiters::default()),
            Arc::new(ErrorThrottle::default()),
            Arc::new(TracingLogSink),
            RetryPolicy::new(3, Duration::from_millis(10)),
        )
    }

    #[tokio::test]
    async fn test_command_runs_named_transition() {
        let mut oracle = MockTransitionOracle::new();
        oracle
            .expect_execute()
            .withf(|request| {
                request.document_id == "doc-1"
                    && request.transition == DocumentTransition::RequestDispatch
                    && request.actor_id == "svc-dispatch"
            })
            .times(1)
            .returning(|_| Ok(()));

        let payload = br#"{"document_id":"doc-1","transition":"request_dispatch"}"#;
        let reply = handle_command(&gateway(oracle), payload).await;
        assert_eq!(reply, TransitionReply::applied());
    }

    #[tokio::test]
    async fn test_unknown_transition_is_refused_locally() {
        let mut oracle = MockTransitionOracle::new();
        oracle.expect_execute().times(0);

        let payload = br#"{"document_id":"doc-1","transition":"teleport"}"#;
        let reply = handle_command(&gateway(oracle), payload).await;
        assert!(!reply.ok);
        assert_eq!(reply.message.as_deref(), Some("unknown transition: teleport"));
    }

    #[tokio::test]
    async fn test_rejection_reason_is_returned() {
        let mut oracle = MockTransitionOracle::new();
        oracle.expect_execute().times(1).returning(|_| {
            Err(DomainError::IllegalTransition(
                "document is already dispatched".to_string(),
            ))
        });

        let payload = br#"{"document_id":"doc-1","transition":"confirm_dispatch"}"#;
        let reply = handle_command(&gateway(oracle), payload).await;
        assert_eq!(
            reply.message.as_deref(),
            Some("document is already dispatched")
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_drain_waits_for_accepted_commands() {
        let replied = Arc::new(std::sync::atomic::AtomicU32::new(0));
        let mut in_flight = InFlight::default();
        for delay_ms in [10, 500] {
            let replied = Arc::clone(&replied);
            in_flight.spawn(async move {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                replied.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            });
        }
        in_flight.spawn(async { panic!("handler bug") });

        tokio::time::sleep(Duration::from_millis(50)).await;
        in_flight.reap();
        assert_eq!(in_flight.len(), 1);

        in_flight.drain().await;
        assert_eq!(replied.load(std::sync::atomic::Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_malformed_payload() {
        let reply = handle_command(&gateway(MockTransitionOracle::new()), b"{").await;
        assert!(!reply.ok);
        assert!(reply.message.unwrap().starts_with("malformed command"));
    }
}
