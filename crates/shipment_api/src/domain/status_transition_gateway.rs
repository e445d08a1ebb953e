use common::domain::{
    DocumentTransition, DomainError, DomainResult, LogLevel, LogSink, SessionProvider,
    TransitionOracle, TransitionRequest,
};
use depot_resilience::{with_rate_limit, ErrorFingerprint, ErrorThrottle, RateLimiters, RetryPolicy};
use serde_json::json;
use std::sync::Arc;
use tracing::{instrument, trace};

const ENTITY_TYPE: &str = "document";

/// Domain service that moves shipment documents through their lifecycle.
///
/// Every transition is executed by the backend oracle, which alone decides
/// whether it is legal. The local cache is never touched here; the change
/// feed drives convergence once the backend commits.
pub struct StatusTransitionGateway {
    oracle: Arc<dyn TransitionOracle>,
    session: Arc<dyn SessionProvider>,
    rate_limiters: Arc<RateLimiters>,
    throttle: Arc<ErrorThrottle>,
    log_sink: Arc<dyn LogSink>,
    retry_policy: RetryPolicy,
}

impl StatusTransitionGateway {
    pub fn new(
        oracle: Arc<dyn TransitionOracle>,
        session: Arc<dyn SessionProvider>,
        rate_limiters: Arc<RateLimiters>,
        throttle: Arc<ErrorThrottle>,
        log_sink: Arc<dyn LogSink>,
        retry_policy: RetryPolicy,
    ) -> Self {
        Self {
            oracle,
            session,
            rate_limiters,
            throttle,
            log_sink,
            retry_policy,
        }
    }

    pub async fn request_dispatch(&self, document_id: &str) -> DomainResult<()> {
        self.transition(document_id, DocumentTransition::RequestDispatch)
            .await
    }

    pub async fn confirm_dispatch(&self, document_id: &str) -> DomainResult<()> {
        self.transition(document_id, DocumentTransition::ConfirmDispatch)
            .await
    }

    pub async fn reject_dispatch(&self, document_id: &str) -> DomainResult<()> {
        self.transition(document_id, DocumentTransition::RejectDispatch)
            .await
    }

    /// Ask the backend to apply `transition` to `document_id` on behalf of the
    /// signed-in actor.
    ///
    /// Business rejections come back verbatim after a single oracle call.
    /// Transient failures are retried and surface as
    /// [`DomainError::RetryExhausted`] once the policy gives up.
    #[instrument(skip(self), fields(procedure = transition.procedure_name()))]
    pub async fn transition(
        &self,
        document_id: &str,
        transition: DocumentTransition,
    ) -> DomainResult<()> {
        let action = transition.procedure_name();

        let Some(actor) = self.session.current_actor() else {
            self.report(
                LogLevel::Warn,
                action,
                document_id,
                "no authenticated actor",
                json!({ "document_id": document_id, "procedure": action }),
            );
            return Err(DomainError::Unauthenticated);
        };

        let request = TransitionRequest::new(document_id, transition, actor.id.clone());
        request.validate_request()?;

        let limit_key = format!("{}:{}", actor.id, action);
        let result = with_rate_limit(&self.rate_limiters.sensitive, &limit_key, || {
            self.execute_with_retry(&request)
        })
        .await;

        let context = json!({
            "document_id": document_id,
            "actor_id": actor.id,
            "procedure": action,
        });
        match &result {
            Ok(()) => {
                let mut context = context;
                context["from_status"] = json!(transition.source_status());
                context["to_status"] = json!(transition.target_status());
                self.report(LogLevel::Info, action, document_id, "transition applied", context);
            }
            Err(DomainError::RateLimited { retry_after_ms }) => {
                let mut context = context;
                context["retry_after_ms"] = json!(retry_after_ms);
                self.report(LogLevel::Warn, action, document_id, "rate limit exceeded", context);
            }
            Err(DomainError::RetryExhausted {
                attempts,
                last_error,
            }) => {
                let mut context = context;
                context["attempts"] = json!(attempts);
                self.report(LogLevel::Error, action, document_id, last_error, context);
            }
            Err(err) => {
                self.report(LogLevel::Warn, action, document_id, &err.to_string(), context);
            }
        }

        result
    }

    async fn execute_with_retry(&self, request: &TransitionRequest) -> DomainResult<()> {
        // Rejections travel inside Ok so the policy stops on them
        let outcome = self
            .retry_policy
            .run(|attempt| async move {
                self.report(
                    LogLevel::Debug,
                    request.transition.procedure_name(),
                    &request.document_id,
                    "transition attempt",
                    json!({
                        "document_id": request.document_id,
                        "actor_id": request.actor_id,
                        "attempt": attempt,
                    }),
                );
                match self.oracle.execute(request).await {
                    Ok(()) => Ok(Ok(())),
                    Err(err) if err.is_transient() => Err(err),
                    Err(err) => Ok(Err(err)),
                }
            })
            .await;

        match outcome {
            Ok(result) => result,
            Err(exhausted) => Err(exhausted.into()),
        }
    }

    fn report(
        &self,
        level: LogLevel,
        action: &str,
        document_id: &str,
        message: &str,
        context: serde_json::Value,
    ) {
        let fingerprint =
            ErrorFingerprint::new(action, ENTITY_TYPE, message).with_entity_id(document_id);
        if self.throttle.should_log_fingerprint(&fingerprint) {
            self.log_sink.record(level, message, &context);
        } else {
            trace!(fingerprint = %fingerprint, "suppressed repeated event");
        }
    }
}
