mod commands;
mod config;

use anyhow::Context;
use common::domain::{SessionProvider, StaticSession};
use common::telemetry::{init_telemetry, shutdown_telemetry, TelemetryProviders, TracingLogSink};
use crate::config::ServiceConfig;
use depot_resilience::{spawn_sweeper, ErrorThrottle, RateLimiters, RetryPolicy};
use realtime_sync::{
    InMemoryQueryCache, NatsChangeFeed, RealtimeConsistencyManager, SubscriptionHandle,
};
use shipment_api::{PostgrestTransitionOracle, StatusTransitionGateway};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[tokio::main]
async fn main() {
    let config = match ServiceConfig::from_env() {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Failed to load configuration: {}", e);
            std::process::exit(1);
        }
    };

    let telemetry_providers: Option<TelemetryProviders> =
        match init_telemetry(&config.telemetry_config()) {
            Ok(providers) => providers,
            Err(e) => {
                eprintln!("Failed to initialize telemetry: {}", e);
                std::process::exit(1);
            }
        };

    info!(
        otel_enabled = config.otel_enabled,
        nats_url = %config.nats_url,
        topic = %config.realtime_topic,
        "Starting depot-all-in-one"
    );

    let exit_code = match run(config).await {
        Ok(()) => 0,
        Err(e) => {
            error!("Service failed: {:#}", e);
            1
        }
    };

    shutdown_telemetry(telemetry_providers);
    std::process::exit(exit_code);
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let nats_client = async_nats::connect(config.nats_url.as_str())
        .await
        .with_context(|| format!("failed to connect to NATS at {}", config.nats_url))?;

    // Process-wide resilience state, swept in the background
    let throttle = Arc::new(ErrorThrottle::new(config.throttle_config()));
    let rate_limiters = Arc::new(RateLimiters::new(config.rate_limiters_config()));
    let background_token = CancellationToken::new();
    let mut background: Vec<JoinHandle<()>> = vec![
        spawn_sweeper(&throttle, config.sweep_interval(), background_token.clone()),
        spawn_sweeper(&rate_limiters, config.sweep_interval(), background_token.clone()),
    ];

    let cache = Arc::new(InMemoryQueryCache::with_retention(config.cache_retention()));
    background.push(spawn_sweeper(&cache, config.sweep_interval(), background_token.clone()));
    let feed = Arc::new(NatsChangeFeed::new(
        nats_client.clone(),
        config.change_subject_prefix.clone(),
    ));
    let manager = RealtimeConsistencyManager::new(
        feed,
        cache,
        Arc::clone(&throttle),
        config.realtime_config(),
    );
    let subscription = manager.subscribe(&config.realtime_topic, |signal| {
        debug!(
            topic = %signal.topic,
            entity_id = %signal.entity_id,
            event_kind = ?signal.event_kind,
            buckets = signal.buckets.len(),
            "views invalidated"
        );
    });
    background.push(spawn_liveness_watch(
        Arc::clone(&manager),
        config.realtime_topic.clone(),
        config.stale_horizon(),
        background_token.clone(),
    ));

    let session: Arc<dyn SessionProvider> = match config.service_actor() {
        Some(actor) => Arc::new(StaticSession::signed_in(actor)),
        None => {
            warn!("no service actor configured, transition commands will be refused");
            Arc::new(StaticSession::anonymous())
        }
    };
    let oracle = PostgrestTransitionOracle::new(config.postgrest_config())?;
    let gateway = Arc::new(StatusTransitionGateway::new(
        Arc::new(oracle),
        session,
        Arc::clone(&rate_limiters),
        Arc::clone(&throttle),
        Arc::new(TracingLogSink),
        RetryPolicy::from_config(&config.retry_policy_config()),
    ));

    let commands = tokio::spawn(commands::run_transition_commands(
        nats_client.clone(),
        config.command_subject.clone(),
        gateway,
        background_token.clone(),
    ));

    let shutdown_token = CancellationToken::new();
    install_signal_handlers(subscription, shutdown_token.clone());
    shutdown_token.cancelled().await;

    info!("Running cleanup tasks...");
    let cleanup = async {
        background_token.cancel();
        manager.shutdown().await;

        match commands.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("command loop failed: {:#}", e),
            Err(e) => warn!(error = %e, "command task panicked"),
        }
        for handle in background {
            if let Err(e) = handle.await {
                warn!(error = %e, "background task panicked");
            }
        }
        if let Err(e) = nats_client.flush().await {
            warn!(error = %e, "failed to flush NATS connection");
        }
    };

    if tokio::time::timeout(config.shutdown_timeout(), cleanup)
        .await
        .is_err()
    {
        warn!(
            timeout_secs = config.shutdown_timeout().as_secs(),
            "cleanup timed out"
        );
    }

    info!("Cleanup complete");
    Ok(())
}

/// Release the realtime subscription and trigger shutdown on SIGINT or SIGTERM.
///
/// Both listeners hold a clone of the same handle, so a second signal after
/// the first does not release it again.
fn install_signal_handlers(subscription: SubscriptionHandle, shutdown_token: CancellationToken) {
    let sigint_subscription = subscription.clone();
    let sigint_token = shutdown_token.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Received shutdown signal");
                release(&sigint_subscription, "SIGINT");
                sigint_token.cancel();
            }
            Err(err) => {
                error!("Error setting up signal handler: {}", err);
            }
        }
    });

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        tokio::spawn(async move {
            let mut sigterm = match signal(SignalKind::terminate()) {
                Ok(sigterm) => sigterm,
                Err(err) => {
                    error!("Error setting up SIGTERM handler: {}", err);
                    return;
                }
            };
            sigterm.recv().await;
            info!("Received SIGTERM signal");
            release(&subscription, "SIGTERM");
            shutdown_token.cancel();
        });
    }
}

fn release(subscription: &SubscriptionHandle, signal: &str) {
    if subscription.unsubscribe() {
        info!(topic = %subscription.topic(), signal, "released realtime subscription");
    } else {
        debug!(topic = %subscription.topic(), signal, "realtime subscription already released");
    }
}

/// Log when the realtime channel stops being trustworthy and when it recovers
fn spawn_liveness_watch(
    manager: Arc<RealtimeConsistencyManager>,
    topic: String,
    horizon: Duration,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval((horizon / 2).max(Duration::from_secs(1)));
        // Give the channel one period to connect before judging it
        ticker.tick().await;
        let mut was_stale = false;
        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let stale = manager.is_stale(&topic, horizon);
            if stale && !was_stale {
                warn!(
                    topic = %topic,
                    status = ?manager.channel_status(&topic),
                    "realtime channel is stale, views should poll"
                );
            } else if !stale && was_stale {
                info!(topic = %topic, "realtime channel recovered");
            }
            was_stale = stale;
        }
    })
}
