//! Wires configured feeds to the bus, the broker and the admin surfaces

use std::sync::Arc;
use std::time::Duration;

use futures_util::future::join_all;
use sqx_connector::{
    run_server, AdapterContext, AdapterRegistry, ControlResponder, EnvResolver, FeedRunner,
    FeedSinks, ServerState, DEFAULT_FORWARD_QUEUE,
};
use sqx_metadata::Environment;
use sqx_middleware::{EventBus, MiddlewareFactory, Transport};
use sqx_schema::Trade;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::error::FeedError;

/// Drain budget for bus queues and forward queues after cancellation
pub const SHUTDOWN_GRACE: Duration = Duration::from_secs(1);

/// Run every feed until `root` is cancelled or a fatal error occurs.
/// Either way the runtime is torn down before returning.
pub async fn run(env: Environment, root: CancellationToken) -> Result<(), FeedError> {
    let control = MiddlewareFactory::create_transport(&env).await?;
    run_with_transport(env, root, control).await
}

/// [`run`] on an existing control transport.
///
/// Publishers are not tied to `root`: they stay up until the forward queues
/// and the bus have drained, then close.
pub async fn run_with_transport(
    env: Environment,
    root: CancellationToken,
    control: Arc<dyn Transport>,
) -> Result<(), FeedError> {
    let registry = AdapterRegistry::with_defaults();
    let resolver = EnvResolver::new();

    let publisher_cancel = CancellationToken::new();
    let publishers = Arc::new(
        MiddlewareFactory::create_pub_manager(&env, Arc::clone(&control), &publisher_cancel)
            .await?,
    );
    let bus: EventBus<Trade> = EventBus::new(env.bus.queue_size);
    info!(
        feeds = env.feeds.len(),
        publishers = publishers.len(),
        queue_size = env.bus.queue_size,
        "Starting feeds"
    );

    let mut runners = Vec::with_capacity(env.feeds.len());
    let mut control_tasks = Vec::with_capacity(env.feeds.len());
    let started = async {
        for feed in &env.feeds {
            let ctx = AdapterContext::from_feed(feed, &resolver, root.clone())?;
            let adapter = registry.create(feed.exchange, feed.data_type, &ctx)?;
            let sinks = FeedSinks {
                bus: bus.clone(),
                publishers: Arc::clone(&publishers),
                forward_capacity: DEFAULT_FORWARD_QUEUE,
            };
            let runner =
                FeedRunner::start(ctx.feed.clone(), adapter.as_ref(), &feed.symbol()?, feed.instrument, sinks)?;
            let responder = ControlResponder::new(runner.name(), runner.handle().clone());
            control_tasks.push(responder.spawn(Arc::clone(&control), root.clone()).await?);
            runners.push(runner);
        }
        Ok::<_, FeedError>(())
    }
    .await;

    let result = match started {
        Ok(()) => serve(&env, &runners, &root).await,
        Err(e) => Err(e),
    };

    root.cancel();
    let drained = join_all(runners.into_iter().map(|r| r.shutdown(SHUTDOWN_GRACE))).await;
    if drained.iter().any(|ok| !ok) {
        warn!("Some forward queues were not drained");
    }
    bus.shutdown(SHUTDOWN_GRACE).await;
    publishers.close().await;
    publisher_cancel.cancel();
    for task in control_tasks {
        let _ = task.await;
    }
    info!("All feeds stopped");
    result
}

async fn serve(
    env: &Environment,
    runners: &[FeedRunner],
    root: &CancellationToken,
) -> Result<(), FeedError> {
    let addr = env.app.socket_addr()?;
    let state = ServerState::new(
        runners
            .iter()
            .map(|r| (r.name().to_string(), r.handle().clone()))
            .collect(),
    );
    let mut server = tokio::spawn(run_server(addr, state, root.clone()));
    info!(addr = %addr, "Health server listening");

    tokio::select! {
        _ = root.cancelled() => {
            let _ = server.await;
            Ok(())
        }
        finished = &mut server => match finished {
            Ok(Ok(())) => Err(FeedError::Fatal("health server exited".into())),
            Ok(Err(e)) => Err(FeedError::Server(e)),
            Err(e) => Err(FeedError::Fatal(e.to_string())),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{EXIT_CONFIG, EXIT_RUNTIME};
    use futures_util::{SinkExt, StreamExt};
    use sqx_connector::FeedMetrics;
    use sqx_middleware::{InMemoryTransport, Journal};
    use tokio::net::TcpListener;
    use tokio_tungstenite::{accept_async, tungstenite::Message};

    fn env(feeds: &str) -> Environment {
        let yaml = format!(
            "app:\n  host: 127.0.0.1\n  port: 0\nnats:\n  url: nats://localhost:4222\n  transport: memory\n  publishers:\n    - nats://localhost:4222?stream=feed\n{}",
            feeds
        );
        Environment::from_yaml(&yaml).unwrap()
    }

    #[tokio::test]
    async fn test_runs_until_cancelled() {
        let env = env(
            "feeds:\n  - exchange: BINANCE\n    instrument: SPOT\n    symbol: BTC-USDT\n    endpoint: ws://127.0.0.1:1\n",
        );
        let root = CancellationToken::new();
        let run = tokio::spawn(run(env, root.clone()));

        tokio::time::sleep(Duration::from_millis(100)).await;
        root.cancel();
        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
    }

    #[tokio::test]
    async fn test_unsupported_instrument_is_config_error() {
        let env = env(
            "feeds:\n  - exchange: BINANCE\n    instrument: PERP\n    symbol: BTC-USDT\n",
        );
        let err = run(env, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::Adapter(_)));
        assert_eq!(err.exit_code(), EXIT_CONFIG);
    }

    #[tokio::test]
    async fn test_missing_credentials_is_config_error() {
        let env = env(
            "feeds:\n  - exchange: BYBIT\n    instrument: SPOT\n    symbol: ETH-USDT\n    keys: env:SQX_FEED_TEST_UNSET_KEY\n",
        );
        let err = run(env, CancellationToken::new()).await.unwrap_err();
        assert_eq!(err.exit_code(), EXIT_CONFIG);
    }

    #[tokio::test]
    async fn test_bind_failure_is_runtime_error() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut env = env("");
        env.app.port = port;

        let err = run(env, CancellationToken::new()).await.unwrap_err();
        assert!(matches!(err, FeedError::Server(_)));
        assert_eq!(err.exit_code(), EXIT_RUNTIME);
    }

    /// Serves `count` Binance trade frames on the first connection, then idles
    async fn spawn_exchange(count: i64) -> std::net::SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                tokio::spawn(async move {
                    let Ok(mut ws) = accept_async(stream).await else {
                        return;
                    };
                    for id in 1..=count {
                        let frame = format!(
                            r#"{{"e":"trade","s":"BTCUSDT","t":{},"p":"30000.5","q":"0.01","T":1700000000000,"m":false}}"#,
                            id
                        );
                        if ws.send(Message::Text(frame)).await.is_err() {
                            return;
                        }
                    }
                    while let Some(Ok(_)) = ws.next().await {}
                });
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_queued_trades_reach_broker_after_cancel() {
        const TRADES: i64 = 200;
        let addr = spawn_exchange(TRADES).await;
        let env = env(&format!(
            "feeds:\n  - name: drain-test\n    exchange: BINANCE\n    instrument: SPOT\n    symbol: BTC-USDT\n    endpoint: ws://{}\n",
            addr
        ));
        let memory = Arc::new(InMemoryTransport::new());
        let control: Arc<dyn Transport> = memory.clone();
        let root = CancellationToken::new();
        let run = tokio::spawn(run_with_transport(env, root.clone(), control));

        let metrics = FeedMetrics::new("drain-test");
        tokio::time::timeout(Duration::from_secs(5), async {
            while metrics.received() < TRADES as u64 {
                tokio::time::sleep(Duration::from_millis(1)).await;
            }
        })
        .await
        .unwrap();
        root.cancel();

        tokio::time::timeout(Duration::from_secs(5), run)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let journal = memory.journal("feed").unwrap();
        assert_eq!(journal.info().await.messages, TRADES as u64);
    }
}
