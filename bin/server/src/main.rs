use chrono::Utc;
use courier_channel::{ChannelRegistry, WebApiAdapter};
use courier_conversation::{
    DurableCache, EchoBackend, Hub, InMemoryDurableCache, MessageService, NatsCacheConfig,
    NatsKvCache, SessionStore,
};
use courier_server::{AppState, config::ServerConfig, router};
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration from environment
    let config = ServerConfig::from_env().expect("failed to load configuration");
    tracing::info!("Loaded configuration");

    let ttl = config.session.ttl();
    let durable: Arc<dyn DurableCache> = match &config.nats.url {
        Some(url) => {
            tracing::info!(url = %url, bucket = %config.nats.bucket, "Connecting to NATS durable tier");
            let mut nats = NatsCacheConfig::new(url.clone(), ttl);
            nats.bucket = Some(config.nats.bucket.clone());
            Arc::new(
                NatsKvCache::connect(nats)
                    .await
                    .expect("failed to open NATS key-value bucket"),
            )
        }
        None => {
            tracing::warn!("NATS__URL not set, conversations will not survive a restart");
            Arc::new(InMemoryDurableCache::new())
        }
    };

    let store = Arc::new(SessionStore::new(durable, ttl));
    let hub = Hub::spawn(config.hub.command_buffer);
    let service = Arc::new(MessageService::new(
        store.clone(),
        hub.clone(),
        Arc::new(EchoBackend),
    ));
    let channels = ChannelRegistry::new().with(Arc::new(WebApiAdapter));

    // Spawn periodic idle-conversation eviction
    let idle_for = chrono::Duration::from_std(config.session.idle_after())
        .unwrap_or(chrono::Duration::MAX);
    let cleanup_interval = config.session.cleanup_interval();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cleanup_interval);
        loop {
            interval.tick().await;
            let Some(cutoff) = Utc::now().checked_sub_signed(idle_for) else {
                continue;
            };
            let evicted = store.evict_idle(cutoff).await;
            if evicted > 0 {
                tracing::debug!(evicted, "Evicted idle conversations from local cache");
            }
        }
    });

    let state = Arc::new(AppState::new(
        service,
        hub,
        channels,
        config.hub.mailbox_capacity,
        config.websocket.keepalive(),
    ));
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .expect("failed to bind to address");

    tracing::info!("listening on http://{}", config.bind_addr);

    axum::serve(listener, app.into_make_service())
        .await
        .expect("server error");
}
