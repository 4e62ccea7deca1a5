use std::sync::Arc;

use http::Method;

use cloak::config::ProxyConfig;
use cloak::middleware::IntoMiddleware;
use cloak::middleware::body_limit::BodyLimit;
use cloak::pipeline::{self, ProxyState};
use cloak::plugins::rate_limiter::RateLimiterBuilder;
use cloak::router::Router;
use cloak::store::{MappingStore, MemoryMappingStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cloak::tracing::init_tracing();

    let config = ProxyConfig::from_env();

    let store = build_store(&config).await?;
    let state = Arc::new(ProxyState::new(config.clone(), store)?);

    let mut router = Router::new();

    if config.rate_limit_enabled {
        router.plugin(
            RateLimiterBuilder::new()
                .burst_size(config.rate_limit)
                .per_second(config.rate_limit)
                .build(),
        );
    }

    let body_limit = BodyLimit::new(config.max_body_bytes).into_middleware();

    {
        let state = state.clone();
        let route = router.route(Method::POST, "/v1/chat/completions", move |req| {
            pipeline::chat_completions(req, state.clone())
        });
        route.middleware(body_limit.clone());
    }
    {
        let state = state.clone();
        router.route(Method::GET, "/v1/models", move |req| {
            pipeline::models(req, state.clone())
        });
    }
    {
        let state = state.clone();
        let route = router.route(Method::POST, "/api/test/anonymize", move |req| {
            pipeline::test_anonymize(req, state.clone())
        });
        route.middleware(body_limit.clone());
    }
    {
        let state = state.clone();
        let route = router.route(Method::POST, "/api/test/deanonymize", move |req| {
            pipeline::test_deanonymize(req, state.clone())
        });
        route.middleware(body_limit);
    }
    router.route(Method::GET, "/health", pipeline::health);

    let listener = tokio::net::TcpListener::bind(&config.listen_addr).await?;
    cloak::serve(listener, router).await;
    Ok(())
}

/// Picks the mapping-store backend and starts its maintenance task.
async fn build_store(config: &ProxyConfig) -> anyhow::Result<Arc<dyn MappingStore>> {
    #[cfg(feature = "redis-store")]
    if let Some(redis_url) = &config.redis_url {
        let store = cloak::store::RedisMappingStore::connect(redis_url).await?;
        return Ok(Arc::new(store));
    }

    let store = Arc::new(MemoryMappingStore::new());
    store.spawn_janitor(config.mapping_ttl());
    Ok(store)
}
