use std::path::Path;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use live_classroom::api::{self, AppState};
use live_classroom::attendance::{AttendancePolicy, PresenceTracker};
use live_classroom::class::{ClassStore, InMemoryClassStore};
use live_classroom::clock::{Clock, SystemClock};
use live_classroom::config::Config;
use live_classroom::lifecycle::{
    spawn_periodic, FinalizeRetryJob, HeartbeatJob, LifecycleScheduler, RoomReaperJob,
};
use live_classroom::session::SessionRegistry;

#[tokio::main]
async fn main() {
    dotenv::dotenv().ok();
    init_tracing();

    let config = Config::from_env();
    if let Err(e) = config.validate() {
        tracing::error!(error = %e, "Refusing to start");
        std::process::exit(1);
    }

    let store = Arc::new(InMemoryClassStore::new());
    if let Some(seed) = &config.server.class_seed_file {
        if let Err(e) = store.load_seed_file(Path::new(seed)).await {
            tracing::error!(path = %seed, error = %e, "Failed to load class seed file");
        }
    }
    let store: Arc<dyn ClassStore> = store;
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    let tracker = Arc::new(PresenceTracker::new(
        store.clone(),
        AttendancePolicy {
            presence_threshold: config.session.presence_threshold,
        },
    ));
    let registry = SessionRegistry::new(
        store.clone(),
        tracker.clone(),
        clock.clone(),
        config.session.clone(),
    );
    let scheduler = LifecycleScheduler::new(
        store,
        registry.clone(),
        clock.clone(),
        config.scheduler.clone(),
    );

    let shutdown = CancellationToken::new();
    let jobs = vec![
        spawn_periodic(scheduler.clone(), config.scheduler.sweep_interval, shutdown.clone()),
        spawn_periodic(
            Arc::new(FinalizeRetryJob::new(tracker)),
            config.scheduler.finalize_retry_interval,
            shutdown.clone(),
        ),
        spawn_periodic(
            Arc::new(RoomReaperJob::new(registry.clone())),
            config.session.closed_room_retention,
            shutdown.clone(),
        ),
        spawn_periodic(
            Arc::new(HeartbeatJob::new(registry.clone())),
            config.scheduler.heartbeat_interval,
            shutdown.clone(),
        ),
    ];

    let bind_address = config.bind_address();
    let state = AppState {
        registry,
        scheduler,
        clock,
        config: Arc::new(config),
    };

    let server_shutdown = shutdown.clone();
    let (addr, server) = warp::serve(api::routes(state)).bind_with_graceful_shutdown(
        bind_address,
        async move {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = server_shutdown.cancelled() => {}
            }
        },
    );
    tracing::info!(addr = %addr, "Live classroom server listening");

    server.await;
    shutdown.cancel();
    for job in jobs {
        let _ = job.await;
    }
    tracing::info!("Live classroom server stopped");
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("live_classroom=info,warp=warn"));
    let json = std::env::var("LOG_FORMAT")
        .map(|v| v.eq_ignore_ascii_case("json"))
        .unwrap_or(false);

    if json {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
    }
}
