use std::sync::Arc;

use quizmaster::config::Config;
use quizmaster::platform::Platform;
use quizmaster::services::{MemoryOracle, MemoryStorage, ModifierOracle, Storage};
use quizmaster::transport::{self, BroadcastSink};

/// The engine's entry-point.
///
/// Wires the in-memory service implementations to the platform facade
/// and runs the TCP transport until interrupted.
#[tokio::main]
async fn main() {
    env_logger::init(); // Use log::* to write to stdout/err

    let config = Config::load();

    let storage = Arc::new(MemoryStorage::new()) as Arc<dyn Storage>;
    let oracle = Arc::new(MemoryOracle::new()) as Arc<dyn ModifierOracle>;
    let sink = Arc::new(BroadcastSink::new());

    let platform = Platform::new(config.clone(), storage, oracle, sink.clone());

    log::info!("running transport loop...");
    tokio::select! {
        result = transport::serve(platform.clone(), sink, &config.bind_address) => {
            if let Err(err) = result {
                log::error!("transport failed: {}", err);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            log::info!("interrupted; tearing down active sessions");
            platform.registry().cleanup_all();
        }
    }
}
