use std::sync::Weak;

use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration};

use crate::game::engine::SessionEngine;

/// Per-question countdown. Ticks once per second through the engine's
/// serialization point; the engine decrements the remaining time, fans
/// out `time-update`/`time-warning`, and ends the question at zero.
///
/// At most one clock is active per session. A clock carries the round
/// epoch it was started for, so a tick that outlives its round is
/// discarded by the engine instead of being delivered late.
pub struct RoundClock {
    handle: JoinHandle<()>,
}

impl RoundClock {
    /// Start ticking at a 1-second cadence for up to `deadline_secs`
    /// ticks. The loop stops early when the engine reports the round
    /// over (or gone).
    pub fn start(engine: Weak<SessionEngine>, epoch: u64, deadline_secs: u32) -> RoundClock {
        let handle = tokio::spawn(async move {
            for _ in 0..deadline_secs {
                sleep(Duration::from_secs(1)).await;
                let engine = match engine.upgrade() {
                    Some(engine) => engine,
                    None => return,
                };
                if !engine.on_clock_tick(epoch).await {
                    return;
                }
            }
        });
        RoundClock { handle }
    }

    /// Halt the clock without triggering the end of the question.
    pub fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for RoundClock {
    fn drop(&mut self) {
        self.handle.abort();
    }
}
