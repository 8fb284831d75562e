//! Periodic game-time broadcast.
//!
//! One background thread per running game, tagged with the lifetime
//! generation that started it. `stop` signals the thread and joins it, so
//! once it returns no further tick can fire. Callers must not hold a lock
//! the tick closure needs while stopping.

use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::sync::Mutex;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, warn};

struct Running {
    generation: u64,
    stop: Sender<()>,
    handle: JoinHandle<()>,
}

pub struct GameTimeTicker {
    interval: Duration,
    running: Mutex<Option<Running>>,
}

impl GameTimeTicker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            running: Mutex::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Starts ticking for `generation`, replacing any ticker already running.
    pub fn start<F>(&self, generation: u64, tick: F)
    where
        F: Fn() + Send + 'static,
    {
        self.stop();

        let (stop, rx) = mpsc::channel::<()>();
        let interval = self.interval;
        let spawned = thread::Builder::new()
            .name("game-time-ticker".to_string())
            .spawn(move || loop {
                match rx.recv_timeout(interval) {
                    Err(RecvTimeoutError::Timeout) => tick(),
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
                }
            });

        match spawned {
            Ok(handle) => {
                if let Ok(mut running) = self.running.lock() {
                    *running = Some(Running {
                        generation,
                        stop,
                        handle,
                    });
                }
                debug!(
                    generation,
                    interval_ms = interval.as_millis() as u64,
                    "Game time ticker started"
                );
            }
            Err(err) => warn!(error = %err, "Failed to spawn game time ticker"),
        }
    }

    /// Stops and joins the ticker. Returns whether one was running.
    pub fn stop(&self) -> bool {
        self.stop_matching(|_| true)
    }

    /// Stops the ticker only if it still belongs to `generation`; a ticker
    /// started by a later lifetime keeps running.
    pub fn stop_if(&self, generation: u64) -> bool {
        self.stop_matching(|running| running == generation)
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .map(|running| running.is_some())
            .unwrap_or(false)
    }

    fn stop_matching(&self, matches: impl Fn(u64) -> bool) -> bool {
        let running = match self.running.lock() {
            Ok(mut running) => {
                let owned = running
                    .as_ref()
                    .is_some_and(|current| matches(current.generation));
                if owned {
                    running.take()
                } else {
                    None
                }
            }
            Err(_) => None,
        };
        let Some(running) = running else {
            return false;
        };
        let _ = running.stop.send(());
        if running.handle.join().is_err() {
            warn!("Game time ticker thread panicked");
        }
        debug!(generation = running.generation, "Game time ticker stopped");
        true
    }
}

impl Drop for GameTimeTicker {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[test]
    fn ticks_until_stopped() {
        let ticker = GameTimeTicker::new(Duration::from_millis(10));
        let ticks = Arc::new(AtomicUsize::new(0));
        let counter = ticks.clone();
        ticker.start(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(ticker.is_running());

        thread::sleep(Duration::from_millis(100));
        assert!(ticker.stop());
        let after_stop = ticks.load(Ordering::SeqCst);
        assert!(after_stop >= 1);

        thread::sleep(Duration::from_millis(50));
        assert_eq!(ticks.load(Ordering::SeqCst), after_stop);
        assert!(!ticker.is_running());
        assert!(!ticker.stop());
    }

    #[test]
    fn restart_replaces_running_ticker() {
        let ticker = GameTimeTicker::new(Duration::from_millis(5));
        let first = Arc::new(AtomicUsize::new(0));
        let counter = first.clone();
        ticker.start(1, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        ticker.start(2, || {});

        let frozen = first.load(Ordering::SeqCst);
        thread::sleep(Duration::from_millis(40));
        assert_eq!(first.load(Ordering::SeqCst), frozen);
        assert!(ticker.stop());
    }

    #[test]
    fn stale_generation_does_not_stop_newer_ticker() {
        let ticker = GameTimeTicker::new(Duration::from_millis(5));
        ticker.start(1, || {});
        ticker.start(3, || {});

        assert!(!ticker.stop_if(1));
        assert!(ticker.is_running());
        assert!(ticker.stop_if(3));
        assert!(!ticker.is_running());
    }
}
