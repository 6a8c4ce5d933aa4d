use log::debug;
use rand::{ rngs::StdRng, Rng, SeedableRng };
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{ interval_at, Instant, MissedTickBehavior };

/// Highest value the simulator may publish; completion is signalled by the
/// caller setting 100 directly.
pub const MAX_SIMULATED_PROGRESS: u8 = 89;
const MIN_TICK: Duration = Duration::from_millis(1);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ProgressConfig {
    pub tick: Duration,
    pub max_step: u8,
    pub ceiling: u8,
    pub seed: Option<u64>,
}

impl Default for ProgressConfig {
    fn default() -> Self {
        Self {
            tick: Duration::from_millis(500),
            max_step: 10,
            ceiling: MAX_SIMULATED_PROGRESS,
            seed: None,
        }
    }
}

/// Synthetic progress for calls that report nothing until they finish.
pub struct ProgressSimulator;

impl ProgressSimulator {
    /// Spawns the tick task. `on_tick` receives each new value; values are
    /// non-decreasing and never exceed the configured ceiling.
    pub fn start<F>(config: ProgressConfig, mut on_tick: F) -> ProgressHandle
        where F: FnMut(u8) + Send + 'static
    {
        let ceiling = config.ceiling.min(MAX_SIMULATED_PROGRESS);
        let max_step = config.max_step.max(1);
        let tick = config.tick.max(MIN_TICK);
        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        let task = tokio::spawn(async move {
            let mut ticker = interval_at(Instant::now() + tick, tick);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut current: u8 = 0;
            loop {
                ticker.tick().await;
                let step = rng.gen_range(1..=max_step);
                let next = current.saturating_add(step).min(ceiling);
                if next != current {
                    current = next;
                    on_tick(current);
                }
            }
        });

        ProgressHandle { task: Some(task) }
    }
}

/// Cancels the simulator when `cancel` is called or the handle is dropped.
/// Cancelling has no effect on the request being tracked.
pub struct ProgressHandle {
    task: Option<JoinHandle<()>>,
}

impl ProgressHandle {
    pub fn cancel(mut self) {
        self.abort();
    }

    fn abort(&mut self) {
        if let Some(task) = self.task.take() {
            debug!("Cancelling progress simulator");
            task.abort();
        }
    }
}

impl Drop for ProgressHandle {
    fn drop(&mut self) {
        self.abort();
    }
}
