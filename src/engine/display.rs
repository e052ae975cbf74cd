//! The display loop: a read-only consumer of statistics snapshots.
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::time;

use crate::engine::RunFlag;
use crate::stats::{CountersView, StatsAggregator};

/// How often the loop re-checks the running flag between renders, so shutdown
/// stays prompt at any render cadence.
const FLAG_POLL: Duration = Duration::from_millis(100);

/// Where snapshots go. Rendering itself is the caller's concern; the loop
/// only guarantees when snapshots are taken and that they are consistent.
pub trait ProgressSink: Send {
    /// Renders one mid-run snapshot.
    fn tick(&mut self, view: &CountersView);

    /// Renders the terminal snapshot once the run is over.
    fn finish(&mut self, view: &CountersView);
}

/// Polls the aggregator on `interval` while the flag is up, pushing each
/// snapshot into the sink.
///
/// Hands the sink back on exit: the caller drives [`ProgressSink::finish`]
/// with the terminal snapshot after the last worker has drained, so the final
/// frame never misses a late flush.
pub async fn display_loop(
    run: Arc<RunFlag>,
    stats: Arc<StatsAggregator>,
    interval: Duration,
    mut sink: Box<dyn ProgressSink>,
) -> Box<dyn ProgressSink> {
    let mut last_render = Instant::now();
    while run.is_running() {
        time::sleep(FLAG_POLL).await;
        if last_render.elapsed() >= interval {
            sink.tick(&stats.snapshot());
            last_render = Instant::now();
        }
    }
    sink
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    /// Collects every view it is shown.
    struct RecordingSink {
        ticks: Arc<Mutex<Vec<CountersView>>>,
        finished: Arc<Mutex<Option<CountersView>>>,
    }

    impl ProgressSink for RecordingSink {
        fn tick(&mut self, view: &CountersView) {
            self.ticks.lock().unwrap().push(*view);
        }

        fn finish(&mut self, view: &CountersView) {
            *self.finished.lock().unwrap() = Some(*view);
        }
    }

    #[tokio::test]
    async fn loop_renders_and_exits_on_flag() {
        let run = Arc::new(RunFlag::default());
        run.set(true);
        let stats = Arc::new(StatsAggregator::new());
        stats.update(5, 50, true);

        let ticks = Arc::new(Mutex::new(Vec::new()));
        let finished = Arc::new(Mutex::new(None));
        let sink = Box::new(RecordingSink {
            ticks: Arc::clone(&ticks),
            finished: Arc::clone(&finished),
        });

        let task = tokio::spawn(display_loop(
            Arc::clone(&run),
            Arc::clone(&stats),
            Duration::from_millis(200),
            sink,
        ));

        time::sleep(Duration::from_millis(700)).await;
        run.set(false);
        let mut sink = task.await.unwrap();
        sink.finish(&stats.snapshot());

        let rendered = ticks.lock().unwrap();
        assert!(!rendered.is_empty());
        assert!(rendered.iter().all(|view| view.total_ops == 5));
        assert_eq!(finished.lock().unwrap().unwrap().total_ops, 5);
    }
}
