use std::sync::{Condvar, Mutex, PoisonError};
use std::thread;
use std::time::{Duration, Instant};

use log::{error, info, warn};

use crate::aggregate::{self, AggregationError, CombinationRules};
use crate::inverter::DeviceError;
use crate::pvoutput::{PvOutput, UploadRecord};
use crate::reading::InverterReading;
use crate::retry::RetryPolicy;
use crate::upload_transport::UploadTransport;

/// Anything the poll loop can draw a reading from.
pub trait ReadingSource: Sync {
    fn device_id(&self) -> String;
    fn fetch(&self) -> Result<InverterReading, DeviceError>;
}

/// Cooperative shutdown flag with interruptible waits. Cloned into the
/// signal handler; everything that sleeps in the poll loop sleeps through
/// [`Shutdown::wait`] so a signal wakes it immediately.
#[derive(Default)]
pub struct Shutdown {
    triggered: Mutex<bool>,
    condvar: Condvar,
}

impl Shutdown {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn trigger(&self) {
        let mut triggered = self.triggered.lock().unwrap_or_else(PoisonError::into_inner);
        *triggered = true;
        self.condvar.notify_all();
    }

    pub fn is_triggered(&self) -> bool {
        *self.triggered.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleep for up to `timeout`. Returns true when shutdown was triggered
    /// before or during the wait.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut triggered = self.triggered.lock().unwrap_or_else(PoisonError::into_inner);
        while !*triggered {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            triggered = self
                .condvar
                .wait_timeout(triggered, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        true
    }
}

/// What one poll cycle amounted to.
#[derive(Debug, PartialEq, Eq)]
pub enum CycleOutcome {
    /// An aggregated reading was uploaded; carries the contributing count.
    Uploaded { count: usize },
    /// No device answered; upload was skipped.
    NoReadings,
    /// Aggregation succeeded but the upload failed for good.
    UploadFailed,
}

/// Drives the fetch → aggregate → upload cycle on a fixed interval.
pub struct PollLoop<T: UploadTransport> {
    sources: Vec<Box<dyn ReadingSource>>,
    rules: CombinationRules,
    uploader: PvOutput<T>,
    retry: RetryPolicy,
    interval: Duration,
}

impl<T: UploadTransport> PollLoop<T> {
    pub fn new(
        sources: Vec<Box<dyn ReadingSource>>,
        rules: CombinationRules,
        uploader: PvOutput<T>,
        retry: RetryPolicy,
        interval: Duration,
    ) -> Self {
        Self {
            sources,
            rules,
            uploader,
            retry,
            interval,
        }
    }

    /// One full pass. Device failures only shrink the reading set; an empty
    /// set skips the upload. Nothing here outlives the cycle.
    pub fn run_cycle(&mut self, shutdown: &Shutdown) -> CycleOutcome {
        let readings = fetch_all(&self.sources);
        let aggregated = match aggregate::combine(&readings, &self.rules) {
            Ok(aggregated) => aggregated,
            Err(AggregationError::NoReadings) => {
                warn!("No inverter responded this cycle, skipping upload");
                return CycleOutcome::NoReadings;
            }
        };
        info!(
            "Aggregated {} device(s): {:.0} W, {:.2} kWh today",
            aggregated.count, aggregated.output_power_w, aggregated.energy_today_kwh
        );

        let record = UploadRecord::from_reading(&aggregated);
        match self.uploader.upload_with_retry(&record, &self.retry, shutdown) {
            Ok(()) => CycleOutcome::Uploaded {
                count: aggregated.count,
            },
            Err(e) => {
                error!("Upload failed: {e}");
                CycleOutcome::UploadFailed
            }
        }
    }

    /// Cycle until shutdown, sleeping out the rest of the interval between
    /// passes. Consecutive cycles never overlap.
    pub fn run(&mut self, shutdown: &Shutdown) {
        while !shutdown.is_triggered() {
            let started = Instant::now();
            self.run_cycle(shutdown);
            let pause = self.interval.saturating_sub(started.elapsed());
            if shutdown.wait(pause) {
                break;
            }
        }
        info!("Shutting down");
    }
}

/// Fetch from every source in parallel and keep whatever succeeded. Each
/// fetch bounds its own wait through its socket deadlines, so one slow
/// device cannot hold up the others.
fn fetch_all(sources: &[Box<dyn ReadingSource>]) -> Vec<InverterReading> {
    thread::scope(|scope| {
        let handles: Vec<_> = sources
            .iter()
            .map(|source| scope.spawn(move || (source.device_id(), source.fetch())))
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| match handle.join() {
                Ok((_, Ok(reading))) => Some(reading),
                Ok((device_id, Err(e))) => {
                    warn!("Fetch from {device_id} failed: {e}");
                    None
                }
                Err(_) => {
                    error!("A fetch task panicked");
                    None
                }
            })
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn wait_returns_immediately_when_already_triggered() {
        let shutdown = Shutdown::new();
        shutdown.trigger();
        let started = Instant::now();
        assert!(shutdown.wait(Duration::from_secs(60)));
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn wait_times_out_when_not_triggered() {
        let shutdown = Shutdown::new();
        assert!(!shutdown.wait(Duration::from_millis(10)));
    }

    #[test]
    fn trigger_wakes_a_waiting_thread() {
        let shutdown = Arc::new(Shutdown::new());
        let waiter = {
            let shutdown = Arc::clone(&shutdown);
            thread::spawn(move || shutdown.wait(Duration::from_secs(60)))
        };
        thread::sleep(Duration::from_millis(50));
        shutdown.trigger();
        assert!(waiter.join().unwrap());
    }
}
