//! One execution context per job.

use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::Arc;
use std::thread;

use clock_core::Timestamp;
use crossbeam_channel::{Receiver, Sender};
use parking_lot::Mutex;

use crate::error::SchedulerError;
use crate::job::Job;
use crate::runtime_check::JobRuntimeCheck;
use crate::timer_scheduler::{CompletionSender, SchedulerTimer};

enum WakeMessage {
    Run { wakeup_time: Timestamp, done: Option<CompletionSender> },
    Stop,
}

struct TimerShared {
    name: String,
    cancelled: AtomicBool,
    // last simulation time the job actually ran; -1 means never
    last_call_time: AtomicI64,
}

struct StartupParts {
    wake_rx: Receiver<WakeMessage>,
    job: Arc<dyn Job>,
    check: JobRuntimeCheck,
}

/// OS thread owning one job, woken through a message channel.
///
/// A wake carries the simulation time of the invocation and optionally a
/// completion sender, which the lock-step drain blocks on. Wakes for a time
/// the job already ran at are acknowledged without running it again.
pub struct TimerThread {
    shared: Arc<TimerShared>,
    wake_tx: Sender<WakeMessage>,
    startup: Mutex<Option<StartupParts>>,
    handle: Mutex<Option<thread::JoinHandle<()>>>,
}

impl TimerThread {
    pub fn new(name: impl Into<String>, job: Arc<dyn Job>, check: JobRuntimeCheck) -> Arc<Self> {
        let (wake_tx, wake_rx) = crossbeam_channel::unbounded();
        Arc::new(Self {
            shared: Arc::new(TimerShared {
                name: name.into(),
                cancelled: AtomicBool::new(false),
                last_call_time: AtomicI64::new(-1),
            }),
            wake_tx,
            startup: Mutex::new(Some(StartupParts { wake_rx, job, check })),
            handle: Mutex::new(None),
        })
    }

    pub fn name(&self) -> &str {
        &self.shared.name
    }

    /// Spawns the execution thread. Wakes sent before start stay queued.
    pub fn start(&self) -> Result<(), SchedulerError> {
        let Some(parts) = self.startup.lock().take() else {
            return Err(SchedulerError::InvalidState(format!(
                "timer {} was already started",
                self.shared.name
            )));
        };
        let shared = self.shared.clone();
        *self.handle.lock() =
            Some(thread::spawn(move || Self::run(shared, parts.wake_rx, parts.job, parts.check)));
        Ok(())
    }

    fn run(
        shared: Arc<TimerShared>,
        wake_rx: Receiver<WakeMessage>,
        job: Arc<dyn Job>,
        check: JobRuntimeCheck,
    ) {
        while let Ok(message) = wake_rx.recv() {
            match message {
                WakeMessage::Stop => break,
                WakeMessage::Run { wakeup_time, done } => {
                    if shared.cancelled.load(Ordering::SeqCst) {
                        if let Some(done) = done {
                            let _ = done.send(());
                        }
                        break;
                    }

                    let last_call = shared.last_call_time.load(Ordering::SeqCst);
                    if last_call == -1 || wakeup_time > last_call {
                        if let Err(error) = check.run_job(wakeup_time, job.as_ref()) {
                            tracing::debug!(
                                timer = %shared.name,
                                %error,
                                "job invocation ended with an error"
                            );
                        }
                        shared.last_call_time.store(wakeup_time, Ordering::SeqCst);
                    }

                    if let Some(done) = done {
                        let _ = done.send(());
                    }
                }
            }
        }
    }

    /// Stops the execution thread. Joins when called from another thread;
    /// a timer stopping itself detaches instead, to avoid a self-join.
    pub fn stop(&self) {
        self.shared.cancelled.store(true, Ordering::SeqCst);
        let _ = self.wake_tx.send(WakeMessage::Stop);
        if let Some(handle) = self.handle.lock().take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

impl SchedulerTimer for TimerThread {
    fn wake_up(&self, wakeup_time: Timestamp, done: Option<CompletionSender>) {
        let _ = self.wake_tx.send(WakeMessage::Run { wakeup_time, done });
    }

    fn reset(&self) {
        self.shared.last_call_time.store(-1, Ordering::SeqCst);
    }
}

impl Drop for TimerThread {
    fn drop(&mut self) {
        self.stop();
    }
}
