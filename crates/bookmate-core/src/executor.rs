//! Background work with results marshaled back to the UI thread.
//!
//! The UI owns a [`UiLoop`] and drains it on its own thread. Workers never
//! touch UI state directly: they post a job through a [`UiQueue`] and the UI
//! thread runs it the next time it drains the loop.

use thiserror::Error;
use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;

pub type UiJob = Box<dyn FnOnce() + Send + 'static>;

#[derive(Debug, Error)]
pub enum BackgroundError {
    #[error("background task panicked: {0}")]
    Panicked(String),
    #[error("background task was cancelled")]
    Cancelled,
}

#[derive(Clone)]
pub struct UiQueue {
    tx: mpsc::UnboundedSender<UiJob>,
}

pub struct UiLoop {
    rx: mpsc::UnboundedReceiver<UiJob>,
}

pub fn ui_channel() -> (UiQueue, UiLoop) {
    let (tx, rx) = mpsc::unbounded_channel();
    (UiQueue { tx }, UiLoop { rx })
}

impl UiQueue {
    /// Schedules `job` on the UI thread. Returns false once the loop is gone.
    pub fn post(&self, job: impl FnOnce() + Send + 'static) -> bool {
        self.tx.send(Box::new(job)).is_ok()
    }
}

impl UiLoop {
    /// Runs every job that is already queued and returns how many ran.
    pub fn drain(&mut self) -> usize {
        let mut ran = 0;
        while let Ok(job) = self.rx.try_recv() {
            job();
            ran += 1;
        }
        ran
    }

    /// Blocks the calling (UI) thread until one job arrives, then runs it.
    /// Returns false when every queue handle has been dropped.
    pub fn run_next_blocking(&mut self) -> bool {
        match self.rx.blocking_recv() {
            Some(job) => {
                job();
                true
            }
            None => false,
        }
    }
}

/// Submits blocking work to the runtime's worker pool.
#[derive(Clone)]
pub struct Background {
    handle: Handle,
    ui: UiQueue,
}

impl Background {
    pub fn new(handle: Handle, ui: UiQueue) -> Self {
        Self { handle, ui }
    }

    pub fn ui(&self) -> &UiQueue {
        &self.ui
    }

    /// Runs `work` on a worker thread, then `continuation` on the UI thread.
    /// A panic in `work` reaches the continuation as an error instead of
    /// being lost.
    pub fn run<T, W, C>(&self, work: W, continuation: C) -> JoinHandle<()>
    where
        T: Send + 'static,
        W: FnOnce() -> T + Send + 'static,
        C: FnOnce(Result<T, BackgroundError>) + Send + 'static,
    {
        let ui = self.ui.clone();
        let blocking = self.handle.spawn_blocking(work);
        self.handle.spawn(async move {
            let result = blocking.await.map_err(|err| {
                if err.is_cancelled() {
                    BackgroundError::Cancelled
                } else {
                    BackgroundError::Panicked(err.to_string())
                }
            });
            if !ui.post(move || continuation(result)) {
                warn!("UI loop closed before background result was delivered");
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    fn runtime() -> tokio::runtime::Runtime {
        tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .build()
            .expect("build test runtime")
    }

    #[test]
    fn continuation_runs_on_draining_thread() {
        let rt = runtime();
        let (queue, mut ui_loop) = ui_channel();
        let background = Background::new(rt.handle().clone(), queue);
        let ui_thread = std::thread::current().id();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);

        background.run(
            || 21 * 2,
            move |result| {
                *sink.lock().expect("seen lock") =
                    Some((result.expect("work succeeds"), std::thread::current().id()));
            },
        );

        assert!(ui_loop.run_next_blocking());
        let (value, thread) = seen.lock().expect("seen lock").take().expect("continuation ran");
        assert_eq!(value, 42);
        assert_eq!(thread, ui_thread);
    }

    #[test]
    fn panicking_work_reports_failure() {
        let rt = runtime();
        let (queue, mut ui_loop) = ui_channel();
        let background = Background::new(rt.handle().clone(), queue);
        let failed = Arc::new(Mutex::new(false));
        let sink = Arc::clone(&failed);

        background.run(
            || -> u32 { panic!("construction exploded") },
            move |result| {
                *sink.lock().expect("failed lock") =
                    matches!(result, Err(BackgroundError::Panicked(_)));
            },
        );

        assert!(ui_loop.run_next_blocking());
        assert!(*failed.lock().expect("failed lock"));
    }

    #[test]
    fn drain_runs_only_queued_jobs() {
        let (queue, mut ui_loop) = ui_channel();
        let count = Arc::new(Mutex::new(0));
        for _ in 0..3 {
            let count = Arc::clone(&count);
            queue.post(move || *count.lock().expect("count lock") += 1);
        }
        assert_eq!(ui_loop.drain(), 3);
        assert_eq!(ui_loop.drain(), 0);
        assert_eq!(*count.lock().expect("count lock"), 3);
    }
}
