use super::types::{ModelLoader, ModelStatus, SegmentationModel};
use crate::error::{Error, Result};
use crate::frame::{Frame, FrameId, Mask};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TryRecvError};
use parking_lot::{Condvar, Mutex};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Job {
    frame: Frame,
    reply: Sender<Result<Mask>>,
}

struct Shared {
    status: ModelStatus,
    /// Why the adapter last went to `Failed`
    failure: Option<Arc<Error>>,
    jobs: Option<Sender<Job>>,
    /// Bumped on every (re)initialization and on shutdown; a worker only
    /// publishes status for its own generation
    generation: u64,
}

struct Inner {
    shared: Mutex<Shared>,
    changed: Condvar,
    outstanding: AtomicBool,
}

impl Inner {
    fn publish(&self, generation: u64, status: ModelStatus) {
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return;
        }
        shared.status = status;
        self.changed.notify_all();
    }

    fn fail(&self, generation: u64, error: Error) {
        tracing::warn!("{}", error);
        let mut shared = self.shared.lock();
        if shared.generation != generation {
            return;
        }
        shared.status = ModelStatus::Failed;
        shared.failure = Some(Arc::new(error));
        shared.jobs = None;
        self.changed.notify_all();
    }
}

/// Asynchronous, fault-tolerant front for a segmentation model
///
/// The model lives on a dedicated worker thread. At most one mask request is
/// outstanding at a time; results come back through a [`PendingMask`] that
/// the caller polls without blocking.
pub struct SegmentationAdapter {
    loader: ModelLoader,
    inner: Arc<Inner>,
}

impl SegmentationAdapter {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            inner: Arc::new(Inner {
                shared: Mutex::new(Shared {
                    status: ModelStatus::Uninitialized,
                    failure: None,
                    jobs: None,
                    generation: 0,
                }),
                changed: Condvar::new(),
                outstanding: AtomicBool::new(false),
            }),
        }
    }

    pub fn from_fn<F>(loader: F) -> Self
    where
        F: Fn() -> anyhow::Result<Box<dyn SegmentationModel>> + Send + Sync + 'static,
    {
        Self::new(Arc::new(loader))
    }

    /// Start loading the model in the background
    ///
    /// Idempotent: while a load is in flight or the model is ready this does
    /// nothing. After a failure it starts a fresh load.
    pub fn initialize(&self) -> Result<()> {
        let mut shared = self.inner.shared.lock();
        match shared.status {
            ModelStatus::Loading | ModelStatus::Ready => return Ok(()),
            ModelStatus::Uninitialized | ModelStatus::Failed => {}
        }

        shared.generation += 1;
        let generation = shared.generation;
        let (jobs_tx, jobs_rx) = crossbeam_channel::bounded::<Job>(1);
        let loader = Arc::clone(&self.loader);
        let inner = Arc::clone(&self.inner);

        std::thread::Builder::new()
            .name("segmentation".into())
            .spawn(move || run_worker(loader, inner, jobs_rx, generation))?;

        tracing::info!("Segmentation model loading");
        shared.status = ModelStatus::Loading;
        shared.failure = None;
        shared.jobs = Some(jobs_tx);
        self.inner.outstanding.store(false, Ordering::Release);
        self.inner.changed.notify_all();
        Ok(())
    }

    pub fn status(&self) -> ModelStatus {
        self.inner.shared.lock().status
    }

    /// The error behind the current `Failed` status
    pub fn failure(&self) -> Option<Arc<Error>> {
        self.inner.shared.lock().failure.clone()
    }

    /// Block until loading settles or `timeout` passes; returns the status
    pub fn wait_settled(&self, timeout: Duration) -> ModelStatus {
        let deadline = Instant::now() + timeout;
        let mut shared = self.inner.shared.lock();
        while shared.status == ModelStatus::Loading {
            if self.inner.changed.wait_until(&mut shared, deadline).timed_out() {
                break;
            }
        }
        shared.status
    }

    /// Whether a request is in flight
    pub fn is_busy(&self) -> bool {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Queue `frame` for segmentation
    ///
    /// Fails with `ModelNotReady` unless the model is loaded and with
    /// `RequestOutstanding` while a previous request is unresolved.
    pub fn request_mask(&self, frame: &Frame) -> Result<PendingMask> {
        let shared = self.inner.shared.lock();
        if shared.status != ModelStatus::Ready {
            return Err(Error::ModelNotReady);
        }
        let Some(jobs) = shared.jobs.as_ref() else {
            return Err(Error::ModelNotReady);
        };

        if self.inner.outstanding.swap(true, Ordering::AcqRel) {
            return Err(Error::RequestOutstanding);
        }

        let (reply, result) = crossbeam_channel::bounded(1);
        let job = Job {
            frame: frame.clone(),
            reply,
        };

        if jobs.try_send(job).is_err() {
            self.inner.outstanding.store(false, Ordering::Release);
            return Err(Error::ModelNotReady);
        }

        tracing::trace!("Requested mask for frame {}", frame.id());
        Ok(PendingMask {
            frame: frame.clone(),
            result,
        })
    }

    /// Stop the worker; results still in flight are dropped
    pub fn shutdown(&self) {
        let mut shared = self.inner.shared.lock();
        if shared.status == ModelStatus::Uninitialized {
            return;
        }
        shared.generation += 1;
        shared.jobs = None;
        shared.status = ModelStatus::Uninitialized;
        self.inner.changed.notify_all();
        tracing::debug!("Segmentation adapter shut down");
    }
}

impl Drop for SegmentationAdapter {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn run_worker(loader: ModelLoader, inner: Arc<Inner>, jobs: Receiver<Job>, generation: u64) {
    let mut model = match loader() {
        Ok(model) => model,
        Err(err) => {
            inner.fail(generation, Error::ModelLoad(format!("{:#}", err)));
            return;
        }
    };

    let (width, height) = model.input_size();
    tracing::info!("Segmentation model ready ({}x{} input)", width, height);
    inner.publish(generation, ModelStatus::Ready);

    let mut last_size = None;
    for job in jobs.iter() {
        let size = job.frame.dimensions();
        if last_size.is_some_and(|last| last != size) {
            model.reset_state();
        }
        last_size = Some(size);

        let result = {
            let _span = tracing::debug_span!("segment", frame = job.frame.id().0).entered();
            model.segment(job.frame.pixels())
        };

        match result {
            Ok(mask) => {
                inner.outstanding.store(false, Ordering::Release);
                if job.reply.send(Ok(mask)).is_err() {
                    tracing::trace!("Mask for frame {} dropped, requester gone", job.frame.id());
                }
            }
            Err(err) => {
                let message = format!("frame {}: {:#}", job.frame.id(), err);
                inner.fail(generation, Error::Segmentation(message.clone()));
                inner.outstanding.store(false, Ordering::Release);
                if job.reply.send(Err(Error::Segmentation(message))).is_err() {
                    tracing::trace!("Failure for frame {} dropped, requester gone", job.frame.id());
                }
                return;
            }
        }
    }

    tracing::debug!("Segmentation worker stopped");
}

/// Outcome of polling a [`PendingMask`]
#[derive(Debug)]
pub enum MaskPoll {
    Pending,
    Ready(Mask),
    Failed(Error),
}

/// An unresolved mask request and the frame it was issued for
pub struct PendingMask {
    frame: Frame,
    result: Receiver<Result<Mask>>,
}

impl PendingMask {
    pub fn frame(&self) -> &Frame {
        &self.frame
    }

    pub fn frame_id(&self) -> FrameId {
        self.frame.id()
    }

    /// Whether a result has arrived
    pub fn is_resolved(&self) -> bool {
        !self.result.is_empty()
    }

    /// Non-blocking check for the result
    pub fn poll(&self) -> MaskPoll {
        match self.result.try_recv() {
            Ok(Ok(mask)) => MaskPoll::Ready(mask),
            Ok(Err(err)) => MaskPoll::Failed(err),
            Err(TryRecvError::Empty) => MaskPoll::Pending,
            Err(TryRecvError::Disconnected) => MaskPoll::Failed(Self::worker_gone()),
        }
    }

    /// Wait up to `timeout` for the result
    pub fn wait(&self, timeout: Duration) -> MaskPoll {
        match self.result.recv_timeout(timeout) {
            Ok(Ok(mask)) => MaskPoll::Ready(mask),
            Ok(Err(err)) => MaskPoll::Failed(err),
            Err(RecvTimeoutError::Timeout) => MaskPoll::Pending,
            Err(RecvTimeoutError::Disconnected) => MaskPoll::Failed(Self::worker_gone()),
        }
    }

    fn worker_gone() -> Error {
        Error::Segmentation("worker stopped before replying".into())
    }
}
