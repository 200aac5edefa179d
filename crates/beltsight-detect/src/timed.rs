// beltsight-detect/src/timed.rs
//
// Inference on a dedicated worker thread with a bounded wait.
//   caller ──request (cap 1)──▶ worker ──result (cap 1)──▶ caller
// At most one request is ever outstanding. A call that times out leaves its
// request in flight; the next call collects (and drops) the late result
// before submitting, or reports Busy if the worker is still on it.

use crate::{DetectError, Inference, Result};
use crossbeam_channel::{bounded, Receiver, RecvTimeoutError, Sender, TryRecvError};
use ndarray::{Array4, ArrayD};
use std::thread::JoinHandle;
use std::time::Duration;

pub struct TimedInference {
    requests: Option<Sender<Array4<f32>>>,
    results: Receiver<Result<ArrayD<f32>>>,
    timeout: Duration,
    in_flight: bool,
    worker: Option<JoinHandle<()>>,
}

impl TimedInference {
    pub fn spawn<I>(mut backend: I, timeout: Duration) -> Result<Self>
    where
        I: Inference + Send + 'static,
    {
        let (req_tx, req_rx) = bounded::<Array4<f32>>(1);
        let (res_tx, res_rx) = bounded(1);

        let worker = std::thread::Builder::new()
            .name("inference".into())
            .spawn(move || {
                while let Ok(input) = req_rx.recv() {
                    if res_tx.send(backend.infer(input)).is_err() {
                        break;
                    }
                }
                log::debug!("inference worker shutting down");
            })
            .map_err(|e| DetectError::Backend(format!("spawn inference worker: {e}")))?;

        Ok(Self {
            requests: Some(req_tx),
            results: res_rx,
            timeout,
            in_flight: false,
            worker: Some(worker),
        })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn in_flight(&self) -> bool {
        self.in_flight
    }
}

impl Inference for TimedInference {
    fn infer(&mut self, input: Array4<f32>) -> Result<ArrayD<f32>> {
        if self.in_flight {
            match self.results.try_recv() {
                Ok(_) => {
                    log::debug!("dropped late inference result");
                    self.in_flight = false;
                }
                Err(TryRecvError::Empty) => return Err(DetectError::Busy),
                Err(TryRecvError::Disconnected) => return Err(DetectError::WorkerGone),
            }
        }

        let requests = self.requests.as_ref().ok_or(DetectError::WorkerGone)?;
        requests.send(input).map_err(|_| DetectError::WorkerGone)?;
        self.in_flight = true;

        match self.results.recv_timeout(self.timeout) {
            Ok(result) => {
                self.in_flight = false;
                result
            }
            Err(RecvTimeoutError::Timeout) => Err(DetectError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                self.in_flight = false;
                Err(DetectError::WorkerGone)
            }
        }
    }
}

impl Drop for TimedInference {
    fn drop(&mut self) {
        // closing the request side ends the worker loop after its current call
        self.requests.take();
        if let Some(worker) = self.worker.take() {
            let _ = worker.join();
        }
    }
}
