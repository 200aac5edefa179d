// beltsight-camera/src/prefetch.rs
use crate::{CameraError, ChannelOrder, Frame, FrameSource, Result};
use crossbeam_channel::{bounded, Receiver};
use std::thread::JoinHandle;

// back‑pressure: source → one-slot channel → consumer
const DEPTH: usize = 1;

/// Runs a blocking source on its own thread so the consumer never waits on
/// the camera while it is busy with something else (inference).
///
/// The reader stops after the first error or end of stream, or when the
/// `PrefetchSource` is dropped.
pub struct PrefetchSource {
    rx: Receiver<Result<Option<Frame>>>,
    width: u32,
    height: u32,
    channel_order: ChannelOrder,
    finished: bool,
    reader: Option<JoinHandle<()>>,
}

impl PrefetchSource {
    pub fn spawn<S>(mut source: S) -> Self
    where
        S: FrameSource + Send + 'static,
    {
        let (tx, rx) = bounded(DEPTH);
        let (width, height, channel_order) =
            (source.width(), source.height(), source.channel_order());

        let reader = std::thread::Builder::new()
            .name("frame-reader".into())
            .spawn(move || loop {
                let item = source.next_frame();
                let last = !matches!(item, Ok(Some(_)));
                if tx.send(item).is_err() || last {
                    break; // consumer dropped, or nothing more to read
                }
            });

        let reader = match reader {
            Ok(handle) => Some(handle),
            Err(e) => {
                log::error!("failed to spawn frame reader: {e}");
                None
            }
        };

        Self { rx, width, height, channel_order, finished: false, reader }
    }
}

impl FrameSource for PrefetchSource {
    fn width(&self) -> u32 {
        self.width
    }

    fn height(&self) -> u32 {
        self.height
    }

    fn channel_order(&self) -> ChannelOrder {
        self.channel_order
    }

    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.finished {
            return Ok(None);
        }
        match self.rx.recv() {
            Ok(Ok(Some(frame))) => Ok(Some(frame)),
            Ok(other) => {
                self.finished = true;
                other
            }
            Err(_) => {
                self.finished = true;
                Err(CameraError::Disconnected)
            }
        }
    }
}

impl Drop for PrefetchSource {
    fn drop(&mut self) {
        // unblock a reader parked on send() before joining it
        let (_, empty) = bounded(0);
        drop(std::mem::replace(&mut self.rx, empty));
        if let Some(handle) = self.reader.take() {
            let _ = handle.join();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ReplaySource;
    use std::time::Duration;

    #[test]
    fn forwards_frames_then_end_of_stream() {
        let frames = (0..5)
            .map(|i| Frame::filled(2, 2, ChannelOrder::Rgb, i, Duration::ZERO))
            .collect();
        let replay = ReplaySource::from_frames(frames, 10.0).unwrap();
        let mut src = PrefetchSource::spawn(replay);

        let mut values = Vec::new();
        while let Some(f) = src.next_frame().unwrap() {
            values.push(f.pixels[0]);
        }
        assert_eq!(values, vec![0, 1, 2, 3, 4]);
        assert!(src.next_frame().unwrap().is_none());
    }

    #[test]
    fn drop_while_reader_is_blocked() {
        let frames = (0..50)
            .map(|_| Frame::filled(2, 2, ChannelOrder::Rgb, 0, Duration::ZERO))
            .collect();
        let replay = ReplaySource::from_frames(frames, 10.0).unwrap();
        let mut src = PrefetchSource::spawn(replay);
        assert!(src.next_frame().unwrap().is_some());
        drop(src); // must not hang
    }
}
