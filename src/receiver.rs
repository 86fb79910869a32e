// Copyright (C) 2026 Brian Johnson
//
// This program is free software; you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation; either version 2 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License along
// with this program; if not, write to the Free Software Foundation, Inc.,
// 51 Franklin Street, Fifth Floor, Boston, MA 02110-1301 USA.


use std::fs;
use std::path::PathBuf;
use std::time::Duration;
use image::ImageFormat;
use tracing::{debug, info, warn};
use crate::link::{self, SharedLink};
use crate::protocol::{self, Envelope, DEFAULT_POLL_TIMEOUT, IMAGE_FILE_STEM};
use crate::transfer_log::{TransferLog, TransferRecord};
use crate::worker::{Outcome, Worker, WorkerContext, WorkerError, WorkerEvent, WorkerKind};

/// One bounded read. The lock is released before returning so senders can
/// use the link between polls.
fn poll(link: &SharedLink, timeout: Duration) -> Result<Vec<u8>, WorkerError> {
    let mut link = link::lock(link).map_err(WorkerError::LinkIo)?;
    link.read_timeout(timeout).map_err(WorkerError::LinkIo)
}

// ============================================================================
// Text Receiver
// ============================================================================

/// Receives text envelopes until stopped, logging size and latency of each
pub struct TextReceiver {
    link: SharedLink,
    log: TransferLog,
    poll_timeout: Duration,
}

impl TextReceiver {
    pub fn new(link: SharedLink, log: TransferLog) -> Self {
        TextReceiver { link, log, poll_timeout: DEFAULT_POLL_TIMEOUT }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

impl Worker for TextReceiver {
    fn kind(&self) -> WorkerKind {
        WorkerKind::TextReceiver
    }

    fn run(self: Box<Self>, ctx: &WorkerContext) -> Result<Outcome, WorkerError> {
        let mut receiver = *self;
        info!(log = %receiver.log.path().display(), "text receiver listening");

        loop {
            if ctx.is_cancelled() {
                return Ok(Outcome::Stopped);
            }

            let frame = poll(&receiver.link, receiver.poll_timeout)?;
            if frame.is_empty() {
                continue;
            }
            let received_at = protocol::now();

            let envelope = match Envelope::decode(&frame) {
                Ok(envelope) => envelope,
                Err(e) => {
                    warn!(bytes = frame.len(), error = %e, "discarding malformed frame");
                    continue;
                }
            };

            // Clocks of two machines may disagree, so this can be negative
            let latency = received_at - envelope.sent_at;
            info!(declared_size = envelope.declared_size, latency, "message received");

            let record = TransferRecord {
                byte_size: envelope.declared_size,
                transmission_time: latency,
            };
            ctx.emit(WorkerEvent::MessageReceived {
                message: envelope.message,
                latency,
                declared_size: envelope.declared_size,
            });

            receiver.log.append(record).map_err(|source| WorkerError::FileWrite {
                path: receiver.log.path().to_path_buf(),
                source,
            })?;
        }
    }
}

// ============================================================================
// Image Receiver
// ============================================================================

/// Receives raw images until stopped.
///
/// Every non-empty read is decoded on its own: an image split across two
/// reads is discarded as two fragments rather than reassembled.
pub struct ImageReceiver {
    link: SharedLink,
    output_dir: PathBuf,
    poll_timeout: Duration,
}

impl ImageReceiver {
    pub fn new(link: SharedLink, output_dir: impl Into<PathBuf>) -> Self {
        ImageReceiver {
            link,
            output_dir: output_dir.into(),
            poll_timeout: DEFAULT_POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }
}

impl Worker for ImageReceiver {
    fn kind(&self) -> WorkerKind {
        WorkerKind::ImageReceiver
    }

    fn run(self: Box<Self>, ctx: &WorkerContext) -> Result<Outcome, WorkerError> {
        info!(output_dir = %self.output_dir.display(), "image receiver listening");

        loop {
            if ctx.is_cancelled() {
                return Ok(Outcome::Stopped);
            }

            let buffer = poll(&self.link, self.poll_timeout)?;
            if buffer.is_empty() {
                continue;
            }

            let Some(format) = decode_image(&buffer) else {
                debug!(bytes = buffer.len(), "not a decodable image, discarding");
                continue;
            };

            let path = self.output_dir.join(image_file_name(format));
            fs::write(&path, &buffer).map_err(|source| WorkerError::FileWrite {
                path: path.clone(),
                source,
            })?;
            info!(path = %path.display(), bytes = buffer.len(), ?format, "image received");

            ctx.emit(WorkerEvent::ImageReceived { path });
        }
    }
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Returns the image's native format if the bytes fully decode
fn decode_image(bytes: &[u8]) -> Option<ImageFormat> {
    let format = image::guess_format(bytes).ok()?;
    image::load_from_memory_with_format(bytes, format).ok()?;
    Some(format)
}

fn image_file_name(format: ImageFormat) -> String {
    let ext = format.extensions_str().first().copied().unwrap_or("img");
    format!("{}.{}", IMAGE_FILE_STEM, ext)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;
    use std::sync::mpsc::{self, Receiver};
    use std::thread::{self, JoinHandle};
    use image::{DynamicImage, Rgb, RgbImage};
    use crate::link::{Link, MockLink, MockProbe, share};
    use crate::worker::CancelToken;

    const WAIT: Duration = Duration::from_secs(5);
    const QUIET: Duration = Duration::from_millis(100);

    fn spawn(worker: Box<dyn Worker>) -> (JoinHandle<Result<Outcome, WorkerError>>, CancelToken, Receiver<WorkerEvent>) {
        let (tx, rx) = mpsc::channel();
        let cancel = CancelToken::new();
        let ctx = WorkerContext::new(worker.kind(), cancel.clone(), tx);
        let handle = thread::spawn(move || worker.run(&ctx));
        (handle, cancel, rx)
    }

    fn image_bytes(format: ImageFormat) -> Vec<u8> {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(4, 4, Rgb([200, 40, 10])));
        let mut buffer = Vec::new();
        img.write_to(&mut Cursor::new(&mut buffer), format).unwrap();
        buffer
    }

    fn text_receiver(reads: Vec<Option<Vec<u8>>>, log_path: &std::path::Path) -> (Box<dyn Worker>, MockProbe) {
        let (mock, probe) = MockLink::new(reads);
        let log = TransferLog::create(log_path).unwrap();
        let worker = TextReceiver::new(share(mock), log).with_poll_timeout(Duration::from_millis(10));
        (Box::new(worker), probe)
    }

    #[test]
    fn test_image_file_name() {
        assert_eq!(image_file_name(ImageFormat::Png), "receivedImage.png");
        assert_eq!(image_file_name(ImageFormat::Jpeg), "receivedImage.jpg");
        assert_eq!(image_file_name(ImageFormat::Gif), "receivedImage.gif");
    }

    #[test]
    fn test_decode_image() {
        assert_eq!(decode_image(&image_bytes(ImageFormat::Png)), Some(ImageFormat::Png));
        assert_eq!(decode_image(b"definitely not an image"), None);

        // Valid signature, truncated body
        let png = image_bytes(ImageFormat::Png);
        assert_eq!(decode_image(&png[..png.len() / 2]), None);
    }

    #[test]
    fn test_text_receiver_skips_malformed_frame() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let sent_at = protocol::now();
        let valid = Envelope::new("ping", sent_at).encode().unwrap();

        let (worker, probe) = text_receiver(
            vec![Some(b"\x13\x00\x00\x00garbage".to_vec()), None, Some(valid)],
            &log_path,
        );
        let (handle, cancel, rx) = spawn(worker);

        match rx.recv_timeout(WAIT).unwrap() {
            WorkerEvent::MessageReceived { message, latency, declared_size } => {
                assert_eq!(message, "ping");
                assert_eq!(declared_size, 4);
                assert!(latency >= 0.0);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        probe.wait_drained(WAIT);
        assert!(rx.recv_timeout(QUIET).is_err());
        cancel.cancel();
        assert_eq!(handle.join().unwrap().unwrap(), Outcome::Stopped);

        let contents = fs::read_to_string(&log_path).unwrap();
        let rows: Vec<&str> = contents.lines().collect();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0], "Byte_Size,Transmission_time");
        assert!(rows[1].starts_with("4,"));
    }

    #[test]
    fn test_text_receiver_reports_declared_size() {
        let dir = tempfile::tempdir().unwrap();
        let log_path = dir.path().join("log.csv");
        let mut frame = Vec::new();
        bson::doc! { "message": "hello", "timestamp": protocol::now(), "messageSize": 54_i32 }
            .to_writer(&mut frame)
            .unwrap();

        let (worker, _probe) = text_receiver(vec![Some(frame)], &log_path);
        let (handle, cancel, rx) = spawn(worker);

        match rx.recv_timeout(WAIT).unwrap() {
            WorkerEvent::MessageReceived { message, declared_size, .. } => {
                assert_eq!(message, "hello");
                assert_eq!(declared_size, 54);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        cancel.cancel();
        handle.join().unwrap().unwrap();

        let contents = fs::read_to_string(&log_path).unwrap();
        assert!(contents.lines().nth(1).unwrap().starts_with("54,"));
    }

    #[test]
    fn test_text_receiver_stops_within_one_poll() {
        let dir = tempfile::tempdir().unwrap();
        let (worker, _probe) = text_receiver(Vec::new(), &dir.path().join("log.csv"));
        let (handle, cancel, rx) = spawn(worker);

        thread::sleep(Duration::from_millis(30));
        let start = std::time::Instant::now();
        cancel.cancel();

        assert_eq!(handle.join().unwrap().unwrap(), Outcome::Stopped);
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_text_receiver_fails_on_closed_link() {
        let dir = tempfile::tempdir().unwrap();
        let (mut mock, _probe) = MockLink::new(Vec::new());
        mock.close().unwrap();
        let log = TransferLog::create(dir.path().join("log.csv")).unwrap();
        let (handle, _cancel, _rx) = spawn(Box::new(TextReceiver::new(share(mock), log)));

        match handle.join().unwrap() {
            Err(WorkerError::LinkIo(e)) => assert_eq!(e.kind(), std::io::ErrorKind::NotConnected),
            other => panic!("expected link failure, got {:?}", other),
        }
    }

    #[test]
    fn test_image_receiver_saves_each_image() {
        let dir = tempfile::tempdir().unwrap();
        let png = image_bytes(ImageFormat::Png);
        let jpeg = image_bytes(ImageFormat::Jpeg);

        let (mock, probe) = MockLink::new(vec![Some(png.clone()), None, Some(jpeg.clone())]);
        let worker = ImageReceiver::new(share(mock), dir.path())
            .with_poll_timeout(Duration::from_millis(10));
        let (handle, cancel, rx) = spawn(Box::new(worker));

        match rx.recv_timeout(WAIT).unwrap() {
            WorkerEvent::ImageReceived { path } => {
                assert_eq!(path, dir.path().join("receivedImage.png"));
                assert_eq!(fs::read(&path).unwrap(), png);
            }
            other => panic!("unexpected event: {:?}", other),
        }
        match rx.recv_timeout(WAIT).unwrap() {
            WorkerEvent::ImageReceived { path } => {
                assert_eq!(path, dir.path().join("receivedImage.jpg"));
                assert_eq!(fs::read(&path).unwrap(), jpeg);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        probe.wait_drained(WAIT);
        cancel.cancel();
        assert_eq!(handle.join().unwrap().unwrap(), Outcome::Stopped);
    }

    #[test]
    fn test_image_receiver_overwrites_previous_image() {
        let dir = tempfile::tempdir().unwrap();
        let first = image_bytes(ImageFormat::Png);
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(8, 2, Rgb([0, 0, 255])));
        let mut second = Vec::new();
        img.write_to(&mut Cursor::new(&mut second), ImageFormat::Png).unwrap();

        let (mock, _probe) = MockLink::new(vec![Some(first), Some(second.clone())]);
        let worker = ImageReceiver::new(share(mock), dir.path())
            .with_poll_timeout(Duration::from_millis(10));
        let (handle, cancel, rx) = spawn(Box::new(worker));

        for _ in 0..2 {
            assert!(matches!(rx.recv_timeout(WAIT).unwrap(), WorkerEvent::ImageReceived { .. }));
        }
        cancel.cancel();
        handle.join().unwrap().unwrap();

        assert_eq!(fs::read(dir.path().join("receivedImage.png")).unwrap(), second);
    }

    #[test]
    fn test_image_receiver_ignores_undecodable_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let (mock, probe) = MockLink::new(vec![Some(b"\x89PNG but not really".to_vec())]);
        let worker = ImageReceiver::new(share(mock), dir.path())
            .with_poll_timeout(Duration::from_millis(10));
        let (handle, cancel, rx) = spawn(Box::new(worker));

        probe.wait_drained(WAIT);
        assert!(rx.recv_timeout(QUIET).is_err());
        assert!(!handle.is_finished());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);

        cancel.cancel();
        assert_eq!(handle.join().unwrap().unwrap(), Outcome::Stopped);
    }

    #[test]
    fn test_image_receiver_unwritable_output() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("no_such_dir");
        let (mock, _probe) = MockLink::new(vec![Some(image_bytes(ImageFormat::Png))]);
        let worker = ImageReceiver::new(share(mock), &missing)
            .with_poll_timeout(Duration::from_millis(10));
        let (handle, _cancel, rx) = spawn(Box::new(worker));

        match handle.join().unwrap() {
            Err(WorkerError::FileWrite { path, .. }) => {
                assert_eq!(path, missing.join("receivedImage.png"));
            }
            other => panic!("expected file write failure, got {:?}", other),
        }
        assert!(rx.try_recv().is_err());
    }
}
