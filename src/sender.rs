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
use tracing::{debug, info};
use crate::link::{self, SharedLink};
use crate::protocol::{self, Envelope, REPEAT_INTERVAL};
use crate::worker::{Outcome, Worker, WorkerContext, WorkerError, WorkerEvent, WorkerKind};

fn write_frame(link: &SharedLink, frame: &[u8]) -> Result<(), WorkerError> {
    let mut link = link::lock(link).map_err(WorkerError::LinkIo)?;
    link.write_all(frame).map_err(WorkerError::LinkIo)
}

fn progress(sent: u32, total: u32) -> u8 {
    (u64::from(sent) * 100 / u64::from(total)) as u8
}

// ============================================================================
// Text Sender
// ============================================================================

/// Sends one text message `repeat` times, one envelope per repeat
pub struct TextSender {
    link: SharedLink,
    message: String,
    repeat: u32,
    interval: Duration,
}

impl TextSender {
    /// A repeat count of zero is treated as one
    pub fn new(link: SharedLink, message: impl Into<String>, repeat: u32) -> Self {
        TextSender {
            link,
            message: message.into(),
            repeat: repeat.max(1),
            interval: REPEAT_INTERVAL,
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }
}

impl Worker for TextSender {
    fn kind(&self) -> WorkerKind {
        WorkerKind::TextSender
    }

    fn run(self: Box<Self>, ctx: &WorkerContext) -> Result<Outcome, WorkerError> {
        info!(repeat = self.repeat, bytes = self.message.len(), "sending text message");

        for n in 1..=self.repeat {
            if ctx.is_cancelled() {
                return Ok(Outcome::Stopped);
            }

            // Each repeat carries its own send time
            let frame = Envelope::new(self.message.as_str(), protocol::now()).encode()?;
            write_frame(&self.link, &frame)?;
            debug!(n, bytes = frame.len(), "sent envelope");

            ctx.emit(WorkerEvent::Progress(progress(n, self.repeat)));

            if n < self.repeat && ctx.sleep(self.interval) {
                return Ok(Outcome::Stopped);
            }
        }

        Ok(Outcome::Completed)
    }
}

// ============================================================================
// Image Sender
// ============================================================================

/// Writes a file to the link raw, in a single write.
///
/// A stop request is only seen before the write starts; once the bytes are
/// handed to the link the transfer runs to the end.
pub struct ImageSender {
    link: SharedLink,
    path: PathBuf,
}

impl ImageSender {
    pub fn new(link: SharedLink, path: impl Into<PathBuf>) -> Self {
        ImageSender { link, path: path.into() }
    }
}

impl Worker for ImageSender {
    fn kind(&self) -> WorkerKind {
        WorkerKind::ImageSender
    }

    fn run(self: Box<Self>, ctx: &WorkerContext) -> Result<Outcome, WorkerError> {
        if ctx.is_cancelled() {
            return Ok(Outcome::Stopped);
        }

        let bytes = fs::read(&self.path).map_err(|source| WorkerError::FileRead {
            path: self.path.clone(),
            source,
        })?;

        if ctx.is_cancelled() {
            return Ok(Outcome::Stopped);
        }

        write_frame(&self.link, &bytes)?;
        info!(path = %self.path.display(), bytes = bytes.len(), "image sent");
        Ok(Outcome::Completed)
    }
}

// ============================================================================
// Tests
// ============================================================================
