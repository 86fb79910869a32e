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


//! Shared pieces of every transfer worker: kinds, states, events and
//! cooperative cancellation

use std::fmt;
use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::mpsc::Sender;
use std::sync::{Arc, Condvar, Mutex, PoisonError};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::trace;
use crate::protocol::EnvelopeError;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error("link I/O error: {0}")]
    LinkIo(#[source] io::Error),
    #[error("cannot read {}: {source}", .path.display())]
    FileRead {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("cannot write {}: {source}", .path.display())]
    FileWrite {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error(transparent)]
    Encode(#[from] EnvelopeError),
}

// ============================================================================
// Kinds, States and Events
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkerKind {
    TextSender,
    TextReceiver,
    ImageSender,
    ImageReceiver,
}

impl WorkerKind {
    pub const ALL: [WorkerKind; 4] = [
        WorkerKind::TextSender,
        WorkerKind::TextReceiver,
        WorkerKind::ImageSender,
        WorkerKind::ImageReceiver,
    ];

    pub fn name(self) -> &'static str {
        match self {
            WorkerKind::TextSender => "textSender",
            WorkerKind::TextReceiver => "textReceiver",
            WorkerKind::ImageSender => "imageSender",
            WorkerKind::ImageReceiver => "imageReceiver",
        }
    }
}

impl fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Debug, Error)]
#[error("unknown worker kind '{0}'")]
pub struct UnknownKind(String);

impl FromStr for WorkerKind {
    type Err = UnknownKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WorkerKind::ALL
            .into_iter()
            .find(|kind| kind.name() == s)
            .ok_or_else(|| UnknownKind(s.to_string()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Running,
    Completed,
    Stopped,
    Failed,
}

/// Everything a worker reports to the application
#[derive(Debug)]
pub enum WorkerEvent {
    /// Percentage of repeats written so far
    Progress(u8),
    MessageReceived {
        message: String,
        latency: f64,
        declared_size: i64,
    },
    /// An image was decoded and saved; the receiver keeps listening
    ImageReceived { path: PathBuf },
    Done,
    Stopped,
    Failed(WorkerError),
}

impl WorkerEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, WorkerEvent::Done | WorkerEvent::Stopped | WorkerEvent::Failed(_))
    }
}

/// How a worker's run loop ended when it did not fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Completed,
    Stopped,
}

// ============================================================================
// Cancellation
// ============================================================================

/// Cooperative stop request shared between a worker and the registry
#[derive(Clone, Default)]
pub struct CancelToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, wake) = &*self.inner;
        *flag.lock().unwrap_or_else(PoisonError::into_inner) = true;
        wake.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        *self.inner.0.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sleeps for `duration` or until cancelled. Returns true if cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let deadline = Instant::now() + duration;
        let (flag, wake) = &*self.inner;
        let mut cancelled = flag.lock().unwrap_or_else(PoisonError::into_inner);
        while !*cancelled {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            cancelled = wake
                .wait_timeout(cancelled, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
        *cancelled
    }
}

// ============================================================================
// Worker Trait
// ============================================================================

/// Handle a running worker uses to report events and check for cancellation
pub struct WorkerContext {
    kind: WorkerKind,
    cancel: CancelToken,
    events: Sender<WorkerEvent>,
}

impl WorkerContext {
    pub fn new(kind: WorkerKind, cancel: CancelToken, events: Sender<WorkerEvent>) -> Self {
        WorkerContext { kind, cancel, events }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub fn sleep(&self, duration: Duration) -> bool {
        self.cancel.sleep(duration)
    }

    pub fn emit(&self, event: WorkerEvent) {
        // Nobody listening is not an error
        if self.events.send(event).is_err() {
            trace!(kind = %self.kind, "event dropped, no subscriber");
        }
    }
}

pub trait Worker: Send {
    fn kind(&self) -> WorkerKind;

    /// Runs until the transfer completes, is cancelled, or fails. Terminal
    /// events are emitted by the caller, not by the worker.
    fn run(self: Box<Self>, ctx: &WorkerContext) -> Result<Outcome, WorkerError>;
}
