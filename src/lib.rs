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


//! Text and image transfer over a point-to-point serial link.
//!
//! Each transfer runs as a [`worker::Worker`] on its own thread, started and
//! stopped through a [`registry::WorkerRegistry`], and reports back through a
//! stream of [`worker::WorkerEvent`]s.

pub mod link;
pub mod protocol;
pub mod receiver;
pub mod registry;
pub mod sender;
pub mod transfer_log;
pub mod worker;

pub use link::{Link, LinkConfig, LinkError, SerialLink, SharedLink};
pub use registry::{RegistryError, WorkerRegistry};
pub use worker::{WorkerError, WorkerEvent, WorkerKind, WorkerState};
