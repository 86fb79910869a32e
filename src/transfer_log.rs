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


//! Append-only log of received text messages

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use crate::protocol::LOG_HEADER;

/// One row of the transfer log
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TransferRecord {
    pub byte_size: i64,
    pub transmission_time: f64,
}

pub struct TransferLog {
    path: PathBuf,
    file: File,
}

impl TransferLog {
    /// Starts a fresh log, discarding rows from earlier sessions
    pub fn create(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = File::create(&path)?;
        writeln!(file, "{}", LOG_HEADER)?;
        file.flush()?;
        Ok(TransferLog { path, file })
    }

    /// Appends to an existing log, writing the header only if the file is empty
    pub fn open(path: impl AsRef<Path>) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new().create(true).append(true).open(&path)?;
        if file.metadata()?.len() == 0 {
            writeln!(file, "{}", LOG_HEADER)?;
            file.flush()?;
        }
        Ok(TransferLog { path, file })
    }

    pub fn append(&mut self, record: TransferRecord) -> io::Result<()> {
        writeln!(self.file, "{},{}", record.byte_size, record.transmission_time)?;
        self.file.flush()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_writes_header_and_rows() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");
        std::fs::write(&path, "stale contents\n").unwrap();

        let mut log = TransferLog::create(&path).unwrap();
        log.append(TransferRecord { byte_size: 5, transmission_time: 0.25 }).unwrap();
        log.append(TransferRecord { byte_size: 12, transmission_time: 1.5 }).unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "Byte_Size,Transmission_time\n5,0.25\n12,1.5\n");
    }

    #[test]
    fn test_open_appends_without_rewriting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("log.csv");

        let mut log = TransferLog::open(&path).unwrap();
        log.append(TransferRecord { byte_size: 1, transmission_time: 0.5 }).unwrap();
        drop(log);

        let mut log = TransferLog::open(&path).unwrap();
        log.append(TransferRecord { byte_size: 2, transmission_time: 0.75 }).unwrap();
        assert_eq!(log.path(), path.as_path());

        let contents = std::fs::read_to_string(&path).unwrap();
        assert_eq!(contents, "Byte_Size,Transmission_time\n1,0.5\n2,0.75\n");
    }
}
