// Copyright 2015-2020 Parity Technologies (UK) Ltd.
// This file is part of OpenEthereum.

// OpenEthereum is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// OpenEthereum is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.

// You should have received a copy of the GNU General Public License
// along with OpenEthereum.  If not, see <http://www.gnu.org/licenses/>.

use std::{fmt, io::Error as IoError};

/// Index-related errors.
#[derive(Debug)]
pub enum Error {
    /// Key is not present in the index.
    NotFound,
    /// IO error
    Io(IoError),
    /// On-disk or on-wire data failed validation.
    Corruption(String),
    /// A snapshot proof did not verify.
    ProofMismatch(&'static str),
    /// Operation attempted on a closed index.
    Closed,
    /// Snapshots are not supported by this index.
    SnapshotUnsupported,
    /// Two wrapped indexes disagreed; carries the position of the
    /// disagreeing member.
    Divergence(usize),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let s = match *self {
            Error::NotFound => "Key not found".into(),
            Error::Io(ref err) => err.to_string(),
            Error::Corruption(ref reason) => format!("Corrupted index data: {reason}"),
            Error::ProofMismatch(reason) => format!("Snapshot proof mismatch: {reason}"),
            Error::Closed => "Index is closed".into(),
            Error::SnapshotUnsupported => "Snapshots are not supported by this index".into(),
            Error::Divergence(index) => format!("Index {index} diverged from the first member"),
        };

        write!(f, "{s}")
    }
}

impl From<IoError> for Error {
    fn from(err: IoError) -> Self {
        Error::Io(err)
    }
}

/// Index operation result.
pub type Result<T> = ::std::result::Result<T, Error>;
