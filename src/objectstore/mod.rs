// molino is a pipeline worker for content-addressed pipelines
// Copyright (C) 2025  Javier Lancha Vázquez <javier.lancha@gmail.com>
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program.  If not, see <https://www.gnu.org/licenses/>.

pub mod localfs;
pub mod memory;
pub mod sftp;

use std::io::{Read, Write};

use anyhow::{Context, Result};

use crate::errors;

/// Helpers that map engine entities to their object names.
///
/// Object names are flat, `/`-separated strings. Adapters may map the
/// separators to whatever hierarchy their backend supports.
pub mod names {
    use crate::global::ID;

    pub const BLOCK_PREFIX: &str = "block";
    pub const FILESET_PREFIX: &str = "fileset";
    pub const TAG_PREFIX: &str = "tag";

    /// Block objects fold into a two-hex-character subdirectory so that
    /// filesystem-backed stores do not accumulate every block in a single
    /// directory.
    pub fn block(id: &ID) -> String {
        let hex = id.to_hex();
        format!("{}/{}/{}", BLOCK_PREFIX, &hex[0..2], hex)
    }

    pub fn fileset(id: &ID) -> String {
        format!("{}/{}", FILESET_PREFIX, id.to_hex())
    }

    pub fn tag(tag: &str) -> String {
        format!("{}/{}", TAG_PREFIX, tag)
    }
}

/// A streaming object writer.
///
/// Writes may be buffered by the adapter; `close` blocks until the object is
/// durably stored under its name and surfaces any upload error. An object is
/// not visible to readers before `close` returns.
pub trait ObjectWrite: Write + Send {
    fn close(self: Box<Self>) -> Result<()>;
}

/// Abstraction of an object store keyed by string names.
///
/// A store can be a directory tree on the local machine, an in-memory map or
/// a remote machine connected via SFTP. Writes to distinct names do not
/// interfere; writes to the same name race with last-writer-wins.
///
/// Adapters classify their backend failures into [`crate::errors::EngineError`]
/// kinds at this boundary, so callers can route on
/// [`crate::errors::is_not_found`] and friends instead of matching adapter
/// error strings.
pub trait ObjectStore: Send + Sync {
    /// Opens a streaming writer for the object with the given name.
    fn writer(&self, name: &str) -> Result<Box<dyn ObjectWrite>>;

    /// Opens a bounded reader over the object, starting at `offset`.
    /// `size == 0` means "to the end of the object".
    fn reader(&self, name: &str, offset: u64, size: u64) -> Result<Box<dyn Read + Send>>;

    /// Invokes `visit` with the name of every object under `prefix`,
    /// recursively.
    fn walk(&self, prefix: &str, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()>;

    /// Removes an object. Deleting a missing object is a `NotFound` error;
    /// callers that do not care use [`delete_ignore_missing`].
    fn delete(&self, name: &str) -> Result<()>;

    /// Returns true if an object with this name exists.
    fn exists(&self, name: &str) -> Result<bool>;
}

/// Reads a whole object into memory.
pub fn get(store: &dyn ObjectStore, name: &str) -> Result<Vec<u8>> {
    let mut reader = store.reader(name, 0, 0)?;
    let mut data = Vec::new();
    reader
        .read_to_end(&mut data)
        .with_context(|| format!("Could not read object \'{}\'", name))?;
    Ok(data)
}

/// Writes a whole object in one call.
pub fn put(store: &dyn ObjectStore, name: &str, data: &[u8]) -> Result<()> {
    let mut writer = store.writer(name)?;
    writer
        .write_all(data)
        .with_context(|| format!("Could not write object \'{}\'", name))?;
    writer.close()
}

/// Best-effort delete: a missing object counts as already deleted.
pub fn delete_ignore_missing(store: &dyn ObjectStore, name: &str) -> Result<()> {
    match store.delete(name) {
        Err(e) if errors::is_ignorable(&e) => Ok(()),
        other => other,
    }
}

/// Collects all object names under a prefix. Convenience wrapper over `walk`.
pub fn list(store: &dyn ObjectStore, prefix: &str) -> Result<Vec<String>> {
    let mut found = Vec::new();
    store.walk(prefix, &mut |name| {
        found.push(name.to_string());
        Ok(())
    })?;
    Ok(found)
}
