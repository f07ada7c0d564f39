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

pub mod tracker;

pub use tracker::Ttl;

use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use crate::{
    errors::EngineError,
    global::ID,
    hashtree::HashTree,
    objectstore::{self, ObjectStore, names},
};

use tracker::RefTracker;

/// Content-addressed store of hash trees with leased references.
///
/// The serialized tree bytes live in the object store under their content
/// hash; the store hands out reference handles on top. Content and handles
/// are separate namespaces: cloning a reference mints a new handle with its
/// own lease over the same content (the first handle for new content happens
/// to equal the content hash). Physical deletion is deferred to [`sweep`],
/// which removes content no live handle points at.
///
/// [`sweep`]: FilesetStore::sweep
pub struct FilesetStore {
    store: Arc<dyn ObjectStore>,
    tracker: Mutex<RefTracker>,
}

impl FilesetStore {
    pub fn new(store: Arc<dyn ObjectStore>) -> Self {
        Self {
            store,
            tracker: Mutex::new(RefTracker::default()),
        }
    }

    /// Persists a tree and registers a reference to it with the given lease.
    pub fn create(&self, tree: &HashTree, ttl: Ttl) -> Result<ID> {
        let bytes = tree.serialize();
        let content = ID::from_content(&bytes);
        let name = names::fileset(&content);

        // Content is immutable, so an existing object needs no rewrite.
        if !self.store.exists(&name)? {
            objectstore::put(self.store.as_ref(), &name, &bytes)
                .with_context(|| format!("Could not persist fileset \'{}\'", content))?;
        }

        let mut tracker = self.tracker.lock();
        let handle = if tracker.contains(&content) {
            ID::new_random()
        } else {
            content.clone()
        };
        tracker.add(handle.clone(), content, ttl);

        Ok(handle)
    }

    /// Returns a new handle to the same content with its own lease. Used to
    /// detach from a caller-controlled lifetime.
    pub fn clone_ref(&self, id: &ID, ttl: Ttl) -> Result<ID> {
        let mut tracker = self.tracker.lock();
        let content = tracker
            .resolve(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("fileset reference {}", id)))?;

        let handle = ID::new_random();
        tracker.add(handle.clone(), content, ttl);
        Ok(handle)
    }

    /// Merges an ordered sequence of filesets into a new one. Later entries
    /// override earlier ones at leaf granularity; directories are unioned.
    pub fn compose(&self, ids: &[ID], ttl: Ttl) -> Result<ID> {
        let mut layers = Vec::with_capacity(ids.len());
        for id in ids {
            layers.push(self.load(id)?);
        }
        let merged = HashTree::merge(&layers);
        self.create(&merged, ttl)
    }

    /// Loads the tree a handle refers to.
    pub fn load(&self, id: &ID) -> Result<HashTree> {
        let content = self.resolve(id)?;
        let bytes = objectstore::get(self.store.as_ref(), &names::fileset(&content))
            .with_context(|| format!("Could not load fileset \'{}\'", content))?;
        HashTree::deserialize(&bytes)
            .with_context(|| format!("Fileset \'{}\' is corrupt", content))
    }

    /// Releases a reference. The content is garbage collected by a later
    /// sweep once no live reference holds it.
    pub fn drop_ref(&self, id: &ID) -> Result<()> {
        let mut tracker = self.tracker.lock();
        tracker
            .remove(id)
            .map(|_| ())
            .ok_or_else(|| EngineError::NotFound(format!("fileset reference {}", id)).into())
    }

    /// Reaps leases expired at `now` and physically deletes fileset content
    /// without any live reference. Deletes are best-effort. Returns the
    /// number of content objects removed.
    pub fn sweep(&self, now: DateTime<Utc>) -> Result<usize> {
        let live = {
            let mut tracker = self.tracker.lock();
            tracker.expire(now);
            tracker.live_contents()
        };

        let mut deleted = 0;
        let names = objectstore::list(self.store.as_ref(), names::FILESET_PREFIX)?;
        for name in names {
            let hex = name.rsplit('/').next().unwrap_or(&name);
            let Ok(content) = ID::from_hex(hex) else {
                continue;
            };
            if !live.contains(&content) {
                objectstore::delete_ignore_missing(self.store.as_ref(), &name)?;
                deleted += 1;
            }
        }

        Ok(deleted)
    }

    /// Number of live references.
    pub fn ref_count(&self) -> usize {
        self.tracker.lock().len()
    }

    fn resolve(&self, id: &ID) -> Result<ID> {
        self.tracker
            .lock()
            .resolve(id)
            .cloned()
            .ok_or_else(|| EngineError::NotFound(format!("fileset reference {}", id)).into())
    }
}
