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

use std::{ffi::OsStr, sync::Arc};

use anyhow::Result;
use fuser::{
    Filesystem, ReplyAttr, ReplyData, ReplyDirectory, ReplyEntry, ReplyOpen, Request,
};
use libc;

use crate::{datum::FileInfo, error, objectstore::ObjectStore};

use super::{
    cache::BlockCache,
    stash::{Stash, TTL},
};

const BLOCK_CACHE_CAPACITY: usize = 64;

/// A read-only filesystem presenting one lazy input.
///
/// The directory structure is fully known at mount time; file bodies are
/// fetched from the object store on first read and kept in an LRU cache.
pub(super) struct LazyInputFS {
    stash: Stash,
    cache: BlockCache,
}

impl LazyInputFS {
    pub(super) fn new(store: Arc<dyn ObjectStore>, files: &[FileInfo]) -> Result<Self> {
        Ok(Self {
            stash: Stash::build(files)?,
            cache: BlockCache::new(store, BLOCK_CACHE_CAPACITY),
        })
    }
}

impl Filesystem for LazyInputFS {
    fn lookup(&mut self, _req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        match self.stash.lookup(parent, &name.to_string_lossy()) {
            None => reply.error(libc::ENOENT),
            Some(attr) => reply.entry(&TTL, attr, 0),
        }
    }

    fn getattr(&mut self, _req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        match self.stash.get_attr(ino) {
            None => reply.error(libc::ENOENT),
            Some(attr) => reply.attr(&TTL, &attr),
        }
    }

    fn readdir(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        mut reply: ReplyDirectory,
    ) {
        let entries = self.stash.read_dir(ino, offset);

        for (i, (child_ino, file_type, name)) in entries.into_iter().enumerate() {
            let next_offset = offset + (i as i64) + 1;
            if reply.add(child_ino, next_offset, file_type, name) {
                break;
            }
        }
        reply.ok();
    }

    fn open(&mut self, _req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        match self.stash.file_body(ino) {
            Some(_) => reply.opened(0, 0),
            None => reply.error(libc::EISDIR),
        }
    }

    fn read(
        &mut self,
        _req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let Some((hash, _)) = self.stash.file_body(ino) else {
            reply.error(libc::ENOENT);
            return;
        };
        let hash = hash.clone();

        let body = match self.cache.load(&hash) {
            Ok(body) => body,
            Err(e) => {
                error!("Lazy input read failed: {:?}", e.to_string());
                reply.error(libc::EIO);
                return;
            }
        };

        let start = (offset.max(0) as usize).min(body.len());
        let end = (start + size as usize).min(body.len());
        reply.data(&body[start..end]);
    }
}
