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

use std::{
    collections::BTreeMap,
    time::{Duration, SystemTime},
};

use anyhow::Result;
use fuser::FileAttr;

use crate::{datum::FileInfo, errors::EngineError, global::ID, hashtree::normalize_path};

pub(super) type Inode = u64;

pub(super) const ROOT_INODE: Inode = 1;
pub(super) const BLKSIZE: u32 = 512;
pub(super) const TTL: Duration = Duration::from_secs(60);

#[derive(Debug)]
pub(super) enum FsNode {
    Dir {
        parent_ino: Inode,
        attr: FileAttr,
        children: BTreeMap<String, Inode>,
    },
    File {
        attr: FileAttr,
        hash: ID,
    },
}

impl FsNode {
    fn attr(&self) -> &FileAttr {
        match self {
            FsNode::Dir { attr, .. } | FsNode::File { attr, .. } => attr,
        }
    }
}

/// Inode table for one lazy input: the full file list is known at mount
/// time, so the table is built up-front and never changes afterwards.
pub(super) struct Stash {
    ino_counter: Inode,
    nodes: BTreeMap<Inode, FsNode>,
    path_cache: BTreeMap<(Inode, String), Inode>,
}

impl Stash {
    pub(super) fn build(files: &[FileInfo]) -> Result<Self> {
        let now = SystemTime::now();

        let mut stash = Self {
            ino_counter: ROOT_INODE,
            nodes: BTreeMap::new(),
            path_cache: BTreeMap::new(),
        };
        stash.nodes.insert(
            ROOT_INODE,
            FsNode::Dir {
                parent_ino: ROOT_INODE,
                attr: build_dir_attr(ROOT_INODE, now),
                children: BTreeMap::new(),
            },
        );

        for file in files {
            let rel = normalize_path(&file.path)?;
            if rel.is_empty() {
                return Err(EngineError::InvariantViolation(format!(
                    "input \'{}\' carries a file with an empty path",
                    file.input
                ))
                .into());
            }

            let mut parent = ROOT_INODE;
            let mut components = rel.split('/').peekable();
            while let Some(component) = components.next() {
                if components.peek().is_some() {
                    parent = stash.add_dir(parent, component, now)?;
                } else {
                    stash.add_file(parent, component, file, now)?;
                }
            }
        }

        Ok(stash)
    }

    fn next_ino(&mut self) -> Inode {
        self.ino_counter += 1;
        self.ino_counter
    }

    fn add_dir(&mut self, parent_ino: Inode, name: &str, now: SystemTime) -> Result<Inode> {
        if let Some(&ino) = self.path_cache.get(&(parent_ino, name.to_string())) {
            return match self.nodes.get(&ino) {
                Some(FsNode::Dir { .. }) => Ok(ino),
                _ => Err(EngineError::InvariantViolation(format!(
                    "lazy input path component \'{}\' is both a file and a directory",
                    name
                ))
                .into()),
            };
        }

        let ino = self.next_ino();
        self.nodes.insert(
            ino,
            FsNode::Dir {
                parent_ino,
                attr: build_dir_attr(ino, now),
                children: BTreeMap::new(),
            },
        );
        self.link_child(parent_ino, name, ino);
        Ok(ino)
    }

    fn add_file(
        &mut self,
        parent_ino: Inode,
        name: &str,
        file: &FileInfo,
        now: SystemTime,
    ) -> Result<Inode> {
        if self
            .path_cache
            .contains_key(&(parent_ino, name.to_string()))
        {
            return Err(EngineError::InvariantViolation(format!(
                "lazy input lists path \'{}\' twice",
                file.path
            ))
            .into());
        }

        let ino = self.next_ino();
        self.nodes.insert(
            ino,
            FsNode::File {
                attr: build_file_attr(ino, file.size, now),
                hash: file.hash.clone(),
            },
        );
        self.link_child(parent_ino, name, ino);
        Ok(ino)
    }

    fn link_child(&mut self, parent_ino: Inode, name: &str, child_ino: Inode) {
        self.path_cache
            .insert((parent_ino, name.to_string()), child_ino);
        if let Some(FsNode::Dir { attr, children, .. }) = self.nodes.get_mut(&parent_ino) {
            attr.nlink += 1;
            children.insert(name.to_string(), child_ino);
        }
    }

    pub(super) fn lookup(&self, parent_ino: Inode, name: &str) -> Option<&FileAttr> {
        let ino = self.path_cache.get(&(parent_ino, name.to_string()))?;
        self.nodes.get(ino).map(FsNode::attr)
    }

    pub(super) fn get_attr(&self, ino: Inode) -> Option<FileAttr> {
        self.nodes.get(&ino).map(|node| *node.attr())
    }

    /// For file inodes, the block ID of the body and the file size.
    pub(super) fn file_body(&self, ino: Inode) -> Option<(&ID, u64)> {
        match self.nodes.get(&ino)? {
            FsNode::File { attr, hash } => Some((hash, attr.size)),
            FsNode::Dir { .. } => None,
        }
    }

    pub(super) fn read_dir(
        &self,
        ino: Inode,
        offset: i64,
    ) -> Vec<(Inode, fuser::FileType, String)> {
        let Some(FsNode::Dir {
            parent_ino,
            children,
            ..
        }) = self.nodes.get(&ino)
        else {
            return Vec::new();
        };

        let mut all: Vec<(Inode, fuser::FileType, String)> = Vec::new();
        all.push((ino, fuser::FileType::Directory, ".".to_string()));
        all.push((*parent_ino, fuser::FileType::Directory, "..".to_string()));

        for (name, &child_ino) in children {
            let kind = match self.nodes.get(&child_ino) {
                Some(FsNode::Dir { .. }) => fuser::FileType::Directory,
                Some(FsNode::File { .. }) => fuser::FileType::RegularFile,
                None => continue,
            };
            all.push((child_ino, kind, name.clone()));
        }

        all.into_iter().skip(offset.max(0) as usize).collect()
    }
}

fn build_dir_attr(ino: Inode, now: SystemTime) -> FileAttr {
    FileAttr {
        ino,
        size: 0,
        blocks: 0,
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: fuser::FileType::Directory,
        perm: 0o755,
        nlink: 2,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}

fn build_file_attr(ino: Inode, size: u64, now: SystemTime) -> FileAttr {
    FileAttr {
        ino,
        size,
        blocks: size.div_ceil(BLKSIZE as u64),
        atime: now,
        mtime: now,
        ctime: now,
        crtime: now,
        kind: fuser::FileType::RegularFile,
        perm: 0o444,
        nlink: 1,
        uid: 0,
        gid: 0,
        rdev: 0,
        blksize: BLKSIZE,
        flags: 0,
    }
}
