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

use std::collections::BTreeMap;

use anyhow::Result;

use super::{BlockRef, HashTree, TreeNode, normalize_path};
use crate::errors::EngineError;

/// Accumulates tree entries and produces an immutable [`HashTree`].
///
/// Missing ancestor directories are created automatically. Files are leaves
/// and unique: inserting a file at an occupied path is an error. Recording
/// an already-known directory again is harmless, so walking code does not
/// need to track which parents it has seen.
///
/// The builder is not safe for concurrent use; concurrent writers must
/// serialize access themselves.
#[derive(Debug, Default)]
pub struct TreeBuilder {
    entries: BTreeMap<String, TreeNode>,
}

impl TreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a directory at `path`, creating missing ancestors.
    pub fn put_dir(&mut self, path: &str) -> Result<()> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            // The root directory always exists.
            return Ok(());
        }

        self.ensure_parents(&path)?;

        match self.entries.get(&path) {
            None => {
                self.entries.insert(path, TreeNode::Directory);
                Ok(())
            }
            Some(TreeNode::Directory) => Ok(()),
            Some(TreeNode::File { .. }) => Err(EngineError::InvariantViolation(format!(
                "path \'{}\' already exists as a file",
                path
            ))
            .into()),
        }
    }

    /// Records a file at `path` with its total size and ordered block refs,
    /// creating missing ancestor directories.
    pub fn put_file(&mut self, path: &str, size: u64, blocks: Vec<BlockRef>) -> Result<()> {
        let path = normalize_path(path)?;
        if path.is_empty() {
            return Err(EngineError::InvariantViolation(
                "cannot insert a file at the tree root".to_string(),
            )
            .into());
        }
        if self.entries.contains_key(&path) {
            return Err(EngineError::InvariantViolation(format!(
                "path \'{}\' inserted twice",
                path
            ))
            .into());
        }

        self.ensure_parents(&path)?;
        self.entries.insert(path, TreeNode::File { size, blocks });
        Ok(())
    }

    fn ensure_parents(&mut self, path: &str) -> Result<()> {
        for (idx, byte) in path.bytes().enumerate() {
            if byte != b'/' {
                continue;
            }
            let ancestor = &path[..idx];
            match self.entries.get(ancestor) {
                None => {
                    self.entries
                        .insert(ancestor.to_string(), TreeNode::Directory);
                }
                Some(TreeNode::Directory) => {}
                Some(TreeNode::File { .. }) => {
                    return Err(EngineError::InvariantViolation(format!(
                        "parent \'{}\' of \'{}\' is a file",
                        ancestor, path
                    ))
                    .into());
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Finalizes the builder into an immutable, canonical tree.
    pub fn finish(self) -> HashTree {
        HashTree::from_entries(self.entries)
    }
}
