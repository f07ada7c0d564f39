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

pub mod builder;

pub use builder::TreeBuilder;

use std::collections::BTreeMap;

use anyhow::{Result, bail};
use serde::Serialize;

use crate::global::{ID, ID_LENGTH};

const KIND_DIRECTORY: u8 = 0;
const KIND_FILE: u8 = 1;

const ROOT_NODE: TreeNode = TreeNode::Directory;

/// A content-addressed pointer to a byte range within a stored block.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BlockRef {
    pub hash: ID,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub enum TreeNode {
    Directory,
    /// An ordered byte stream: blocks concatenate to the file content.
    File { size: u64, blocks: Vec<BlockRef> },
}

impl TreeNode {
    pub fn is_file(&self) -> bool {
        matches!(self, TreeNode::File { .. })
    }

    pub fn is_directory(&self) -> bool {
        matches!(self, TreeNode::Directory)
    }
}

/// An immutable mapping from relative paths to directory and file nodes.
///
/// The root is an implicit directory and is not stored as an entry. Every
/// non-root entry's parent exists as a directory, and files are leaves.
/// The serialized form is canonical (children in byte-wise lexicographic
/// order), so two trees with equal contents produce bitwise-identical
/// bytes and therefore the same ID.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashTree {
    entries: BTreeMap<String, TreeNode>,
}

/// Normalizes a POSIX-style relative path: strips redundant separators and
/// `.` segments, rejects parent traversal. Returns "" for the root.
pub(crate) fn normalize_path(path: &str) -> Result<String> {
    let mut parts: Vec<&str> = Vec::new();
    for part in path.split('/') {
        match part {
            "" | "." => continue,
            ".." => bail!("Path \'{}\' escapes the tree root", path),
            part => parts.push(part),
        }
    }
    Ok(parts.join("/"))
}

fn write_varint(out: &mut Vec<u8>, mut value: u64) {
    loop {
        let byte = (value & 0x7f) as u8;
        value >>= 7;
        if value != 0 {
            out.push(byte | 0x80);
        } else {
            out.push(byte);
            break;
        }
    }
}

fn read_varint(input: &mut &[u8]) -> Result<u64> {
    let mut value: u64 = 0;
    let mut shift = 0u32;
    loop {
        let Some((&byte, rest)) = input.split_first() else {
            bail!("Truncated varint in tree bytes");
        };
        *input = rest;

        if shift >= 64 {
            bail!("Varint overflow in tree bytes");
        }
        value |= u64::from(byte & 0x7f) << shift;
        if byte & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
    }
}

fn read_u64(input: &mut &[u8]) -> Result<u64> {
    if input.len() < 8 {
        bail!("Truncated u64 in tree bytes");
    }
    let (bytes, rest) = input.split_at(8);
    *input = rest;
    Ok(u64::from_le_bytes(bytes.try_into().unwrap()))
}

impl HashTree {
    pub(crate) fn from_entries(entries: BTreeMap<String, TreeNode>) -> Self {
        Self { entries }
    }

    pub fn empty() -> Self {
        Self {
            entries: BTreeMap::new(),
        }
    }

    /// Looks up the node at a path. `""` resolves to the implicit root
    /// directory.
    pub fn get(&self, path: &str) -> Option<&TreeNode> {
        let path = normalize_path(path).ok()?;
        if path.is_empty() {
            return Some(&ROOT_NODE);
        }
        self.entries.get(&path)
    }

    /// Iterates all entries in path order. The implicit root is skipped.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &TreeNode)> {
        self.entries.iter().map(|(path, node)| (path.as_str(), node))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Direct children of every directory, keyed by parent path. Entry
    /// iteration is in key order, so each child list comes out in byte-wise
    /// lexicographic order.
    fn child_map(&self) -> BTreeMap<&str, Vec<&str>> {
        let mut children: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        children.insert("", Vec::new());

        for path in self.entries.keys() {
            let (parent, name) = match path.rfind('/') {
                Some(idx) => (&path[..idx], &path[idx + 1..]),
                None => ("", path.as_str()),
            };
            children.entry(parent).or_default().push(name);
        }

        children
    }

    /// Produces the canonical wire form of the tree.
    pub fn serialize(&self) -> Vec<u8> {
        let children = self.child_map();
        let mut out = Vec::new();
        self.write_node(&mut out, "", &ROOT_NODE, &children);
        out
    }

    fn write_node(
        &self,
        out: &mut Vec<u8>,
        path: &str,
        node: &TreeNode,
        children: &BTreeMap<&str, Vec<&str>>,
    ) {
        match node {
            TreeNode::Directory => {
                out.push(KIND_DIRECTORY);
                let empty = Vec::new();
                let kids = children.get(path).unwrap_or(&empty);
                write_varint(out, kids.len() as u64);
                for name in kids {
                    write_varint(out, name.len() as u64);
                    out.extend_from_slice(name.as_bytes());

                    let child_path = if path.is_empty() {
                        (*name).to_string()
                    } else {
                        format!("{}/{}", path, name)
                    };
                    let child = self
                        .entries
                        .get(&child_path)
                        .expect("child listed in child_map exists");
                    self.write_node(out, &child_path, child, children);
                }
            }
            TreeNode::File { size, blocks } => {
                out.push(KIND_FILE);
                out.extend_from_slice(&size.to_le_bytes());
                write_varint(out, blocks.len() as u64);
                for block in blocks {
                    out.extend_from_slice(block.hash.as_bytes());
                    out.extend_from_slice(&block.offset.to_le_bytes());
                    out.extend_from_slice(&block.length.to_le_bytes());
                }
            }
        }
    }

    /// Parses the canonical wire form back into a tree.
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        let mut input = bytes;
        let mut entries = BTreeMap::new();

        let root = read_node(&mut input, "", &mut entries)?;
        if !root.is_directory() {
            bail!("Tree root is not a directory");
        }
        if !input.is_empty() {
            bail!("Trailing bytes after tree");
        }

        Ok(Self { entries })
    }

    /// The content identity of the tree.
    pub fn id(&self) -> ID {
        ID::from_content(self.serialize())
    }

    /// Merges an ordered sequence of trees into one. Later layers override
    /// earlier ones at leaf granularity; directories are unioned. A later
    /// file displaces an earlier directory together with its subtree.
    pub fn merge(layers: &[HashTree]) -> HashTree {
        let mut entries: BTreeMap<String, TreeNode> = BTreeMap::new();

        for layer in layers {
            for (path, node) in &layer.entries {
                if node.is_file() {
                    let prefix = format!("{}/", path);
                    entries.retain(|other, _| other != path && !other.starts_with(&prefix));
                }
                entries.insert(path.clone(), node.clone());
            }
        }

        HashTree { entries }
    }
}

fn read_node(
    input: &mut &[u8],
    path: &str,
    entries: &mut BTreeMap<String, TreeNode>,
) -> Result<TreeNode> {
    let Some((&kind, rest)) = input.split_first() else {
        bail!("Truncated tree bytes");
    };
    *input = rest;

    match kind {
        KIND_DIRECTORY => {
            let child_count = read_varint(input)?;
            for _ in 0..child_count {
                let name_len = read_varint(input)? as usize;
                if input.len() < name_len {
                    bail!("Truncated child name in tree bytes");
                }
                let (name_bytes, rest) = input.split_at(name_len);
                *input = rest;

                let name = std::str::from_utf8(name_bytes)?;
                if name.is_empty() || name.contains('/') {
                    bail!("Invalid child name \'{}\' in tree bytes", name);
                }

                let child_path = if path.is_empty() {
                    name.to_string()
                } else {
                    format!("{}/{}", path, name)
                };
                let child = read_node(input, &child_path, entries)?;
                entries.insert(child_path, child);
            }
            Ok(TreeNode::Directory)
        }
        KIND_FILE => {
            let size = read_u64(input)?;
            let block_count = read_varint(input)?;
            let mut blocks = Vec::with_capacity(block_count as usize);
            for _ in 0..block_count {
                if input.len() < ID_LENGTH {
                    bail!("Truncated block hash in tree bytes");
                }
                let (hash_bytes, rest) = input.split_at(ID_LENGTH);
                *input = rest;

                let hash = ID::from_bytes(hash_bytes.try_into().unwrap());
                let offset = read_u64(input)?;
                let length = read_u64(input)?;
                blocks.push(BlockRef {
                    hash,
                    offset,
                    length,
                });
            }
            Ok(TreeNode::File { size, blocks })
        }
        other => bail!("Unknown tree node kind \'{}\'", other),
    }
}
