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

//! Helpers shared between the integration tests.

use anyhow::Result;

use crate::{
    datum::{FileInfo, InputSpec, PipelineSpec, Transform},
    global::ID,
    hashtree::{BlockRef, HashTree, TreeBuilder},
    objectstore::{self, ObjectStore, names},
};

/// Stores `content` as a block object and returns the matching input file
/// slice for the given input.
pub fn seed_input(
    store: &dyn ObjectStore,
    input: &str,
    path: &str,
    content: &[u8],
) -> Result<FileInfo> {
    let hash = ID::from_content(content);
    objectstore::put(store, &names::block(&hash), content)?;

    Ok(FileInfo {
        input: input.to_string(),
        path: path.to_string(),
        hash,
        size: content.len() as u64,
    })
}

/// A transform running a shell script.
pub fn sh_transform(script: &str) -> Transform {
    Transform {
        cmd: vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        ..Default::default()
    }
}

/// A pipeline with the given eager inputs and a shell script transform.
pub fn sh_pipeline(name: &str, inputs: &[&str], script: &str) -> PipelineSpec {
    PipelineSpec {
        name: name.to_string(),
        inputs: inputs
            .iter()
            .map(|input| InputSpec {
                name: input.to_string(),
                lazy: false,
            })
            .collect(),
        transform: sh_transform(script),
    }
}

/// A tree holding one single-block file.
pub fn tree_with_file(path: &str, content: &[u8]) -> HashTree {
    let mut builder = TreeBuilder::new();
    builder
        .put_file(
            path,
            content.len() as u64,
            vec![BlockRef {
                hash: ID::from_content(content),
                offset: 0,
                length: content.len() as u64,
            }],
        )
        .expect("valid test path");
    builder.finish()
}
