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
use blake3::Hasher;
use serde::{Deserialize, Serialize};

use crate::global::ID;

/// Version prefix mixed into every datum fingerprint. Bump only together
/// with a change of the canonical encoding below; fingerprints must stay
/// stable across workers, processes and engine versions otherwise.
const DATUM_ENCODING_VERSION: &[u8] = b"molino/datum/v1\n";

/// One input file slice of a datum: where the file sits logically and the
/// content hash of its bytes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileInfo {
    /// Name of the declared pipeline input this file belongs to.
    pub input: String,
    /// Path of the file below its input directory.
    pub path: String,
    pub hash: ID,
    pub size: u64,
}

/// A declared pipeline input.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputSpec {
    pub name: String,
    /// Materialize file bodies on first read instead of eagerly.
    #[serde(default)]
    pub lazy: bool,
}

/// The user-supplied computation of a pipeline stage.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Transform {
    /// Command vector; `cmd[0]` is the binary.
    pub cmd: Vec<String>,
    /// Lines fed to the user process on stdin, newline-terminated.
    #[serde(default)]
    pub stdin: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    /// Non-zero exit codes the user declares as success.
    #[serde(default)]
    pub accept_return_codes: Vec<i32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    pub name: String,
    pub inputs: Vec<InputSpec>,
    pub transform: Transform,
}

impl PipelineSpec {
    pub fn input(&self, name: &str) -> Option<&InputSpec> {
        self.inputs.iter().find(|input| input.name == name)
    }

    pub fn validate(&self) -> Result<()> {
        use crate::errors::EngineError;

        if self.transform.cmd.is_empty() {
            return Err(EngineError::InvariantViolation(format!(
                "pipeline \'{}\' has no transform command",
                self.name
            ))
            .into());
        }

        let mut seen = std::collections::BTreeSet::new();
        for input in &self.inputs {
            if !seen.insert(&input.name) {
                return Err(EngineError::InvariantViolation(format!(
                    "pipeline \'{}\' declares input \'{}\' twice",
                    self.name, input.name
                ))
                .into());
            }
        }

        Ok(())
    }
}

/// Deterministic fingerprint of one unit of work.
///
/// The datum is sorted by input name (stably, so pipeline authors can
/// reorder their input list without invalidating caches) and canonically
/// encoded together with the transform. Struct field order is fixed and
/// the environment is a BTreeMap, so no map iteration order leaks into the
/// digest. The resulting ID doubles as the output tag.
pub fn hash_datum(data: &[FileInfo], transform: &Transform) -> Result<ID> {
    let mut sorted: Vec<&FileInfo> = data.iter().collect();
    sorted.sort_by(|a, b| a.input.cmp(&b.input));

    let mut hasher = Hasher::new();
    hasher.update(DATUM_ENCODING_VERSION);
    hasher.update(&serde_json::to_vec(&sorted)?);
    hasher.update(b"\n");
    hasher.update(&serde_json::to_vec(transform)?);

    Ok(ID::from_bytes(hasher.finalize().into()))
}
