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

use crate::utils::size;

// -- Concurrency --
pub const DEFAULT_UPLOAD_CONCURRENCY: usize = 4;

// -- Chunking --
// The chunker parameters must remain stable across versions, otherwise the
// same file contents will no longer produce the same blocks and block refs.
pub const MIN_CHUNK_SIZE: u32 = 512 * size::KiB as u32;
pub const AVG_CHUNK_SIZE: u32 = size::MiB as u32;
pub const MAX_CHUNK_SIZE: u32 = 8 * size::MiB as u32;

// -- Filesets --
/// Default lease duration handed out for composed and cached filesets.
pub const DEFAULT_FILESET_TTL_SECS: i64 = 10 * 60;

// -- Local staging --
pub const DEFAULT_INPUT_ROOT: &str = "pfs";
pub const DEFAULT_OUTPUT_ROOT: &str = "pfs/out";

/// Environment variables exported to the user process so its scripts can
/// locate the staging directories without hardcoding worker paths.
pub const ENV_INPUT_ROOT: &str = "MOLINO_INPUT_ROOT";
pub const ENV_OUTPUT_ROOT: &str = "MOLINO_OUTPUT_ROOT";

/// Environment variable consulted for the password of `sftp://` stores.
pub const ENV_SFTP_PASSWORD: &str = "MOLINO_SFTP_PASSWORD";

// -- Runner --
/// Poll interval while waiting on the user process, so cancellation can
/// interrupt the wait.
pub const RUNNER_POLL_INTERVAL_MS: u64 = 50;

// -- Display --
pub const SHORT_ID_LEN: usize = 8;

pub const DEFAULT_VERBOSITY: u32 = 1;
