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

pub mod download;
pub mod upload;

use std::path::Path;

use anyhow::{Context, Result};

/// Clears and recreates a staging directory. Leftovers from a previous run
/// are not rolled back on failure, so the next run starts from a clean slate
/// instead.
pub fn reset_dir(path: &Path) -> Result<()> {
    if path.exists() {
        std::fs::remove_dir_all(path)
            .with_context(|| format!("Could not clear \'{}\'", path.display()))?;
    }
    std::fs::create_dir_all(path)
        .with_context(|| format!("Could not create \'{}\'", path.display()))
}
