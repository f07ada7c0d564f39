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

mod cache;
mod fs;
mod stash;

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use fuser::{BackgroundSession, MountOption};

use crate::{datum::FileInfo, objectstore::ObjectStore};

/// A mounted lazy-input overlay. Dropping the guard unmounts it.
pub struct OverlayMount {
    _session: BackgroundSession,
}

impl std::fmt::Debug for OverlayMount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OverlayMount").finish_non_exhaustive()
    }
}

/// Mounts a read-only filesystem at `mountpoint` that presents the given
/// input files and fetches their bodies from the object store on first
/// read. To the user code a lazy input looks exactly like an eagerly
/// staged one.
pub fn mount(
    store: Arc<dyn ObjectStore>,
    files: Vec<FileInfo>,
    mountpoint: &Path,
) -> Result<OverlayMount> {
    let filesystem = fs::LazyInputFS::new(store, &files)?;

    let options = vec![
        MountOption::RO,
        MountOption::FSName("molino".to_string()),
    ];
    let session = fuser::spawn_mount2(filesystem, mountpoint, &options).with_context(|| {
        format!(
            "Could not mount lazy input overlay at \'{}\'",
            mountpoint.display()
        )
    })?;

    Ok(OverlayMount { _session: session })
}
