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

use std::{collections::BTreeMap, fs::File, path::Path, sync::Arc};

use anyhow::{Context, Result};

use crate::{
    datum::{FileInfo, PipelineSpec},
    errors::EngineError,
    global::CancelFlag,
    hashtree::normalize_path,
    objectstore::{ObjectStore, names},
    ui::process_progress::ProcessReporter,
};

/// Keeps lazily staged inputs alive for the duration of one datum run.
///
/// Lazy inputs are served by an overlay mount; dropping this guard unmounts
/// them. Eager inputs need no teardown.
#[derive(Debug)]
pub struct StagedInputs {
    #[cfg(unix)]
    _mounts: Vec<crate::overlay::OverlayMount>,
}

/// Stages the datum's input files below `input_root`, one subdirectory per
/// declared input.
///
/// Eager inputs are materialized by streaming their bodies out of the store.
/// Lazy inputs get an overlay mount that synthesizes reads on demand; from
/// the user code's point of view both look the same.
pub fn stage_inputs(
    store: Arc<dyn ObjectStore>,
    pipeline: &PipelineSpec,
    data: &[FileInfo],
    input_root: &Path,
    cancel: &CancelFlag,
    reporter: &Arc<ProcessReporter>,
) -> Result<StagedInputs> {
    super::reset_dir(input_root)?;

    let mut eager: Vec<&FileInfo> = Vec::new();
    let mut lazy: BTreeMap<String, Vec<FileInfo>> = BTreeMap::new();

    for file in data {
        let Some(input) = pipeline.input(&file.input) else {
            return Err(EngineError::InvariantViolation(format!(
                "datum references undeclared input \'{}\'",
                file.input
            ))
            .into());
        };

        if input.lazy && cfg!(unix) {
            lazy.entry(input.name.clone()).or_default().push(file.clone());
        } else {
            eager.push(file);
        }
    }

    // Every declared input gets its directory, files or not.
    for input in &pipeline.inputs {
        std::fs::create_dir_all(input_root.join(&input.name)).with_context(|| {
            format!("Could not create input directory for \'{}\'", input.name)
        })?;
    }

    for file in eager {
        cancel.check()?;
        reporter.downloading(&file.path);

        let rel = normalize_path(&file.path)?;
        if rel.is_empty() {
            return Err(EngineError::InvariantViolation(format!(
                "input \'{}\' carries a file with an empty path",
                file.input
            ))
            .into());
        }

        let dest = input_root.join(&file.input).join(&rel);
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("Could not create directory \'{}\'", parent.display())
            })?;
        }

        let mut reader = store
            .reader(&names::block(&file.hash), 0, 0)
            .with_context(|| {
                format!(
                    "Could not fetch input file \'{}/{}\'",
                    file.input, file.path
                )
            })?;
        let mut out = File::create(&dest)
            .with_context(|| format!("Could not create \'{}\'", dest.display()))?;

        let copied = std::io::copy(&mut reader, &mut out)
            .with_context(|| format!("Could not stage \'{}\'", dest.display()))?;
        reporter.downloaded_bytes(copied);
    }

    #[cfg(unix)]
    {
        let mut mounts = Vec::with_capacity(lazy.len());
        for (input_name, files) in lazy {
            cancel.check()?;
            let mountpoint = input_root.join(&input_name);
            mounts.push(crate::overlay::mount(store.clone(), files, &mountpoint)?);
        }
        Ok(StagedInputs { _mounts: mounts })
    }

    #[cfg(not(unix))]
    {
        let _ = lazy;
        Ok(StagedInputs {})
    }
}
