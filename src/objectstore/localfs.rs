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
    fs::File,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};

use anyhow::{Context, Result};

use super::{ObjectStore, ObjectWrite};
use crate::{errors::EngineError, global::ID};

const TMP_PREFIX: &str = ".tmp-";

/// Object store backed by a directory tree on the local filesystem.
///
/// Object names map directly onto paths below the root. Writers go through a
/// temporary file and rename into place on close, so readers never observe a
/// partially written object.
pub struct LocalStore {
    root: PathBuf,
}

impl LocalStore {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn walk_dir(
        &self,
        dir: &Path,
        visit: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()> {
        let mut entries: Vec<PathBuf> = Vec::new();
        for entry in std::fs::read_dir(dir)
            .with_context(|| format!("Could not list directory \'{}\'", dir.display()))?
        {
            entries.push(entry?.path());
        }
        entries.sort();

        for path in entries {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if file_name.starts_with(TMP_PREFIX) {
                continue;
            }

            if path.is_dir() {
                self.walk_dir(&path, visit)?;
            } else {
                let name = path
                    .strip_prefix(&self.root)
                    .expect("walked path is below the store root")
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                visit(&name)?;
            }
        }

        Ok(())
    }
}

impl ObjectStore for LocalStore {
    fn writer(&self, name: &str) -> Result<Box<dyn ObjectWrite>> {
        let dest = self.object_path(name);
        let parent = dest
            .parent()
            .with_context(|| format!("Object name \'{}\' has no parent directory", name))?;
        std::fs::create_dir_all(parent).with_context(|| {
            format!(
                "Could not create directory \'{}\' in local store",
                parent.display()
            )
        })?;

        let tmp = parent.join(format!(
            "{}{}",
            TMP_PREFIX,
            ID::new_random().to_short_hex(8)
        ));
        let file = File::create(&tmp)
            .with_context(|| format!("Could not create \'{}\' in local store", tmp.display()))?;

        Ok(Box::new(LocalWriter {
            file: Some(file),
            tmp,
            dest,
        }))
    }

    fn reader(&self, name: &str, offset: u64, size: u64) -> Result<Box<dyn Read + Send>> {
        let path = self.object_path(name);
        let mut file = match File::open(&path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(EngineError::NotFound(name.to_string()).into());
            }
            Err(e) => {
                return Err(e)
                    .with_context(|| format!("Could not open \'{}\' in local store", name));
            }
        };

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .with_context(|| format!("Could not seek in \'{}\'", name))?;
        }

        if size > 0 {
            Ok(Box::new(file.take(size)))
        } else {
            Ok(Box::new(file))
        }
    }

    fn walk(&self, prefix: &str, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        };
        if !dir.is_dir() {
            // No objects under this prefix.
            return Ok(());
        }
        self.walk_dir(&dir, visit)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let path = self.object_path(name);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(EngineError::NotFound(name.to_string()).into())
            }
            Err(e) => {
                Err(e).with_context(|| format!("Could not delete \'{}\' in local store", name))
            }
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.object_path(name).is_file())
    }
}

struct LocalWriter {
    file: Option<File>,
    tmp: PathBuf,
    dest: PathBuf,
}

impl Write for LocalWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.file
            .as_mut()
            .expect("write after close")
            .write(buf)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.file.as_mut().expect("flush after close").flush()
    }
}

impl ObjectWrite for LocalWriter {
    fn close(mut self: Box<Self>) -> Result<()> {
        let file = self.file.take().expect("close called twice");
        file.sync_all().with_context(|| {
            format!("Could not flush \'{}\' in local store", self.tmp.display())
        })?;
        drop(file);

        std::fs::rename(&self.tmp, &self.dest).with_context(|| {
            format!(
                "Could not publish \'{}\' in local store",
                self.dest.display()
            )
        })
    }
}

impl Drop for LocalWriter {
    fn drop(&mut self) {
        // An unclosed writer leaves no visible object behind.
        if self.file.take().is_some() {
            let _ = std::fs::remove_file(&self.tmp);
        }
    }
}

#[cfg(test)]
mod test {
    use tempfile::tempdir;

    use super::*;
    use crate::{errors, objectstore};

    #[test]
    fn test_put_get_roundtrip() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = LocalStore::new(temp_dir.path().to_owned());

        objectstore::put(&store, "block/ab/abcd", b"molino")?;
        assert!(store.exists("block/ab/abcd")?);
        assert_eq!(objectstore::get(&store, "block/ab/abcd")?, b"molino");

        Ok(())
    }

    #[test]
    fn test_ranged_reads() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = LocalStore::new(temp_dir.path().to_owned());

        objectstore::put(&store, "obj", b"hello world")?;

        let mut buf = Vec::new();
        store.reader("obj", 6, 0)?.read_to_end(&mut buf)?;
        assert_eq!(buf, b"world");

        buf.clear();
        store.reader("obj", 0, 5)?.read_to_end(&mut buf)?;
        assert_eq!(buf, b"hello");

        buf.clear();
        store.reader("obj", 6, 3)?.read_to_end(&mut buf)?;
        assert_eq!(buf, b"wor");

        Ok(())
    }

    #[test]
    fn test_missing_object_is_not_found() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = LocalStore::new(temp_dir.path().to_owned());

        let err = objectstore::get(&store, "no/such/object").unwrap_err();
        assert!(errors::is_not_found(&err));

        let err = store.delete("no/such/object").unwrap_err();
        assert!(errors::is_not_found(&err));
        assert!(objectstore::delete_ignore_missing(&store, "no/such/object").is_ok());

        Ok(())
    }

    #[test]
    fn test_walk_reports_names_under_prefix() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = LocalStore::new(temp_dir.path().to_owned());

        objectstore::put(&store, "block/aa/one", b"1")?;
        objectstore::put(&store, "block/bb/two", b"2")?;
        objectstore::put(&store, "tag/t1", b"3")?;

        let names = objectstore::list(&store, "block")?;
        assert_eq!(names, vec!["block/aa/one", "block/bb/two"]);

        let all = objectstore::list(&store, "")?;
        assert_eq!(all.len(), 3);

        Ok(())
    }

    #[test]
    fn test_unclosed_writer_leaves_nothing_visible() -> Result<()> {
        let temp_dir = tempdir()?;
        let store = LocalStore::new(temp_dir.path().to_owned());

        {
            let mut writer = store.writer("partial")?;
            writer.write_all(b"half")?;
            // Dropped without close.
        }

        assert!(!store.exists("partial")?);
        assert!(objectstore::list(&store, "")?.is_empty());

        Ok(())
    }
}
