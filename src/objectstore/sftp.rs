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

pub mod sftp_pool;

use std::{
    io::{Cursor, Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
    time::Duration,
};

use anyhow::{Context, Result};
use sftp_pool::{SftpClient, SftpConnectionPool};
use ssh2::RenameFlags;

use super::{ObjectStore, ObjectWrite};
use crate::{errors::EngineError, global::ID};

const MAX_SFTP_CONNECTIONS: usize = 5;
const CONNECTION_TIMEOUT: Duration = Duration::from_secs(5);
const CONNECTION_IDLE: Duration = Duration::from_secs(10);

const TMP_PREFIX: &str = ".tmp-";

/// Object store on a remote machine reached over SFTP.
///
/// Object names map to paths below `root` on the remote side. Writers buffer
/// locally and upload on close (close blocks until the remote write and the
/// publishing rename have finished).
pub struct SftpStore {
    root: PathBuf,
    pool: SftpConnectionPool,
}

impl SftpStore {
    pub fn new(
        root: PathBuf,
        username: String,
        host: String,
        port: u16,
        password: String,
    ) -> Self {
        let addr = format!("{}:{}", host, port);
        let pool = SftpConnectionPool::new(
            addr,
            username,
            password,
            MAX_SFTP_CONNECTIONS,
            CONNECTION_TIMEOUT,
            CONNECTION_IDLE,
        );

        Self { root, pool }
    }

    fn object_path(&self, name: &str) -> PathBuf {
        self.root.join(name)
    }

    fn create_dir_all_remote(client: &SftpClient, path: &Path) -> Result<()> {
        let sftp = client.sftp();

        if let Ok(stat) = sftp.lstat(path) {
            if stat.is_dir() {
                return Ok(());
            }
            return Err(EngineError::InvariantViolation(format!(
                "remote path {:?} exists but is not a directory",
                path
            ))
            .into());
        }

        if let Some(parent) = path.parent() {
            if parent != Path::new("") {
                Self::create_dir_all_remote(client, parent)?;
            }
        }

        sftp.mkdir(path, 0o755)
            .with_context(|| format!("Could not create remote directory {:?}", path))
    }

    fn walk_remote(
        &self,
        client: &SftpClient,
        dir: &Path,
        visit: &mut dyn FnMut(&str) -> Result<()>,
    ) -> Result<()> {
        let sftp = client.sftp();
        let mut entries = sftp
            .readdir(dir)
            .with_context(|| format!("Could not list remote directory {:?}", dir))?;
        entries.sort_by(|(a, _), (b, _)| a.cmp(b));

        for (path, stat) in entries {
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default();
            if file_name.starts_with(TMP_PREFIX) {
                continue;
            }

            if stat.is_dir() {
                self.walk_remote(client, &path, visit)?;
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

impl ObjectStore for SftpStore {
    fn writer(&self, name: &str) -> Result<Box<dyn ObjectWrite>> {
        Ok(Box::new(SftpWriter {
            name: name.to_string(),
            buf: Vec::new(),
            dest: self.object_path(name),
            pool: self.pool.clone(),
        }))
    }

    fn reader(&self, name: &str, offset: u64, size: u64) -> Result<Box<dyn Read + Send>> {
        let client = self.pool.get()?;
        let sftp = client.sftp();
        let path = self.object_path(name);

        let mut file = match sftp.open(&path) {
            Ok(file) => file,
            Err(_) if sftp.lstat(&path).is_err() => {
                return Err(EngineError::NotFound(name.to_string()).into());
            }
            Err(e) => {
                return Err(EngineError::Transient(format!(
                    "sftp open \'{}\': {}",
                    name, e
                ))
                .into());
            }
        };

        if offset > 0 {
            file.seek(SeekFrom::Start(offset))
                .with_context(|| format!("Could not seek in remote object \'{}\'", name))?;
        }

        // The sftp file handle borrows the pooled connection, so the slice
        // is buffered here instead of streamed.
        let mut contents = Vec::new();
        if size > 0 {
            file.take(size)
                .read_to_end(&mut contents)
                .with_context(|| format!("Could not read remote object \'{}\'", name))?;
        } else {
            file.read_to_end(&mut contents)
                .with_context(|| format!("Could not read remote object \'{}\'", name))?;
        }

        Ok(Box::new(Cursor::new(contents)))
    }

    fn walk(&self, prefix: &str, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        let client = self.pool.get()?;
        let dir = if prefix.is_empty() {
            self.root.clone()
        } else {
            self.root.join(prefix)
        };

        if client.sftp().lstat(&dir).is_err() {
            // No objects under this prefix.
            return Ok(());
        }

        self.walk_remote(&client, &dir, visit)
    }

    fn delete(&self, name: &str) -> Result<()> {
        let client = self.pool.get()?;
        let sftp = client.sftp();
        let path = self.object_path(name);

        match sftp.unlink(&path) {
            Ok(()) => Ok(()),
            Err(_) if sftp.lstat(&path).is_err() => {
                Err(EngineError::NotFound(name.to_string()).into())
            }
            Err(e) => Err(EngineError::Transient(format!(
                "sftp unlink \'{}\': {}",
                name, e
            ))
            .into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        let client = self.pool.get()?;
        Ok(client.sftp().lstat(&self.object_path(name)).is_ok())
    }
}

struct SftpWriter {
    name: String,
    buf: Vec<u8>,
    dest: PathBuf,
    pool: SftpConnectionPool,
}

impl Write for SftpWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ObjectWrite for SftpWriter {
    fn close(self: Box<Self>) -> Result<()> {
        let client = self.pool.get()?;

        let parent = self
            .dest
            .parent()
            .with_context(|| format!("Object name \'{}\' has no parent directory", self.name))?;
        SftpStore::create_dir_all_remote(&client, parent)?;

        let tmp = parent.join(format!(
            "{}{}",
            TMP_PREFIX,
            ID::new_random().to_short_hex(8)
        ));

        let sftp = client.sftp();
        let mut file = sftp
            .create(&tmp)
            .with_context(|| format!("Could not create remote object \'{}\'", self.name))?;
        file.write_all(&self.buf)
            .with_context(|| format!("Could not upload remote object \'{}\'", self.name))?;
        drop(file);

        sftp.rename(&tmp, &self.dest, Some(RenameFlags::all()))
            .with_context(|| format!("Could not publish remote object \'{}\'", self.name))
    }
}
