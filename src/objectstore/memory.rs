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
    collections::BTreeMap,
    io::{Cursor, Read, Write},
    sync::Arc,
};

use anyhow::Result;
use parking_lot::RwLock;

use super::{ObjectStore, ObjectWrite};
use crate::errors::EngineError;

type ObjectMap = BTreeMap<String, Arc<Vec<u8>>>;

/// In-memory object store used by tests and single-process setups.
///
/// Cloning is cheap and all clones share the same objects.
#[derive(Default, Clone)]
pub struct MemStore {
    objects: Arc<RwLock<ObjectMap>>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.objects.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.read().is_empty()
    }
}

fn name_in_prefix(name: &str, prefix: &str) -> bool {
    if prefix.is_empty() {
        return true;
    }
    name == prefix || name.starts_with(&format!("{}/", prefix))
}

impl ObjectStore for MemStore {
    fn writer(&self, name: &str) -> Result<Box<dyn ObjectWrite>> {
        Ok(Box::new(MemWriter {
            name: name.to_string(),
            buf: Vec::new(),
            objects: self.objects.clone(),
        }))
    }

    fn reader(&self, name: &str, offset: u64, size: u64) -> Result<Box<dyn Read + Send>> {
        let objects = self.objects.read();
        let Some(data) = objects.get(name) else {
            return Err(EngineError::NotFound(name.to_string()).into());
        };

        let start = (offset as usize).min(data.len());
        let end = if size == 0 {
            data.len()
        } else {
            (start + size as usize).min(data.len())
        };

        Ok(Box::new(Cursor::new(data[start..end].to_vec())))
    }

    fn walk(&self, prefix: &str, visit: &mut dyn FnMut(&str) -> Result<()>) -> Result<()> {
        // Snapshot the matching names so `visit` can write to the store.
        let names: Vec<String> = {
            let objects = self.objects.read();
            objects
                .keys()
                .filter(|name| name_in_prefix(name, prefix))
                .cloned()
                .collect()
        };

        for name in names {
            visit(&name)?;
        }
        Ok(())
    }

    fn delete(&self, name: &str) -> Result<()> {
        match self.objects.write().remove(name) {
            Some(_) => Ok(()),
            None => Err(EngineError::NotFound(name.to_string()).into()),
        }
    }

    fn exists(&self, name: &str) -> Result<bool> {
        Ok(self.objects.read().contains_key(name))
    }
}

struct MemWriter {
    name: String,
    buf: Vec<u8>,
    objects: Arc<RwLock<ObjectMap>>,
}

impl Write for MemWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl ObjectWrite for MemWriter {
    fn close(self: Box<Self>) -> Result<()> {
        self.objects
            .write()
            .insert(self.name, Arc::new(self.buf));
        Ok(())
    }
}
