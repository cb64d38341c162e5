//! Host save-format shims.
//!
//! Hosts differ in how they hand us persistent storage. All of them reduce to reading and
//! writing one opaque blob under a key, which is what [`SaveHook`] models.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

const STORE_FILE_EXTENSION: &str = "wgps";

pub trait SaveHook {
    /// Returns `Ok(None)` when nothing has been stored under `key` yet.
    fn read_store(&mut self, key: &str) -> io::Result<Option<Vec<u8>>>;
    fn write_store(&mut self, key: &str, bytes: &[u8]) -> io::Result<()>;
}

/// For hosts that push the previous blob at load time and accept a sink at save time.
pub struct CallbackSaveHook<F>
where
    F: FnMut(&str, &[u8]) -> io::Result<()>,
{
    preloaded: Option<Vec<u8>>,
    sink: F,
}

impl<F> CallbackSaveHook<F>
where
    F: FnMut(&str, &[u8]) -> io::Result<()>,
{
    pub fn new(preloaded: Option<Vec<u8>>, sink: F) -> Self {
        Self { preloaded, sink }
    }
}

impl<F> SaveHook for CallbackSaveHook<F>
where
    F: FnMut(&str, &[u8]) -> io::Result<()>,
{
    fn read_store(&mut self, _key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.preloaded.clone())
    }

    fn write_store(&mut self, key: &str, bytes: &[u8]) -> io::Result<()> {
        (self.sink)(key, bytes)?;
        self.preloaded = Some(bytes.to_vec());
        Ok(())
    }
}

/// Stores blobs as named entries in a key/value compound carried by the host's world save.
pub struct CompoundSaveHook<'a> {
    compound: &'a mut BTreeMap<String, Vec<u8>>,
}

impl<'a> CompoundSaveHook<'a> {
    pub fn new(compound: &'a mut BTreeMap<String, Vec<u8>>) -> Self {
        Self { compound }
    }
}

impl SaveHook for CompoundSaveHook<'_> {
    fn read_store(&mut self, key: &str) -> io::Result<Option<Vec<u8>>> {
        Ok(self.compound.get(key).cloned())
    }

    fn write_store(&mut self, key: &str, bytes: &[u8]) -> io::Result<()> {
        self.compound.insert(key.to_string(), bytes.to_vec());
        Ok(())
    }
}

/// One file per key under a world directory, replaced atomically on every write.
#[derive(Clone, Debug)]
pub struct DirectorySaveHook {
    root: PathBuf,
}

impl DirectorySaveHook {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn store_path(&self, key: &str) -> io::Result<PathBuf> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.{STORE_FILE_EXTENSION}")))
    }
}

impl SaveHook for DirectorySaveHook {
    fn read_store(&mut self, key: &str) -> io::Result<Option<Vec<u8>>> {
        match std::fs::read(self.store_path(key)?) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(error) if error.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(error) => Err(error),
        }
    }

    fn write_store(&mut self, key: &str, bytes: &[u8]) -> io::Result<()> {
        let final_path = self.store_path(key)?;
        std::fs::create_dir_all(&self.root)?;
        let tmp_path = self.root.join(format!("{key}.{STORE_FILE_EXTENSION}.tmp"));
        {
            let file = File::create(&tmp_path)?;
            let mut writer = BufWriter::new(file);
            writer.write_all(bytes)?;
            writer.flush()?;
            let file = writer
                .into_inner()
                .map_err(|error| io::Error::new(io::ErrorKind::Other, error))?;
            file.sync_all()?;
        }
        std::fs::rename(&tmp_path, &final_path)?;
        fsync_directory(&self.root);
        Ok(())
    }
}

fn validate_key(key: &str) -> io::Result<()> {
    let usable = !key.is_empty()
        && key != "."
        && key != ".."
        && key
            .chars()
            .all(|ch| ch.is_ascii_alphanumeric() || matches!(ch, '_' | '-' | '.'));
    if usable {
        Ok(())
    } else {
        Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("store key {key:?} is not a plain file name"),
        ))
    }
}

fn fsync_directory(path: &Path) {
    if let Ok(dir) = File::open(path) {
        let _ = dir.sync_all();
    }
}
