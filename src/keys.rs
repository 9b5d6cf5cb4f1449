//! On-disk key store: current key, integer-indexed archive.
//!
//! Layout:
//!
//! ```text
//! <git-dir>/privacy/keys/current
//! <git-dir>/privacy/keys/archive/<n>      (n strictly increasing, newest highest)
//! ```
//!
//! Archiving never reuses an id and never reorders existing archive
//! entries; `new()` moves the current key to `archive/<max+1>` (or
//! `archive/1` if the archive is empty) before installing a freshly
//! generated key as `current`.

use std::{
   fs,
   path::{Path, PathBuf},
};
#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::{
   crypto::SecretKey,
   error::{PrivacyError, Result},
};

pub struct KeyStore {
   root: PathBuf,
}

impl KeyStore {
   /// `root` is typically `<git-dir>/privacy/keys`.
   pub fn new(root: PathBuf) -> Self {
      Self { root }
   }

   fn current_path(&self) -> PathBuf {
      self.root.join("current")
   }

   fn archive_dir(&self) -> PathBuf {
      self.root.join("archive")
   }

   fn archive_path(&self, id: u64) -> PathBuf {
      self.archive_dir().join(id.to_string())
   }

   /// Create the key store directories (mode 0700) and write an initial
   /// key, failing if one already exists.
   pub fn init(&self) -> Result<SecretKey> {
      self.setup_dirs()?;
      if self.current_path().exists() {
         return Err(PrivacyError::KeyStoreInvariantViolation(
            "a key already exists; refusing to overwrite".into(),
         ));
      }
      let key = SecretKey::generate();
      self.write_current(&key)?;
      Ok(key)
   }

   fn setup_dirs(&self) -> Result<()> {
      fs::create_dir_all(self.archive_dir())?;
      restrict_to_owner(&self.root)?;
      restrict_to_owner(&self.archive_dir())?;
      Ok(())
   }

   fn write_current(&self, key: &SecretKey) -> Result<()> {
      write_exclusive(&self.current_path(), key.encode().as_bytes())?;
      restrict_to_owner(&self.current_path())?;
      Ok(())
   }

   /// Load the active key, erroring if none has been initialized.
   pub fn active_key(&self) -> Result<SecretKey> {
      let path = self.current_path();
      let contents = fs::read_to_string(&path).map_err(|_| {
         PrivacyError::NoActiveKey(format!("no key found at {}; run 'git-privacy init' first", path.display()))
      })?;
      SecretKey::decode(&contents)
   }

   /// Highest archive id currently on disk, or `None` if the archive is empty.
   pub fn highest_archive_id(&self) -> Result<Option<u64>> {
      let dir = self.archive_dir();
      if !dir.exists() {
         return Ok(None);
      }
      let mut max_id = None;
      for entry in fs::read_dir(&dir)? {
         let entry = entry?;
         if let Some(id) = entry.file_name().to_str().and_then(|s| s.parse::<u64>().ok()) {
            max_id = Some(max_id.map_or(id, |m: u64| m.max(id)));
         }
      }
      Ok(max_id)
   }

   /// All archived keys, ordered newest-first (highest id first), matching
   /// the original's `get_archived_keys`.
   pub fn archived_keys(&self) -> Result<Vec<SecretKey>> {
      let dir = self.archive_dir();
      if !dir.exists() {
         return Ok(Vec::new());
      }
      let mut entries: Vec<(u64, PathBuf)> = fs::read_dir(&dir)?
         .filter_map(std::result::Result::ok)
         .filter_map(|entry| {
            let id = entry.file_name().to_str()?.parse::<u64>().ok()?;
            Some((id, entry.path()))
         })
         .collect();
      entries.sort_by(|a, b| b.0.cmp(&a.0));

      entries
         .into_iter()
         .map(|(_, path)| {
            let contents = fs::read_to_string(&path)?;
            Ok(SecretKey::decode(&contents)?)
         })
         .collect()
   }

   /// Retire the current key and install a freshly generated one. When
   /// `archive` is true (the default for `keys --new`) the retired key is
   /// kept at `archive/<n>`; when false it is deleted outright.
   pub fn rotate(&self, archive: bool) -> Result<SecretKey> {
      self.setup_dirs()?;
      let current_path = self.current_path();
      if current_path.exists() {
         if archive {
            let next_id = self.highest_archive_id()?.map_or(1, |m| m + 1);
            fs::rename(&current_path, self.archive_path(next_id))?;
            restrict_to_owner(&self.archive_path(next_id))?;
         } else {
            fs::remove_file(&current_path)?;
         }
      }
      let key = SecretKey::generate();
      self.write_current(&key)?;
      Ok(key)
   }

   /// Installs `key` as the active key, archiving (or deleting) whatever is
   /// currently active first. Used by `keys --migrate-pwd` to promote a
   /// password-derived key without going through `init`'s exclusive-create
   /// check.
   pub fn install(&self, key: &SecretKey, archive: bool) -> Result<()> {
      self.setup_dirs()?;
      let current_path = self.current_path();
      if current_path.exists() {
         if archive {
            let next_id = self.highest_archive_id()?.map_or(1, |m| m + 1);
            fs::rename(&current_path, self.archive_path(next_id))?;
            restrict_to_owner(&self.archive_path(next_id))?;
         } else {
            fs::remove_file(&current_path)?;
         }
      }
      self.write_current(key)
   }

   /// Disable redaction by retiring the current key. When `archive` is true
   /// (the default) it moves to the archive so past commits stay
   /// decryptable; when false it is deleted.
   pub fn disable(&self, archive: bool) -> Result<()> {
      let current_path = self.current_path();
      if !current_path.exists() {
         return Ok(());
      }
      if archive {
         self.setup_dirs()?;
         let next_id = self.highest_archive_id()?.map_or(1, |m| m + 1);
         fs::rename(&current_path, self.archive_path(next_id))?;
         restrict_to_owner(&self.archive_path(next_id))?;
      } else {
         fs::remove_file(&current_path)?;
      }
      Ok(())
   }

   /// `true` once `init` has produced a key store.
   pub fn is_initialized(&self) -> bool {
      self.current_path().exists()
   }
}

#[cfg(unix)]
fn restrict_to_owner(path: &Path) -> Result<()> {
   let mut perms = fs::metadata(path)?.permissions();
   perms.set_mode(0o700);
   fs::set_permissions(path, perms)?;
   Ok(())
}

#[cfg(not(unix))]
fn restrict_to_owner(_path: &Path) -> Result<()> {
   Ok(())
}

/// Write `contents` to `path`, refusing to clobber an existing file
/// (`O_CREAT | O_EXCL` semantics).
fn write_exclusive(path: &Path, contents: &[u8]) -> Result<()> {
   use std::io::Write as _;

   let mut options = fs::OpenOptions::new();
   options.write(true).create_new(true);
   #[cfg(unix)]
   options.mode(0o600);
   let mut file = options.open(path).map_err(|e| {
      if e.kind() == std::io::ErrorKind::AlreadyExists {
         PrivacyError::KeyStoreInvariantViolation(format!("{} already exists", path.display()))
      } else {
         PrivacyError::IoError(e)
      }
   })?;
   file.write_all(contents)?;
   Ok(())
}

#[cfg(unix)]
use std::os::unix::fs::OpenOptionsExt as _;

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;

   fn store(dir: &TempDir) -> KeyStore {
      KeyStore::new(dir.path().join("keys"))
   }

   #[test]
   fn init_creates_a_key() {
      let dir = TempDir::new().unwrap();
      let store = store(&dir);
      assert!(!store.is_initialized());
      let key = store.init().unwrap();
      assert!(store.is_initialized());
      assert_eq!(store.active_key().unwrap(), key);
   }

   #[test]
   fn init_twice_fails() {
      let dir = TempDir::new().unwrap();
      let store = store(&dir);
      store.init().unwrap();
      assert!(store.init().is_err());
   }

   #[test]
   fn rotate_archives_previous_key_with_increasing_ids() {
      let dir = TempDir::new().unwrap();
      let store = store(&dir);
      let first = store.init().unwrap();
      let second = store.rotate(true).unwrap();
      let third = store.rotate(true).unwrap();

      assert_eq!(store.active_key().unwrap(), third);
      assert_eq!(store.highest_archive_id().unwrap(), Some(2));

      let archived = store.archived_keys().unwrap();
      assert_eq!(archived, vec![second, first]);
   }

   #[test]
   fn disable_removes_current_but_keeps_archive() {
      let dir = TempDir::new().unwrap();
      let store = store(&dir);
      store.init().unwrap();
      store.rotate(true).unwrap();
      store.disable(true).unwrap();
      assert!(!store.is_initialized());
      assert_eq!(store.archived_keys().unwrap().len(), 2);
   }

   #[test]
   fn install_archives_existing_key_before_replacing() {
      let dir = TempDir::new().unwrap();
      let store = store(&dir);
      let first = store.init().unwrap();
      let migrated = SecretKey::from_bytes([7u8; crate::crypto::KEY_LEN]);
      store.install(&migrated, true).unwrap();
      assert_eq!(store.active_key().unwrap(), migrated);
      assert_eq!(store.archived_keys().unwrap(), vec![first]);
   }

   #[test]
   fn disable_without_archive_deletes_the_key() {
      let dir = TempDir::new().unwrap();
      let store = store(&dir);
      store.init().unwrap();
      store.disable(false).unwrap();
      assert!(!store.is_initialized());
      assert_eq!(store.archived_keys().unwrap().len(), 0);
   }
}
