//! Hook scripts and the `init` installer.
//!
//! Hooks are thin POSIX `sh` wrappers that `exec` back into this binary;
//! all the actual logic lives in [`crate::hooks`]. Templates are plain
//! string literals rather than a templating engine — there is nothing here
//! that varies per install beyond the shebang, so Tera would be pure
//! overhead.

use std::{
   fs,
   io::Write as _,
   path::{Path, PathBuf},
   process::Command,
};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

use crate::{
   error::{PrivacyError, Result},
   git::GitRepo,
   style,
};

const POST_COMMIT: &str = "#!/bin/sh\n# Installed by git-privacy.\nexec git-privacy redate --only-head\n";
const PRE_COMMIT: &str = "#!/bin/sh\n# Installed by git-privacy.\nexec git-privacy check\n";
const POST_REWRITE: &str = "#!/bin/sh\n# Installed by git-privacy.\nexec git-privacy log-rewrites\n";
const PRE_PUSH: &str = "#!/bin/sh\n# Installed by git-privacy.\nexec git-privacy pre-push \"$@\"\n";

const HOOKS: &[(&str, &str)] =
   &[("post-commit", POST_COMMIT), ("pre-commit", PRE_COMMIT), ("post-rewrite", POST_REWRITE), ("pre-push", PRE_PUSH)];

/// Installs all four hooks into `repo`'s own `.git/hooks`, or, when
/// `global` is set, into the user's Git template directory (created if
/// necessary, and registered as `init.templatedir` if not already set).
pub fn install(repo: &GitRepo, global: bool) -> Result<()> {
   let base = if global { template_dir()? } else { repo.git_dir().to_path_buf() };
   let hook_dir = base.join("hooks");
   fs::create_dir_all(&hook_dir)?;
   for (name, contents) in HOOKS {
      install_hook(&hook_dir, name, contents)?;
   }
   Ok(())
}

/// Mirrors the original's template-directory resolution: reuse an
/// existing `init.templatedir`, else create `~/.git_template`.
fn template_dir() -> Result<PathBuf> {
   let configured = git_global_config_get("init.templatedir");
   if let Some(dir) = configured.filter(|d| !d.is_empty()) {
      let path = PathBuf::from(&dir);
      if path.is_dir() {
         return Ok(path);
      }
   }
   let home = dirs_home()?;
   let default_dir = home.join(".git_template");
   fs::create_dir_all(default_dir.join("hooks"))?;
   git_global_config_set("init.templatedir", &default_dir.display().to_string())?;
   Ok(default_dir)
}

fn dirs_home() -> Result<PathBuf> {
   std::env::var_os("HOME")
      .or_else(|| std::env::var_os("USERPROFILE"))
      .map(PathBuf::from)
      .ok_or(PrivacyError::NoHomeDir)
}

fn git_global_config_get(key: &str) -> Option<String> {
   let output = Command::new("git").args(["config", "--global", "--get", key]).output().ok()?;
   output.status.success().then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn git_global_config_set(key: &str, value: &str) -> Result<()> {
   let status = Command::new("git")
      .args(["config", "--global", key, value])
      .status()
      .map_err(|e| PrivacyError::GitError(e.to_string()))?;
   if !status.success() {
      return Err(PrivacyError::GitError(format!("failed to set global config {key}")));
   }
   Ok(())
}

/// Writes `hook` into `hook_dir`, refusing to clobber a foreign hook that
/// doesn't already match byte-for-byte (mirrors the original's
/// `O_CREAT|O_EXCL` + content-compare fallback).
fn install_hook(hook_dir: &Path, hook: &str, contents: &str) -> Result<()> {
   let path = hook_dir.join(hook);
   let mut options = fs::OpenOptions::new();
   options.write(true).create_new(true);
   match options.open(&path) {
      Ok(mut file) => {
         file.write_all(contents.as_bytes())?;
         set_executable(&path)?;
         style::print_info(&format!("Installed {hook} hook"));
         Ok(())
      },
      Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
         let existing = fs::read_to_string(&path).unwrap_or_default();
         if existing == contents {
            style::print_info(&format!("{hook} hook is already installed at {}.", path.display()));
         } else {
            eprintln!("{}", style::warning(&format!("A Git hook already exists at {}", path.display())));
            eprintln!(
               "\nRemove the hook and rerun 'git-privacy init', or add the following to the existing hook:\n\n{contents}"
            );
         }
         Ok(())
      },
      Err(e) => Err(PrivacyError::IoError(e)),
   }
}

#[cfg(unix)]
fn set_executable(path: &Path) -> Result<()> {
   let mut perms = fs::metadata(path)?.permissions();
   perms.set_mode(0o755);
   fs::set_permissions(path, perms)?;
   Ok(())
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> Result<()> {
   Ok(())
}

#[cfg(test)]
mod tests {
   use tempfile::TempDir;

   use super::*;

   #[test]
   fn installs_hook_with_executable_bit() {
      let dir = TempDir::new().unwrap();
      install_hook(dir.path(), "post-commit", POST_COMMIT).unwrap();
      let path = dir.path().join("post-commit");
      assert!(path.exists());
      #[cfg(unix)]
      {
         let mode = fs::metadata(&path).unwrap().permissions().mode();
         assert_eq!(mode & 0o777, 0o755);
      }
   }

   #[test]
   fn reinstalling_identical_hook_is_a_noop() {
      let dir = TempDir::new().unwrap();
      install_hook(dir.path(), "pre-commit", PRE_COMMIT).unwrap();
      install_hook(dir.path(), "pre-commit", PRE_COMMIT).unwrap();
      assert_eq!(fs::read_to_string(dir.path().join("pre-commit")).unwrap(), PRE_COMMIT);
   }
}
