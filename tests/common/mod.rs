//! Shared fixture for end-to-end scenarios: a real Git repository in a
//! `tempfile::TempDir`, driven with the same `git` binary the crate shells
//! out to.

use std::{
   path::{Path, PathBuf},
   process::Command,
};

use git_privacy::git::GitRepo;
use tempfile::TempDir;

pub struct Fixture {
   _dir: TempDir,
   pub path: PathBuf,
}

impl Fixture {
   /// Initializes an empty repo with a deterministic author identity so
   /// commit timestamps are reproducible across test runs.
   pub fn init() -> Self {
      let dir = TempDir::new().expect("create temp dir");
      let path = dir.path().to_path_buf();
      git(&path, &["init", "--quiet"]);
      git(&path, &["config", "user.name", "Test User"]);
      git(&path, &["config", "user.email", "test@example.com"]);
      Self { _dir: dir, path }
   }

   pub fn repo(&self) -> GitRepo {
      GitRepo::discover(&self.path).expect("discover fixture repo")
   }

   /// Creates (or overwrites) `name` with `contents` and stages it.
   pub fn write(&self, name: &str, contents: &str) {
      std::fs::write(self.path.join(name), contents).expect("write fixture file");
      git(&self.path, &["add", name]);
   }

   /// Commits the current index with `GIT_AUTHOR_DATE`/`GIT_COMMITTER_DATE`
   /// pinned to `date` (`"@<unix> +hhmm"`), so timestamp assertions don't
   /// depend on wall-clock time.
   pub fn commit_at(&self, message: &str, date: &str) {
      Command::new("git")
         .current_dir(&self.path)
         .args(["commit", "--quiet", "--allow-empty", "-m", message])
         .env("GIT_AUTHOR_DATE", date)
         .env("GIT_COMMITTER_DATE", date)
         .status()
         .expect("git commit");
   }

   pub fn head(&self) -> String {
      git(&self.path, &["rev-parse", "HEAD"])
   }

   pub fn config_set(&self, key: &str, value: &str) {
      git(&self.path, &["config", key, value]);
   }

   pub fn git_privacy(&self, args: &[&str]) -> std::process::Output {
      Command::new(env!("CARGO_BIN_EXE_git-privacy"))
         .current_dir(&self.path)
         .args(args)
         .output()
         .expect("run git-privacy")
   }
}

fn git(dir: &Path, args: &[&str]) -> String {
   let output = Command::new("git").current_dir(dir).args(args).output().expect("run git");
   assert!(output.status.success(), "git {args:?} failed: {}", String::from_utf8_lossy(&output.stderr));
   String::from_utf8(output.stdout).expect("git output is utf8").trim().to_string()
}
