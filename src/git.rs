//! Repository facade: the narrow slice of Git plumbing the redaction
//! pipeline consumes. Everything here shells out to the `git` binary rather
//! than linking a Git implementation.

use std::{
   collections::HashMap,
   path::{Path, PathBuf},
   process::{Command, Stdio},
};

use chrono::DateTime;

use crate::{
   error::{PrivacyError, Result},
   timestamp::{Timestamp, DATE_FMT},
};

/// One side of a commit (author or committer): name, email, and the
/// timestamp Git recorded for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
   pub name: String,
   pub email: String,
   pub ts: Timestamp,
}

/// A borrowed view of a commit as the redaction pipeline sees it. Immutable
/// input: the rewriter produces a *new* commit object, never mutates this
/// one in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitInfo {
   pub oid: String,
   pub tree: String,
   pub parents: Vec<String>,
   pub author: Identity,
   pub committer: Identity,
   pub message: String,
}

/// How replacement refs should be written when rewriting a range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceMode {
   /// Don't write replacement refs at all.
   Off,
   /// Only refresh refs that already exist.
   UpdateExisting,
   /// Create a replacement for every rewritten commit.
   UpdateOrAdd,
}

pub struct GitRepo {
   git_dir: PathBuf,
   worktree: PathBuf,
}

impl GitRepo {
   /// Discover the repository containing `start_dir` (or the current
   /// directory), walking up through parent directories the way
   /// `git rev-parse` itself does.
   pub fn discover(start_dir: impl AsRef<Path>) -> Result<Self> {
      let start_dir = start_dir.as_ref();
      let git_dir = run_git_in(start_dir, &["rev-parse", "--absolute-git-dir"])
         .map_err(|_| PrivacyError::NotARepository(start_dir.display().to_string()))?;
      let worktree = run_git_in(start_dir, &["rev-parse", "--show-toplevel"])
         .map_err(|_| PrivacyError::NotARepository(start_dir.display().to_string()))?;
      Ok(Self { git_dir: PathBuf::from(git_dir.trim()), worktree: PathBuf::from(worktree.trim()) })
   }

   pub fn git_dir(&self) -> &Path {
      &self.git_dir
   }

   /// `<git-dir>/privacy/...`, the on-disk root for the key store and
   /// rewrite log.
   pub fn privacy_dir(&self) -> PathBuf {
      self.git_dir.join("privacy")
   }

   fn run(&self, args: &[&str]) -> Result<String> {
      run_git_in(&self.worktree, args)
   }

   /// `true` while a cherry-pick sequencer is active — amending now would
   /// corrupt it.
   pub fn cherry_pick_in_progress(&self) -> bool {
      self.git_dir.join("CHERRY_PICK_HEAD").exists()
   }

   pub fn working_tree_clean(&self) -> Result<bool> {
      let out = self.run(&["status", "--porcelain"])?;
      Ok(out.trim().is_empty())
   }

   /// Path to the repository-local config file (`<git-dir>/config`), used
   /// by [`crate::config::Config`] for the "comment out" migration step.
   pub fn config_path(&self) -> PathBuf {
      self.git_dir.join("config")
   }

   pub fn config_get(&self, key: &str) -> Result<Option<String>> {
      match self.run(&["config", "--local", "--get", key]) {
         Ok(v) => Ok(Some(v.trim().to_string())),
         Err(_) => Ok(None),
      }
   }

   pub fn config_get_bool(&self, key: &str, default: bool) -> bool {
      match self.run(&["config", "--local", "--type=bool", "--get", key]) {
         Ok(v) => v.trim() == "true",
         Err(_) => default,
      }
   }

   pub fn config_set(&self, key: &str, value: &str) -> Result<()> {
      self.run(&["config", "--local", key, value]).map(|_| ())
   }

   pub fn config_unset(&self, key: &str) -> Result<()> {
      match self.run(&["config", "--local", "--unset", key]) {
         Ok(_) | Err(PrivacyError::GitError(_)) => Ok(()),
         Err(e) => Err(e),
      }
   }

   pub fn user_email(&self) -> Result<Option<String>> {
      match self.run(&["config", "--get", "user.email"]) {
         Ok(email) if !email.trim().is_empty() => Ok(Some(email.trim().to_string())),
         Ok(_) => Ok(None),
         Err(_) => Ok(None),
      }
   }

   /// The short name of the branch HEAD points to, or `None` if detached.
   pub fn current_branch(&self) -> Result<Option<String>> {
      match self.run(&["symbolic-ref", "--short", "HEAD"]) {
         Ok(name) => Ok(Some(name.trim().to_string())),
         Err(_) => Ok(None),
      }
   }

   pub fn rev_parse(&self, rev: &str) -> Result<String> {
      self.run(&["rev-parse", "--verify", rev]).map_err(|_| PrivacyError::BadRevision(rev.to_string()))
   }

   pub fn rev_exists(&self, rev: &str) -> bool {
      self.rev_parse(rev).is_ok()
   }

   pub fn is_ancestor(&self, ancestor: &str, descendant: &str) -> bool {
      Command::new("git")
         .current_dir(&self.worktree)
         .args(["merge-base", "--is-ancestor", ancestor, descendant])
         .status()
         .is_ok_and(|s| s.success())
   }

   /// Remote-tracking branches containing `oid`.
   pub fn remote_branches_containing(&self, oid: &str) -> Result<Vec<String>> {
      let out = self.run(&["branch", "-r", "--contains", oid])?;
      Ok(out.lines().map(|l| l.trim().to_string()).filter(|l| !l.is_empty()).collect())
   }

   /// Local branches containing `oid`, used by the post-rewrite hook to
   /// skip commits that have already gone loose.
   pub fn local_branches_containing(&self, oid: &str) -> Result<Vec<String>> {
      let out = self.run(&["branch", "--contains", oid]).unwrap_or_default();
      Ok(out.lines().map(|l| l.trim_start_matches("* ").trim().to_string()).filter(|l| !l.is_empty()).collect())
   }

   /// Orders `oids` ancestor-first without walking beyond the given set
   /// (`git rev-list --no-walk --topo-order --reverse`). Used to sort
   /// caller-supplied oid sets defensively rather than trusting their
   /// input ordering.
   pub fn sort_topo(&self, oids: &[String]) -> Result<Vec<String>> {
      if oids.is_empty() {
         return Ok(Vec::new());
      }
      let mut args = vec!["rev-list", "--no-walk", "--topo-order", "--reverse"];
      args.extend(oids.iter().map(String::as_str));
      let out = self.run(&args)?;
      Ok(out.lines().map(str::to_string).collect())
   }

   pub fn head(&self) -> Result<CommitInfo> {
      self.commit("HEAD")
   }

   /// The most recent commit on the current branch where both author and
   /// committer match `email`, used by the timezone-change check. Walks
   /// back at most 20 commits before giving up.
   pub fn last_commit_by(&self, email: &str) -> Result<Option<CommitInfo>> {
      let out = self
         .run(&["log", "--format=%H", &format!("--author={email}"), "-n", "20"])
         .unwrap_or_default();
      for oid in out.lines().filter(|l| !l.is_empty()) {
         let commit = self.commit(oid)?;
         if commit.committer.email == email {
            return Ok(Some(commit));
         }
      }
      Ok(None)
   }

   pub fn commit(&self, rev: &str) -> Result<CommitInfo> {
      let oid = self.rev_parse(rev)?;
      let raw = self.run(&["show", "-s", &format!("--format={COMMIT_FORMAT}"), &oid])?;
      parse_commit(&raw)
   }

   /// Commits in `range`, ancestor-first (`git rev-list --reverse`). The
   /// range rewriter relies on this order; callers that receive commits
   /// from elsewhere should still sort defensively.
   pub fn commits_in_range(&self, range: &str) -> Result<Vec<CommitInfo>> {
      let out = self
         .run(&["rev-list", "--reverse", range])
         .map_err(|_| PrivacyError::BadRevision(range.to_string()))?;
      out.lines().filter(|l| !l.is_empty()).map(|oid| self.commit(oid)).collect()
   }

   /// Commits reachable from `rev`, newest-first, optionally restricted to
   /// `paths` — the `log` subcommand's enumeration.
   pub fn log(&self, rev: &str, paths: &[String]) -> Result<Vec<CommitInfo>> {
      let mut args = vec!["rev-list", rev];
      if !paths.is_empty() {
         args.push("--");
         args.extend(paths.iter().map(String::as_str));
      }
      let out = self.run(&args).map_err(|_| PrivacyError::BadRevision(rev.to_string()))?;
      out.lines().filter(|l| !l.is_empty()).map(|oid| self.commit(oid)).collect()
   }

   /// `git commit --amend --allow-empty --no-verify`, overriding author and
   /// committer dates and, when `message` is `Some`, the message too.
   /// Returns the new HEAD oid. Sets `GITPRIVACY_ACTIVE=yes` in the child's
   /// environment so the hooks it triggers short-circuit.
   pub fn amend(&self, author: Timestamp, committer: Timestamp, message: Option<&str>) -> Result<String> {
      let mut cmd = Command::new("git");
      cmd.current_dir(&self.worktree)
         .arg("commit")
         .arg("--amend")
         .arg("--allow-empty")
         .arg("--no-verify")
         .arg(format!("--date={}", author.format_git()))
         .env("GIT_COMMITTER_DATE", committer.format_git())
         .env("GITPRIVACY_ACTIVE", "yes")
         .stdout(Stdio::piped())
         .stderr(Stdio::piped());
      match message {
         Some(msg) => {
            cmd.arg("--message").arg(msg);
         },
         None => {
            cmd.arg("--no-edit");
         },
      }
      let output = cmd.output().map_err(|e| PrivacyError::GitError(e.to_string()))?;
      if !output.status.success() {
         return Err(PrivacyError::GitError(String::from_utf8_lossy(&output.stderr).into_owned()));
      }
      self.rev_parse("HEAD")
   }

   /// `git replace <old> <new>`, honoring the `ReplaceMode`. A no-op under
   /// `ReplaceMode::Off`.
   pub fn write_replacement(&self, old: &str, new: &str, mode: ReplaceMode) -> Result<()> {
      match mode {
         ReplaceMode::Off => Ok(()),
         ReplaceMode::UpdateOrAdd => self.run(&["replace", "-f", old, new]).map(|_| ()),
         ReplaceMode::UpdateExisting => {
            let listed = self.run(&["replace", "--list", old]).unwrap_or_default();
            if listed.trim().is_empty() {
               Ok(())
            } else {
               self.run(&["replace", "-f", old, new]).map(|_| ())
            }
         },
      }
   }

   /// Stream-rewrites a sequence of commits via `commit-tree`, remapping
   /// parents as it goes. `rewrites` must be ancestor-first. Updates
   /// `ref_name` to the new tip and writes replacement refs per `mode`.
   pub fn rewrite_range(
      &self,
      rewrites: &[(CommitInfo, Timestamp, Timestamp, String)],
      ref_name: &str,
      mode: ReplaceMode,
   ) -> Result<()> {
      let mut parent_map: HashMap<String, String> = HashMap::new();
      let mut new_head: Option<String> = None;

      for (commit, new_author, new_committer, new_message) in rewrites {
         let new_parents: Vec<String> = commit
            .parents
            .iter()
            .map(|p| parent_map.get(p).cloned().unwrap_or_else(|| p.clone()))
            .collect();

         let mut cmd = Command::new("git");
         cmd.current_dir(&self.worktree).arg("commit-tree").arg(&commit.tree);
         for parent in &new_parents {
            cmd.arg("-p").arg(parent);
         }
         cmd.arg("-m")
            .arg(new_message)
            .env("GIT_AUTHOR_NAME", &commit.author.name)
            .env("GIT_AUTHOR_EMAIL", &commit.author.email)
            .env("GIT_AUTHOR_DATE", new_author.format_git())
            .env("GIT_COMMITTER_NAME", &commit.committer.name)
            .env("GIT_COMMITTER_EMAIL", &commit.committer.email)
            .env("GIT_COMMITTER_DATE", new_committer.format_git());

         let output = cmd.output().map_err(|e| PrivacyError::GitError(e.to_string()))?;
         if !output.status.success() {
            return Err(PrivacyError::GitError(format!(
               "commit-tree failed for {}: {}",
               commit.oid,
               String::from_utf8_lossy(&output.stderr)
            )));
         }
         let new_oid = String::from_utf8_lossy(&output.stdout).trim().to_string();
         self.write_replacement(&commit.oid, &new_oid, mode)?;
         parent_map.insert(commit.oid.clone(), new_oid.clone());
         new_head = Some(new_oid);
      }

      if let Some(head) = new_head {
         self.run(&["update-ref", &format!("refs/heads/{ref_name}"), &head])?;
      }
      Ok(())
   }

   /// Rewrites `commits` (ancestor-first) substituting author/committer
   /// identities through `mappings`, leaving dates, tree and message
   /// untouched. Shares the same `commit-tree` parent-remap engine as
   /// [`GitRepo::rewrite_range`] rather than `git filter-branch`.
   pub fn rewrite_identities(
      &self,
      commits: &[CommitInfo],
      mappings: &[EmailMapping],
      ref_name: &str,
   ) -> Result<()> {
      let mut parent_map: HashMap<String, String> = HashMap::new();
      let mut new_head: Option<String> = None;

      for commit in commits {
         let new_parents: Vec<String> = commit
            .parents
            .iter()
            .map(|p| parent_map.get(p).cloned().unwrap_or_else(|| p.clone()))
            .collect();
         let author = apply_email_mapping(&commit.author, mappings);
         let committer = apply_email_mapping(&commit.committer, mappings);

         let mut cmd = Command::new("git");
         cmd.current_dir(&self.worktree).arg("commit-tree").arg(&commit.tree);
         for parent in &new_parents {
            cmd.arg("-p").arg(parent);
         }
         cmd.arg("-m")
            .arg(&commit.message)
            .env("GIT_AUTHOR_NAME", &author.name)
            .env("GIT_AUTHOR_EMAIL", &author.email)
            .env("GIT_AUTHOR_DATE", author.ts.format_git())
            .env("GIT_COMMITTER_NAME", &committer.name)
            .env("GIT_COMMITTER_EMAIL", &committer.email)
            .env("GIT_COMMITTER_DATE", committer.ts.format_git());

         let output = cmd.output().map_err(|e| PrivacyError::GitError(e.to_string()))?;
         if !output.status.success() {
            return Err(PrivacyError::GitError(format!(
               "commit-tree failed for {}: {}",
               commit.oid,
               String::from_utf8_lossy(&output.stderr)
            )));
         }
         let new_oid = String::from_utf8_lossy(&output.stdout).trim().to_string();
         parent_map.insert(commit.oid.clone(), new_oid.clone());
         new_head = Some(new_oid);
      }

      if let Some(head) = new_head {
         self.run(&["update-ref", &format!("refs/heads/{ref_name}"), &head])?;
      }
      Ok(())
   }
}

/// One `OLD[:NEW[:NAME]]` email redaction rule.
#[derive(Debug, Clone)]
pub struct EmailMapping {
   pub old: String,
   pub new: String,
   pub name: Option<String>,
}

fn apply_email_mapping(identity: &Identity, mappings: &[EmailMapping]) -> Identity {
   match mappings.iter().find(|m| m.old == identity.email) {
      Some(m) => Identity {
         name: m.name.clone().unwrap_or_else(|| identity.name.clone()),
         email: m.new.clone(),
         ts: identity.ts,
      },
      None => identity.clone(),
   }
}

const COMMIT_FORMAT: &str =
   "%H%x00%T%x00%P%x00%an%x00%ae%x00%aI%x00%cn%x00%ce%x00%cI%x00%B";

fn parse_commit(raw: &str) -> Result<CommitInfo> {
   let mut parts = raw.splitn(9, '\0');
   let mut next = || parts.next().ok_or_else(|| PrivacyError::GitError("malformed commit record".into()));

   let oid = next()?.to_string();
   let tree = next()?.to_string();
   let parents: Vec<String> = next()?.split_whitespace().map(str::to_string).collect();
   let author_name = next()?.to_string();
   let author_email = next()?.to_string();
   let author_date = next()?.to_string();
   let committer_name = next()?.to_string();
   let committer_email = next()?.to_string();
   let committer_date = next()?.to_string();
   let message = parts.next().unwrap_or("").trim_end_matches('\n').to_string();

   Ok(CommitInfo {
      oid,
      tree,
      parents,
      author: Identity { name: author_name, email: author_email, ts: parse_iso8601(&author_date)? },
      committer: Identity {
         name: committer_name,
         email: committer_email,
         ts: parse_iso8601(&committer_date)?,
      },
      message,
   })
}

fn parse_iso8601(s: &str) -> Result<Timestamp> {
   let dt = DateTime::parse_from_rfc3339(s)
      .map_err(|e| PrivacyError::GitError(format!("unparseable commit date '{s}': {e}")))?;
   Ok(Timestamp::new(dt.timestamp(), dt.offset().local_minus_utc() / 60))
}

fn run_git_in(dir: impl AsRef<Path>, args: &[&str]) -> Result<String> {
   let output = Command::new("git")
      .current_dir(dir)
      .args(args)
      .output()
      .map_err(|e| PrivacyError::GitError(format!("failed to run git {}: {e}", args.join(" "))))?;
   if !output.status.success() {
      return Err(PrivacyError::GitError(String::from_utf8_lossy(&output.stderr).into_owned()));
   }
   Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Sanity check that `DATE_FMT` round-trips through `git commit --date`;
/// exercised end-to-end in `rewrite.rs`'s fixture tests.
#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_null_separated_commit_record() {
      let raw = "abc123\0tree1\0parent1 parent2\0Alice\0alice@example.com\
         \02018-12-18T14:42:13+00:00\0Bob\0bob@example.com\
         \02018-12-18T14:42:20+00:00\0Subject line\n\nBody text\n";
      let commit = parse_commit(raw).unwrap();
      assert_eq!(commit.oid, "abc123");
      assert_eq!(commit.parents, vec!["parent1", "parent2"]);
      assert_eq!(commit.author.name, "Alice");
      assert_eq!(commit.committer.email, "bob@example.com");
      assert_eq!(commit.message, "Subject line\n\nBody text");
      assert_eq!(commit.author.ts.tz_offset_minutes(), 0);
   }

   #[test]
   fn date_fmt_matches_git_porcelain_style() {
      assert_eq!(DATE_FMT, "%a %b %d %H:%M:%S %Y %z");
   }
}
