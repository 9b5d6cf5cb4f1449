//! Hook coordinator: the state machine spanning post-commit, pre-commit,
//! pre-push, and post-rewrite, plus the deferred-redate command that drains
//! the rewrite log.

use std::{
   fs,
   io::BufRead,
   path::PathBuf,
};

use chrono::Local;

use crate::{
   codec::{BasicEncoder, Encoder, MessageEmbeddingEncoder},
   config::Config,
   crypto::{DecryptionProvider, Encryptor},
   error::{PrivacyError, Result},
   git::{GitRepo, ReplaceMode},
   keys::KeyStore,
   rewrite::{AmendRewriter, RangeRewriter},
   timestamp::RedactionPolicy,
   style,
};

pub const REENTRANCY_VAR: &str = "GITPRIVACY_ACTIVE";
const NULL_OID: &str = "0000000000000000000000000000000000000000";

/// `true` while running as a child of our own amend — the hooks Git fires
/// for it must no-op.
pub fn is_reentrant() -> bool {
   std::env::var(REENTRANCY_VAR).as_deref() == Ok("yes")
}

/// Replacement mode for the amend path: a replacement ref is only ever
/// created there when replacements are enabled at all.
pub fn replace_mode(config: &Config<'_>) -> ReplaceMode {
   if config.replacements() { ReplaceMode::UpdateOrAdd } else { ReplaceMode::Off }
}

/// Replacement mode for the range path (spec.md §4.4): "update only
/// existing" or "update or add" depending on `replacements`, never fully
/// off, so a rewrite still refreshes pre-existing replacement refs even
/// when the setting is disabled.
pub fn range_replace_mode(config: &Config<'_>) -> ReplaceMode {
   if config.replacements() { ReplaceMode::UpdateOrAdd } else { ReplaceMode::UpdateExisting }
}

pub fn redaction_policy(config: &Config<'_>) -> Result<RedactionPolicy> {
   if config.mode() == "reduce" && config.pattern().is_empty() {
      return Err(PrivacyError::PatternRequired);
   }
   Ok(RedactionPolicy::new(config.redaction_pattern(), config.hour_limit()?))
}

pub fn active_encryptor(repo: &GitRepo, config: &Config<'_>) -> Result<Option<Encryptor>> {
   if config.password().is_some() {
      // Legacy password-based encryption is no longer written going
      // forward; callers should migrate via `keys --migrate-pwd`.
      return Err(PrivacyError::Other(
         "A password is set in your config. Password-based encryption is no longer supported. \
          To migrate run\n\n    git-privacy keys --migrate-pwd\n"
            .into(),
      ));
   }
   let store = KeyStore::new(repo.privacy_dir().join("keys"));
   if store.is_initialized() { Ok(Some(Encryptor::new(store.active_key()?))) } else { Ok(None) }
}

pub fn active_decryptor(repo: &GitRepo, config: &Config<'_>) -> Result<Option<DecryptionProvider>> {
   if let Some(password) = config.password() {
      let salt = config.salt().unwrap_or_default();
      return Ok(Some(DecryptionProvider::PasswordLegacy { salt: salt.into_bytes(), password }));
   }
   let store = KeyStore::new(repo.privacy_dir().join("keys"));
   if !store.is_initialized() {
      return Ok(None);
   }
   let mut keys = vec![store.active_key()?];
   keys.extend(store.archived_keys()?);
   Ok(Some(DecryptionProvider::MultiKey(keys)))
}

/// Builds the configured [`Encoder`], boxed so callers don't need to know
/// whether a key is active.
pub fn build_encoder(repo: &GitRepo, config: &Config<'_>) -> Result<Box<dyn Encoder>> {
   let policy = redaction_policy(config)?;
   match active_encryptor(repo, config)? {
      Some(encryptor) => Ok(Box::new(MessageEmbeddingEncoder { policy, encryptor })),
      None => Ok(Box::new(BasicEncoder { policy })),
   }
}

/// Builds the configured [`Decoder`], used by `log`, `check`, and `tzcheck`
/// to recover original dates when a tag is present.
pub fn build_decoder(repo: &GitRepo, config: &Config<'_>) -> Result<Box<dyn crate::codec::Decoder>> {
   match active_decryptor(repo, config)? {
      Some(decryptor) => Ok(Box::new(crate::codec::MessageEmbeddingDecoder { decryptor })),
      None => Ok(Box::new(crate::codec::BasicDecoder)),
   }
}

// === post-commit ============================================================

/// Redates the just-made commit in place. Skips silently during a
/// cherry-pick (would corrupt the sequencer) or when already running as a
/// triggered child of our own amend.
pub fn post_commit(repo: &GitRepo, config: &Config<'_>) -> Result<()> {
   if is_reentrant() || repo.cherry_pick_in_progress() {
      return Ok(());
   }
   let encoder = build_encoder(repo, config)?;
   let rewriter = AmendRewriter::new(repo, replace_mode(config));
   rewriter.rewrite(encoder.as_ref())?;
   Ok(())
}

// === pre-commit ==============================================================

/// Validates the redaction pattern is configured and checks for a
/// timezone change since the user's last commit. Returns `Err` to abort the
/// commit (exit codes per `PrivacyError::exit_code`).
pub fn pre_commit(repo: &GitRepo, config: &Config<'_>) -> Result<()> {
   redaction_policy(config)?;
   if timezone_changed(repo)? && !config.ignore_timezone() {
      return Err(PrivacyError::TimezoneChanged);
   }
   Ok(())
}

/// `true` if the local timezone differs from the offset recorded on the
/// user's most recent commit.
pub fn timezone_changed(repo: &GitRepo) -> Result<bool> {
   let Some(email) = repo.user_email()? else {
      return Err(PrivacyError::NoUserEmail);
   };
   let Some(last) = repo.last_commit_by(&email)? else {
      return Ok(false);
   };
   let last_tz = if last.author.email == email {
      last.author.ts.tz_offset_minutes()
   } else {
      last.committer.ts.tz_offset_minutes()
   };
   let current_tz = Local::now().offset().local_minus_utc() / 60;
   if last_tz != current_tz {
      style::warn("Your timezone has changed since your last commit.");
      return Ok(true);
   }
   Ok(false)
}

// === pre-push ================================================================

pub struct PrePushResult {
   pub allowed: bool,
}

/// Reads `<local_ref> <local_sha> <remote_ref> <remote_sha>` records from
/// `input` (Git's pre-push protocol) and refuses the push if any commit in
/// range still carries an unredacted timestamp.
pub fn pre_push(repo: &GitRepo, config: &Config<'_>, input: impl BufRead) -> Result<PrePushResult> {
   let policy = redaction_policy(config)?;
   let mut allowed = true;

   for line in input.lines() {
      let line = line?;
      let line = line.trim();
      if line.is_empty() {
         continue;
      }
      let fields: Vec<&str> = line.split_whitespace().collect();
      let [local_ref, local_sha, remote_ref, remote_sha] = fields[..] else {
         continue;
      };
      if local_sha == NULL_OID {
         continue; // delete push — always allowed
      }

      let range = if remote_sha == NULL_OID {
         local_sha.to_string()
      } else if !repo.rev_exists(remote_sha) || !repo.is_ancestor(remote_sha, local_sha) {
         style::print_info(&format!(
            "Detected diverging remote for {local_ref}. Skipping pre-push check for unredacted commits."
         ));
         continue;
      } else {
         format!("{remote_sha}..{local_sha}")
      };

      let commits = repo.commits_in_range(&range)?;
      let dirty: Vec<String> = commits
         .iter()
         .filter(|c| !(policy.is_redacted(c.author.ts) && policy.is_redacted(c.committer.ts)))
         .map(|c| c.oid.clone())
         .collect();

      if dirty.is_empty() {
         continue;
      }
      allowed = false;

      eprintln!("{}", style::error("You tried to push commits with unredacted timestamps:"));
      for oid in &dirty {
         eprintln!("{oid}");
      }
      let redate_base = remote_ref.strip_prefix("refs/heads/").unwrap_or(remote_ref);
      eprintln!("\nTo redact and redate run:\n\tgit-privacy redate {redate_base}");

      let mut remote_branches = Vec::new();
      for oid in &dirty {
         remote_branches.extend(repo.remote_branches_containing(oid)?);
      }
      remote_branches.sort();
      remote_branches.dedup();
      if !remote_branches.is_empty() {
         eprintln!(
            "\n{}",
            style::warning(
               "WARNING: Those commits seem to be part of the following remote branches. \
                After a redate your local history will diverge from them:"
            )
         );
         for branch in &remote_branches {
            eprintln!("{branch}");
         }
         eprintln!("\nNote: To push them without a redate pass the '--no-verify' option to git push.");
      }
   }

   Ok(PrePushResult { allowed })
}

// === post-rewrite / rewrite log =============================================

fn rewrite_log_path(repo: &GitRepo) -> PathBuf {
   repo.privacy_dir().join("rewrites")
}

struct RewriteRecord {
   old: String,
   new: String,
   raw: String,
}

fn parse_rewrite_line(line: &str) -> Option<RewriteRecord> {
   let mut parts = line.trim_end_matches('\n').splitn(3, ' ');
   let old = parts.next()?.trim().to_string();
   let new = parts.next()?.trim().to_string();
   if old.is_empty() || new.is_empty() {
      return None;
   }
   Some(RewriteRecord { old, new, raw: line.to_string() })
}

/// Reads the post-rewrite records from `input` and appends any whose new
/// commit still has an unredacted committer date to `privacy/rewrites`.
/// Skips entirely when running as a triggered child of our own amend.
pub fn post_rewrite(repo: &GitRepo, config: &Config<'_>, input: impl BufRead) -> Result<()> {
   if is_reentrant() {
      return Ok(());
   }
   let policy = redaction_policy(config)?;
   let mut appended = false;
   let mut log_contents = String::new();

   for line in input.lines() {
      let line = line?;
      let Some(record) = parse_rewrite_line(&line) else { continue };
      if has_dirty_committer_date(repo, &policy, &record.new)? {
         log_contents.push_str(&record.raw);
         if !log_contents.ends_with('\n') {
            log_contents.push('\n');
         }
         appended = true;
      }
   }

   if appended {
      fs::create_dir_all(repo.privacy_dir())?;
      use std::io::Write as _;
      let mut file = fs::OpenOptions::new().create(true).append(true).open(rewrite_log_path(repo))?;
      file.write_all(log_contents.as_bytes())?;
      style::print_info(
         "A rewrite may have inserted unredacted committer dates. To apply date redaction on \
          these dates run\n\n    git-privacy redate-rewrites\n\nWarning: This alters your Git history.",
      );
   }
   Ok(())
}

fn has_dirty_committer_date(repo: &GitRepo, policy: &RedactionPolicy, oid: &str) -> Result<bool> {
   let Ok(commit) = repo.commit(oid) else {
      return Ok(false); // no longer locatable, nothing to be dirty about
   };
   if repo.local_branches_containing(oid)?.is_empty() {
      return Ok(false); // went loose already, don't chase it
   }
   Ok(!policy.is_redacted(commit.committer.ts))
}

/// Outcome of `redate-rewrites`.
pub enum DeferredRedate {
   NothingPending,
   Redated(usize),
}

/// Drains `privacy/rewrites`: the pending set is every `new` that never
/// appears as an `old` in a later entry. Deletes the log on success.
pub fn redate_rewrites(repo: &GitRepo, config: &Config<'_>) -> Result<DeferredRedate> {
   let path = rewrite_log_path(repo);
   let Ok(contents) = fs::read_to_string(&path) else {
      return Ok(DeferredRedate::NothingPending);
   };

   let records: Vec<RewriteRecord> = contents.lines().filter_map(parse_rewrite_line).collect();
   let olds: std::collections::HashSet<&str> = records.iter().map(|r| r.old.as_str()).collect();
   let mut pending: Vec<String> =
      records.iter().map(|r| r.new.clone()).filter(|new| !olds.contains(new.as_str())).collect();
   pending.sort();
   pending.dedup();

   if pending.is_empty() {
      return Ok(DeferredRedate::NothingPending);
   }
   if !repo.working_tree_clean()? {
      return Err(PrivacyError::DirtyWorkingTree);
   }

   let ordered = repo.sort_topo(&pending)?;
   let encoder = build_encoder(repo, config)?;
   let mut rewriter = RangeRewriter::new(repo, range_replace_mode(config));
   for oid in &ordered {
      let commit = repo.commit(oid)?;
      rewriter.update(commit, encoder.as_ref())?;
   }
   let count = rewriter.len();
   rewriter.finish()?;
   fs::remove_file(&path).ok();
   Ok(DeferredRedate::Redated(count))
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn parses_post_rewrite_line_with_extra() {
      let record = parse_rewrite_line("abc def extra stuff").unwrap();
      assert_eq!(record.old, "abc");
      assert_eq!(record.new, "def");
   }

   #[test]
   fn parses_post_rewrite_line_without_extra() {
      let record = parse_rewrite_line("abc def").unwrap();
      assert_eq!(record.old, "abc");
      assert_eq!(record.new, "def");
   }

   #[test]
   fn pending_set_excludes_chained_intermediates() {
      let records: Vec<RewriteRecord> = vec![
         parse_rewrite_line("a b").unwrap(),
         parse_rewrite_line("b c").unwrap(),
         parse_rewrite_line("x y").unwrap(),
      ];
      let olds: std::collections::HashSet<&str> = records.iter().map(|r| r.old.as_str()).collect();
      let mut pending: Vec<String> =
         records.iter().map(|r| r.new.clone()).filter(|new| !olds.contains(new.as_str())).collect();
      pending.sort();
      assert_eq!(pending, vec!["c".to_string(), "y".to_string()]);
   }
}
