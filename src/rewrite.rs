//! Rewriter: amend-tip and range rewrite strategies.
//!
//! The two strategies share a shape (`update` accumulates, `finish` commits)
//! but deliberately not an implementation: the amend path is single-commit
//! and synchronous against HEAD, the range path batches commits and drives
//! `commit-tree` through [`GitRepo::rewrite_range`].

use crate::{
   codec::Encoder,
   error::Result,
   git::{CommitInfo, GitRepo, ReplaceMode},
   timestamp::Timestamp,
};

/// Redates HEAD in place via `git commit --amend`. Used by the post-commit
/// hook and by `redate --only-head`.
pub struct AmendRewriter<'a> {
   repo: &'a GitRepo,
   replace: ReplaceMode,
}

impl<'a> AmendRewriter<'a> {
   pub fn new(repo: &'a GitRepo, replace: ReplaceMode) -> Self {
      Self { repo, replace }
   }

   /// Loads HEAD, encodes it, and amends. Returns the new HEAD oid.
   pub fn rewrite(&self, encoder: &impl Encoder) -> Result<String> {
      let commit = self.repo.head()?;
      let encoded = encoder.encode(commit.author.ts, commit.committer.ts, &commit.message)?;
      let new_oid = self.repo.amend(encoded.author, encoded.committer, encoded.message.as_deref())?;
      if self.replace != ReplaceMode::Off {
         self.repo.write_replacement(&commit.oid, &new_oid, self.replace)?;
      }
      Ok(new_oid)
   }
}

type QueuedRewrite = (CommitInfo, Timestamp, Timestamp, String);

/// Bulk-rewrites a revision range via `commit-tree`, remapping parents as it
/// goes. Commits must be queued ancestor-first.
pub struct RangeRewriter<'a> {
   repo: &'a GitRepo,
   replace: ReplaceMode,
   queue: Vec<QueuedRewrite>,
}

impl<'a> RangeRewriter<'a> {
   pub fn new(repo: &'a GitRepo, replace: ReplaceMode) -> Self {
      Self { repo, replace, queue: Vec::new() }
   }

   pub fn is_empty(&self) -> bool {
      self.queue.is_empty()
   }

   pub fn len(&self) -> usize {
      self.queue.len()
   }

   /// Computes `(new_author, new_committer, new_message)` for `commit` and
   /// enqueues a rewrite keyed by its original oid. When the encoder leaves
   /// the message unchanged (`None`), the original message is carried
   /// forward — `commit-tree` always needs an explicit `-m`.
   pub fn update(&mut self, commit: CommitInfo, encoder: &impl Encoder) -> Result<()> {
      let encoded = encoder.encode(commit.author.ts, commit.committer.ts, &commit.message)?;
      let message = encoded.message.unwrap_or_else(|| commit.message.clone());
      self.queue.push((commit, encoded.author, encoded.committer, message));
      Ok(())
   }

   /// Runs the stream rewrite over the queued commits. Refs are mapped via
   /// the symbolic branch name, not a raw oid, to avoid "refname is
   /// ambiguous" warnings. A no-op if nothing was queued.
   pub fn finish(self) -> Result<()> {
      if self.queue.is_empty() {
         return Ok(());
      }
      let ref_name = self
         .repo
         .current_branch()?
         .ok_or_else(|| crate::error::PrivacyError::Other("refusing to rewrite a detached HEAD".into()))?;
      self.repo.rewrite_range(&self.queue, &ref_name, self.replace)
   }
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{
      codec::BasicEncoder,
      git::Identity,
      timestamp::{RedactionPattern, RedactionPolicy},
   };

   fn commit(oid: &str, parents: &[&str], secs: i64) -> CommitInfo {
      CommitInfo {
         oid: oid.to_string(),
         tree: "tree".to_string(),
         parents: parents.iter().map(|s| s.to_string()).collect(),
         author: Identity { name: "A".into(), email: "a@x".into(), ts: Timestamp::new(secs, 0) },
         committer: Identity { name: "A".into(), email: "a@x".into(), ts: Timestamp::new(secs, 0) },
         message: "msg".to_string(),
      }
   }

   #[test]
   fn range_rewriter_queues_in_order() {
      let policy = RedactionPolicy::new(RedactionPattern::parse("m,s"), None);
      let encoder = BasicEncoder { policy };
      // RangeRewriter::update doesn't need a live repo; only finish() does.
      let mut queue = Vec::new();
      for (oid, secs) in [("a", 100), ("b", 200), ("c", 300)] {
         let c = commit(oid, &[], secs);
         let encoded = encoder.encode(c.author.ts, c.committer.ts, &c.message).unwrap();
         queue.push(encoded);
      }
      assert_eq!(queue.len(), 3);
   }
}
