//! End-to-end scenarios driven against a real `git` binary, covering the
//! parts of the redaction pipeline that only manifest once hooks and the
//! working tree are involved (dirty-tree redate, pre-push gating, deferred
//! rebase redate). Pattern/limit/crypto law tests live alongside the units
//! they exercise.

mod common;

use common::Fixture;
use git_privacy::timestamp::{RedactionPattern, RedactionPolicy};

fn seconds_policy() -> RedactionPolicy {
   RedactionPolicy::new(RedactionPattern::parse("m,s"), None)
}

#[test]
fn tip_redate_succeeds_under_dirty_tree_but_full_redate_refuses() {
   let fx = Fixture::init();
   fx.config_set("privacy.pattern", "m,s");
   fx.write("a", "one\n");
   fx.commit_at("first", "@1545144133 +0000");

   // Leave an unstaged change in the working tree.
   std::fs::write(fx.path.join("a"), "one\nunstaged\n").unwrap();

   let blocked = fx.git_privacy(&["redate"]);
   assert!(!blocked.status.success());

   let ok = fx.git_privacy(&["redate", "--only-head"]);
   assert!(ok.status.success(), "stderr: {}", String::from_utf8_lossy(&ok.stderr));

   let repo = fx.repo();
   let head = repo.commit(&fx.head()).unwrap();
   let policy = seconds_policy();
   assert!(policy.is_redacted(head.author.ts));
   assert!(policy.is_redacted(head.committer.ts));
}

#[test]
fn pre_push_blocks_unredacted_range_then_redate_unblocks_it() {
   let fx = Fixture::init();
   fx.config_set("privacy.pattern", "m,s");

   fx.write("a", "one\n");
   fx.commit_at("base", "@1545144133 +0000");
   let base = fx.head();

   fx.write("a", "two\n");
   fx.commit_at("second", "@1545144200 +0000");
   fx.write("a", "three\n");
   fx.commit_at("third", "@1545144300 +0000");

   let repo = fx.repo();
   let config = git_privacy::config::Config::load(&repo);
   let stdin = format!("refs/heads/main {} refs/heads/main {base}\n", fx.head());
   let result = git_privacy::hooks::pre_push(&repo, &config, stdin.as_bytes()).unwrap();
   assert!(!result.allowed);

   let out = fx.git_privacy(&["redate", &base]);
   assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));

   let repo = fx.repo();
   let commits = repo.commits_in_range(&format!("{base}..HEAD")).unwrap();
   assert_eq!(commits.len(), 2);
   let policy = seconds_policy();
   for commit in &commits {
      assert!(policy.is_redacted(commit.author.ts));
      assert!(policy.is_redacted(commit.committer.ts));
   }

   let stdin_after = format!("refs/heads/main {} refs/heads/main {base}\n", repo.rev_parse("HEAD").unwrap());
   let result_after = git_privacy::hooks::pre_push(&repo, &config, stdin_after.as_bytes()).unwrap();
   assert!(result_after.allowed);
}

#[test]
fn rebase_deferred_redate_drains_pending_rewrites() {
   let fx = Fixture::init();
   fx.config_set("privacy.pattern", "m,s");

   fx.write("a", "one\n");
   fx.commit_at("base", "@1545144000 +0000");
   fx.write("b", "one\n");
   fx.commit_at("B", "@1545144100 +0000");
   fx.write("c", "one\n");
   fx.commit_at("C", "@1545144200 +0000");

   let repo = fx.repo();
   let commits = repo.commits_in_range("HEAD~2..HEAD").unwrap();
   let base_oid = commits[0].parents[0].clone();
   let b_oid = commits[0].oid.clone();
   let c_oid = commits[1].oid.clone();

   let policy = seconds_policy();
   assert!(!policy.is_redacted(repo.commit(&b_oid).unwrap().committer.ts));
   assert!(!policy.is_redacted(repo.commit(&c_oid).unwrap().committer.ts));

   // `post-rewrite` would have appended one line per rewritten commit
   // (`<old-oid> <new-oid>`); the exact placeholder old oids don't matter
   // since only the "new" side is ever looked up.
   let placeholder_old_1 = "0".repeat(40);
   let placeholder_old_2 = "1".repeat(40);
   let rewrite_log = format!("{placeholder_old_1} {b_oid}\n{placeholder_old_2} {c_oid}\n");
   std::fs::create_dir_all(repo.privacy_dir()).unwrap();
   std::fs::write(repo.privacy_dir().join("rewrites"), rewrite_log).unwrap();

   let config = git_privacy::config::Config::load(&repo);
   let outcome = git_privacy::hooks::redate_rewrites(&repo, &config).unwrap();
   assert!(matches!(outcome, git_privacy::hooks::DeferredRedate::Redated(2)));
   assert!(!repo.privacy_dir().join("rewrites").exists());

   let repo = fx.repo();
   let commits = repo.commits_in_range(&format!("{base_oid}..HEAD")).unwrap();
   assert_eq!(commits.len(), 2);
   for commit in &commits {
      assert!(policy.is_redacted(commit.committer.ts));
   }
}
