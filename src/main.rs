//! CLI entry point: parses arguments, discovers the repository, and
//! dispatches to the library's components through a `match` over a
//! `clap::Subcommand`.

use std::io::{self, BufRead, Write as _};

use clap::Parser;
use git_privacy::{
   cli::{Cli, Command, TimezoneChange},
   codec::Decoder,
   config::Config,
   crypto::derive_password_key,
   error::{PrivacyError, Result},
   git::{EmailMapping, GitRepo},
   hooks, keys::KeyStore,
   rewrite::RangeRewriter,
   style, templates,
};

fn main() {
   let cli = Cli::parse();
   match run(&cli.command) {
      Ok(code) => std::process::exit(code),
      Err(err) => {
         eprintln!("{}", style::error(&err.to_string()));
         std::process::exit(err.exit_code());
      },
   }
}

/// Dispatches one subcommand, returning the process exit code on success
/// (almost always `0`; `pre-push` uses a non-zero exit to signal "blocked"
/// rather than failing).
fn run(command: &Command) -> Result<i32> {
   let repo = GitRepo::discover(std::env::current_dir()?)?;

   match command {
      Command::Init { global, timezone_change } => cmd_init(&repo, *global, *timezone_change),
      Command::Log { rev, paths } => cmd_log(&repo, rev.as_deref(), paths),
      Command::Redate { startpoint, only_head, force } => {
         cmd_redate(&repo, startpoint.as_deref(), *only_head, *force)
      },
      Command::RedateRewrites => cmd_redate_rewrites(&repo),
      Command::Check => {
         let config = Config::load(&repo);
         hooks::pre_commit(&repo, &config)?;
         Ok(0)
      },
      Command::Tzcheck => {
         hooks::timezone_changed(&repo)?;
         Ok(0)
      },
      Command::PrePush => cmd_pre_push(&repo),
      Command::LogRewrites => {
         let config = Config::load(&repo);
         hooks::post_rewrite(&repo, &config, io::stdin().lock())?;
         Ok(0)
      },
      Command::Keys { init, new, disable, migrate_pwd, archive, no_archive } => {
         cmd_keys(&repo, *init, *new, *disable, *migrate_pwd, *archive, *no_archive)
      },
      Command::RedactEmail { mappings, replacement, github_noreply } => {
         cmd_redact_email(&repo, mappings, replacement, *github_noreply)
      },
      Command::ListEmail { author, email } => cmd_list_email(&repo, *author, *email),
   }
}

fn assert_commits(repo: &GitRepo) -> Result<()> {
   if repo.rev_exists("HEAD") {
      Ok(())
   } else {
      Err(PrivacyError::NoCommits("HEAD".to_string()))
   }
}

// === init ====================================================================

fn cmd_init(repo: &GitRepo, global: bool, timezone_change: Option<TimezoneChange>) -> Result<i32> {
   templates::install(repo, global)?;
   if let Some(choice) = timezone_change {
      let config = Config::load(repo);
      let ignore = matches!(choice, TimezoneChange::Warn);
      config.set("ignoreTimezone", if ignore { "true" } else { "false" })?;
   }
   Ok(0)
}

// === log =====================================================================

fn cmd_log(repo: &GitRepo, rev: Option<&str>, paths: &[String]) -> Result<i32> {
   assert_commits(repo)?;
   let config = Config::load(repo);
   let decoder = hooks::build_decoder(repo, &config)?;

   let commits = repo.log(rev.unwrap_or("HEAD"), paths)?;
   for commit in &commits {
      println!("{}", style::bold(&format!("commit {}", commit.oid)));
      let (a_date, c_date) = decoder.decode(&commit.message);

      print_identity_line("Author", &commit.author.name, &commit.author.email, commit.author.ts, a_date);
      print_identity_line(
         "Commit",
         &commit.committer.name,
         &commit.committer.email,
         commit.committer.ts,
         c_date,
      );
      println!("\n    {}\n", commit.message.replace('\n', "\n    "));
   }
   Ok(0)
}

fn print_identity_line(
   role: &str,
   name: &str,
   email: &str,
   recorded: git_privacy::timestamp::Timestamp,
   real: Option<git_privacy::timestamp::Timestamp>,
) {
   println!("{role}:   {name} <{email}>");
   match real {
      Some(real) => {
         println!("{}", style::error(&format!("Date: {}", recorded.format_git())));
         println!("{}", style::success(&format!("RealDate: {}", real.format_git())));
      },
      None => println!("Date:   {}", recorded.format_git()),
   }
}

// === redate ==================================================================

fn cmd_redate(repo: &GitRepo, startpoint: Option<&str>, only_head: bool, force: bool) -> Result<i32> {
   assert_commits(repo)?;
   let config = Config::load(repo);

   if only_head {
      // `redate --only-head` is what the installed post-commit hook invokes;
      // delegate to the same reentrancy-aware path rather than duplicate it,
      // so a reentrant or mid-cherry-pick invocation skips silently instead
      // of failing.
      hooks::post_commit(repo, &config)?;
      return Ok(0);
   }

   let encoder = hooks::build_encoder(repo, &config)?;

   // A direct range redate during a cherry-pick is a user error, not a hook
   // reentrancy case — fail loudly rather than skip silently.
   if repo.cherry_pick_in_progress() {
      return Err(PrivacyError::CherryPickInProgress);
   }

   if !repo.working_tree_clean()? {
      return Err(PrivacyError::DirtyWorkingTree);
   }

   let head = repo.head()?;
   let single_commit = head.parents.is_empty();
   let range = match startpoint {
      Some(sp) if !single_commit => {
         repo.rev_parse(sp)?;
         format!("{sp}..HEAD")
      },
      Some(sp) => {
         repo.rev_parse(sp)?;
         "HEAD".to_string()
      },
      None => "HEAD".to_string(),
   };

   let commits = repo.commits_in_range(&range)?;
   if commits.is_empty() {
      return Err(PrivacyError::NoCommits(range));
   }

   let oldest = &commits[0];
   if !force {
      let remotes = repo.remote_branches_containing(&oldest.oid)?;
      if !remotes.is_empty() {
         return Err(PrivacyError::ContainsUpstream);
      }
   }

   let mut rewriter = RangeRewriter::new(repo, hooks::range_replace_mode(&config));
   for commit in commits {
      rewriter.update(commit, encoder.as_ref())?;
   }
   rewriter.finish()?;
   Ok(0)
}

fn cmd_redate_rewrites(repo: &GitRepo) -> Result<i32> {
   assert_commits(repo)?;
   let config = Config::load(repo);
   match hooks::redate_rewrites(repo, &config)? {
      hooks::DeferredRedate::NothingPending => {
         println!("No pending rewrites to redact");
      },
      hooks::DeferredRedate::Redated(count) => {
         println!("{}", style::success(&format!("Redated {count} pending rewrite(s)")));
      },
   }
   Ok(0)
}

// === pre-push ================================================================

fn cmd_pre_push(repo: &GitRepo) -> Result<i32> {
   let config = Config::load(repo);
   let result = hooks::pre_push(repo, &config, io::stdin().lock())?;
   Ok(if result.allowed { 0 } else { 1 })
}

// === keys ====================================================================

#[allow(clippy::fn_params_excessive_bools, reason = "mirrors clap's one-flag-per-action surface")]
fn cmd_keys(
   repo: &GitRepo,
   init: bool,
   new: bool,
   disable: bool,
   migrate_pwd: bool,
   archive: bool,
   no_archive: bool,
) -> Result<i32> {
   let archive = archive || !no_archive;
   let store = KeyStore::new(repo.privacy_dir().join("keys"));

   if migrate_pwd {
      return keys_migrate(repo, &store, archive);
   }
   if disable {
      if !store.is_initialized() {
         return Err(PrivacyError::NoActiveKey("no active key to disable".into()));
      }
      store.disable(archive)?;
      println!("{}", style::success("Key disabled"));
      return Ok(0);
   }
   if new {
      if !store.is_initialized() {
         return Err(PrivacyError::NoActiveKey(
            "no active key found; run 'git-privacy keys --init' first".into(),
         ));
      }
      store.rotate(archive)?;
      println!("{}", style::success("Key replacement successful"));
      return Ok(0);
   }
   // `--init` is the default mode when no other flag is given.
   let _ = init;
   store.init()?;
   println!("{}", style::success("Key initialisation successful"));
   Ok(0)
}

fn keys_migrate(repo: &GitRepo, store: &KeyStore, archive: bool) -> Result<i32> {
   let config = Config::load(repo);
   let Some(password) = config.password() else {
      return Err(PrivacyError::NoLegacyPassword);
   };
   let salt = config.salt().unwrap_or_default();
   let key = derive_password_key(&password, salt.as_bytes())?;

   if store.is_initialized() && !confirm("A key has already been set. Replace it with password key?") {
      println!("Aborted.");
      return Ok(1);
   }
   store.install(&key, archive)?;
   config.comment_out("password", &password)?;
   if !salt.is_empty() {
      config.comment_out("salt", &salt)?;
   }
   println!("{}", style::success("Migration successful"));
   Ok(0)
}

fn confirm(prompt: &str) -> bool {
   print!("{prompt} [y/N] ");
   io::stdout().flush().ok();
   let mut line = String::new();
   if io::stdin().lock().read_line(&mut line).is_err() {
      return false;
   }
   matches!(line.trim().to_lowercase().as_str(), "y" | "yes")
}

// === email ===================================================================

/// Rewrites author/committer emails, always over `HEAD` — the original runs
/// an unconditional `git filter-branch --env-filter ... -- HEAD`, with no
/// way to scope the rewrite to a narrower range (spec.md §9 Open Question,
/// resolved by following the original literally).
fn cmd_redact_email(
   repo: &GitRepo,
   mappings: &[String],
   replacement: &str,
   github_noreply: bool,
) -> Result<i32> {
   if mappings.is_empty() {
      return Ok(0);
   }
   assert_commits(repo)?;
   let commits = repo.commits_in_range("HEAD")?;
   if commits.is_empty() {
      return Err(PrivacyError::NoCommits("HEAD".to_string()));
   }
   let parsed: Vec<EmailMapping> =
      mappings.iter().map(|m| parse_email_mapping(m, replacement, github_noreply)).collect();
   let branch = repo
      .current_branch()?
      .ok_or_else(|| PrivacyError::Other("refusing to rewrite a detached HEAD".into()))?;
   repo.rewrite_identities(&commits, &parsed, &branch)?;
   println!("{}", style::success(&format!("Redacted {} commit(s)", commits.len())));
   Ok(0)
}

/// Parses the `OLD[:NEW[:NAME]]` CLI grammar. A missing `NEW` falls back to
/// `replacement`; a present `NEW` is taken literally unless `github_noreply`
/// asks for it to be treated as a GitHub username.
fn parse_email_mapping(raw: &str, replacement: &str, github_noreply: bool) -> EmailMapping {
   let (old, rest) = raw.split_once(':').map_or((raw, None), |(o, r)| (o, Some(r)));
   let (new, name) = match rest {
      Some(rest) => rest.split_once(':').map_or((rest, None), |(n, nm)| (n, Some(nm))),
      None => ("", None),
   };

   let email = if new.is_empty() {
      replacement.to_string()
   } else if github_noreply {
      format!("{new}@users.noreply.github.com")
   } else {
      new.to_string()
   };

   EmailMapping {
      old: old.to_string(),
      new: email,
      name: name.filter(|n| !n.is_empty()).map(str::to_string),
   }
}

fn cmd_list_email(repo: &GitRepo, author: bool, email: bool) -> Result<i32> {
   assert_commits(repo)?;
   let commits = repo.commits_in_range("HEAD")?;
   let mut identities = std::collections::BTreeSet::new();
   for commit in &commits {
      identities.insert((commit.author.name.clone(), commit.author.email.clone()));
      identities.insert((commit.committer.name.clone(), commit.committer.email.clone()));
   }
   for (name, addr) in identities {
      match (author, email) {
         (true, false) => println!("{name}"),
         (false, true) => println!("{addr}"),
         _ => println!("{name} <{addr}>"),
      }
   }
   Ok(0)
}
