//! Command-line surface: one `clap` derive tree mirroring the subcommand
//! table (hooks are wired as hidden subcommands, invoked by the scripts
//! `templates` installs, not typed directly by the user).

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "git-privacy", version, about = "Redact commit timestamps while keeping them recoverable")]
pub struct Cli {
   #[command(subcommand)]
   pub command: Command,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum TimezoneChange {
   Warn,
   Abort,
}

#[derive(Subcommand)]
pub enum Command {
   /// Install the post-commit, pre-commit, pre-push and post-rewrite hooks.
   Init {
      /// Install into the Git template directory instead of this repository.
      #[arg(short = 'g', long)]
      global: bool,
      /// Reaction to a detected timezone change pre-commit. Only written to
      /// config when given; the config default is `warn`.
      #[arg(long, value_enum)]
      timezone_change: Option<TimezoneChange>,
   },

   /// Show commits with both the recorded (possibly redacted) date and the
   /// decoded true date, where recoverable.
   Log {
      #[arg(short = 'r', long = "rev")]
      rev: Option<String>,
      paths: Vec<String>,
   },

   /// Redact and rewrite a revision range (or just HEAD).
   Redate {
      startpoint: Option<String>,
      #[arg(long)]
      only_head: bool,
      /// Proceed even if the range is contained in a remote branch.
      #[arg(short = 'f', long)]
      force: bool,
   },

   /// Drain `privacy/rewrites`, redating whatever a prior rebase/amend left
   /// with an unredacted committer date.
   RedateRewrites,

   /// Pre-commit validation: pattern configured, no unexpected timezone
   /// change. Invoked by the installed hook.
   #[command(hide = true)]
   Check,

   /// Report (without aborting) whether the local timezone has drifted
   /// since the user's last commit.
   Tzcheck,

   /// Pre-push gate, reading ref updates from stdin. Invoked by the
   /// installed hook.
   #[command(name = "pre-push", hide = true)]
   PrePush,

   /// Append post-rewrite records to the pending-rewrite log. Invoked by
   /// the installed hook.
   #[command(name = "log-rewrites", hide = true)]
   LogRewrites,

   /// Key store lifecycle: exactly one of the action flags is expected.
   Keys {
      #[arg(long)]
      init: bool,
      #[arg(long)]
      new: bool,
      #[arg(long)]
      disable: bool,
      #[arg(long = "migrate-pwd")]
      migrate_pwd: bool,
      /// Archive the retired key rather than deleting it (default for `--new`).
      #[arg(long, conflicts_with = "no_archive")]
      archive: bool,
      /// Delete the retired key instead of archiving it.
      #[arg(long = "no-archive")]
      no_archive: bool,
   },

   /// Rewrite author/committer email addresses across history (always over
   /// `HEAD`, matching the original's unconditional `filter-branch -- HEAD`).
   #[command(name = "redact-email")]
   RedactEmail {
      /// `OLD[:NEW[:NAME]]` mappings; bare `OLD` redacts to `--replacement`.
      mappings: Vec<String>,
      /// Email address used in place of an omitted `NEW`.
      #[arg(short = 'r', long, default_value = "noreply@gitprivacy.invalid")]
      replacement: String,
      /// Interpret a non-empty `NEW` as a GitHub username and build a
      /// noreply address from it instead of using it literally.
      #[arg(short = 'g', long = "use-github-noreply")]
      github_noreply: bool,
   },

   /// List distinct author/committer identities seen in history.
   #[command(name = "list-email")]
   ListEmail {
      #[arg(short = 'a', long)]
      author: bool,
      #[arg(short = 'e', long)]
      email: bool,
   },
}
