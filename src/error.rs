use thiserror::Error;

/// Errors surfaced by the redaction pipeline and its CLI front end.
///
/// Each variant maps to a process exit code via [`PrivacyError::exit_code`].
#[derive(Debug, Error)]
pub enum PrivacyError {
   #[error("Git command failed: {0}")]
   GitError(String),

   #[error("not a git repository: {0}")]
   NotARepository(String),

   #[error("{0}")]
   ConfigMissing(String),

   #[error(
      "Missing pattern configuration. Set a reduction pattern using\n\n    git config privacy.pattern <pattern>\n\nThe pattern is a comma separated list that may contain the following time unit identifiers: M: month, d: day, h: hour, m: minute, s: second."
   )]
   PatternRequired,

   #[error("Cannot redate: you have unstaged changes.")]
   DirtyWorkingTree,

   #[error("found nothing to redate for '{0}'")]
   NoCommits(String),

   #[error("bad revision '{0}'")]
   BadRevision(String),

   #[error(
      "You are trying to redate commits contained in remote branches.\nUse '-f' to proceed if you are really sure."
   )]
   ContainsUpstream,

   #[error("Warning: cherry-pick in progress. No redate possible.")]
   CherryPickInProgress,

   #[error("key store invariant violated: {0}")]
   KeyStoreInvariantViolation(String),

   #[error("no active key found: {0}")]
   NoActiveKey(String),

   #[error("no home directory found (tried HOME and USERPROFILE)")]
   NoHomeDir,

   #[error("no legacy password configured to migrate")]
   NoLegacyPassword,

   #[error("No user email set.")]
   NoUserEmail,

   #[error(
      "\nabort commit (set \"git config privacy.ignoreTimezone true\" to commit anyway)"
   )]
   TimezoneChanged,

   #[error("IO error: {0}")]
   IoError(#[from] std::io::Error),

   #[error("{0}")]
   Other(String),
}

pub type Result<T> = std::result::Result<T, PrivacyError>;

impl PrivacyError {
   /// Process exit code for this error, per the CLI exit code convention.
   pub fn exit_code(&self) -> i32 {
      match self {
         Self::NotARepository(_)
         | Self::ConfigMissing(_)
         | Self::PatternRequired
         | Self::DirtyWorkingTree
         | Self::KeyStoreInvariantViolation(_)
         | Self::NoActiveKey(_)
         | Self::NoHomeDir
         | Self::NoLegacyPassword => 1,
         Self::ContainsUpstream => 3,
         Self::CherryPickInProgress => 5,
         Self::TimezoneChanged => 2,
         Self::NoCommits(_) | Self::BadRevision(_) | Self::NoUserEmail => 128,
         Self::GitError(_) | Self::IoError(_) | Self::Other(_) => 1,
      }
   }
}
