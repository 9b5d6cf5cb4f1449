//! Config surface: a typed view over the `privacy` section of the
//! repository's local Git config.

use std::fs;

use crate::{
   error::Result,
   git::GitRepo,
   timestamp::{HourLimit, RedactionPattern},
};

const SECTION: &str = "privacy";

pub struct Config<'repo> {
   repo: &'repo GitRepo,
}

impl<'repo> Config<'repo> {
   pub fn load(repo: &'repo GitRepo) -> Self {
      Self { repo }
   }

   fn get(&self, key: &str) -> Option<String> {
      self.repo.config_get(&format!("{SECTION}.{key}")).ok().flatten()
   }

   pub fn mode(&self) -> String {
      self.get("mode").unwrap_or_else(|| "reduce".to_string())
   }

   pub fn pattern(&self) -> String {
      self.get("pattern").unwrap_or_default()
   }

   pub fn redaction_pattern(&self) -> RedactionPattern {
      RedactionPattern::parse(&self.pattern())
   }

   pub fn limit(&self) -> String {
      self.get("limit").unwrap_or_default()
   }

   pub fn hour_limit(&self) -> Result<Option<HourLimit>> {
      HourLimit::parse(&self.limit())
   }

   pub fn ignore_timezone(&self) -> bool {
      self.repo.config_get_bool(&format!("{SECTION}.ignoreTimezone"), true)
   }

   pub fn replacements(&self) -> bool {
      self.repo.config_get_bool(&format!("{SECTION}.replacements"), false)
   }

   pub fn password(&self) -> Option<String> {
      self.get("password").filter(|s| !s.is_empty())
   }

   pub fn salt(&self) -> Option<String> {
      self.get("salt").filter(|s| !s.is_empty())
   }

   pub fn set(&self, key: &str, value: &str) -> Result<()> {
      self.repo.config_set(&format!("{SECTION}.{key}"), value)
   }

   /// Renames `privacy.<key>` to `privacy.#<key>`, preserving its value as
   /// an inert comment line rather than deleting it — used by the legacy
   /// password/salt migration step.
   pub fn comment_out(&self, key: &str, value: &str) -> Result<()> {
      self.repo.config_unset(&format!("{SECTION}.{key}"))?;
      let path = self.repo.config_path();
      let mut contents = fs::read_to_string(&path)?;
      if !contents.ends_with('\n') {
         contents.push('\n');
      }
      contents.push_str(&format!("\t#{key} = {value}\n"));
      fs::write(&path, contents)?;
      Ok(())
   }
}

#[cfg(test)]
mod tests {
   use super::*;

   #[test]
   fn empty_pattern_parses_to_default() {
      assert!(RedactionPattern::parse("").is_empty());
   }
}
