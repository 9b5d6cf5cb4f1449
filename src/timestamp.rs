//! Timestamp data model and redaction policy.
//!
//! A [`Timestamp`] pairs an instant (UTC seconds since epoch) with the
//! timezone offset it was recorded under. Redaction only ever coarsens the
//! instant; the offset is always carried through untouched.

use std::fmt;

use chrono::{DateTime, FixedOffset, TimeZone, Timelike, Utc};

use crate::error::{PrivacyError, Result};

/// Display format matching Git's own date rendering, used for both the
/// `log` subcommand and the arguments passed to `git commit --amend`.
pub const DATE_FMT: &str = "%a %b %d %H:%M:%S %Y %z";

/// A point in time as Git records it: an instant plus the author's/
/// committer's local offset at the time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timestamp {
   instant: i64,
   tz_offset_minutes: i32,
}

impl Timestamp {
   pub fn new(instant: i64, tz_offset_minutes: i32) -> Self {
      Self { instant, tz_offset_minutes }
   }

   pub fn instant(&self) -> i64 {
      self.instant
   }

   pub fn tz_offset_minutes(&self) -> i32 {
      self.tz_offset_minutes
   }

   fn offset(&self) -> FixedOffset {
      FixedOffset::east_opt(self.tz_offset_minutes * 60)
         .unwrap_or_else(|| FixedOffset::east_opt(0).expect("zero offset is always valid"))
   }

   fn local(&self) -> DateTime<FixedOffset> {
      self.offset().timestamp_opt(self.instant, 0).single().unwrap_or_else(|| {
         Utc.timestamp_opt(self.instant, 0)
            .single()
            .expect("valid instant")
            .with_timezone(&self.offset())
      })
   }

   fn from_local(local: DateTime<FixedOffset>) -> Self {
      Self { instant: local.timestamp(), tz_offset_minutes: local.offset().local_minus_utc() / 60 }
   }

   /// Render using Git's own date format, e.g. `Tue Dec 18 14:42:13 2018 +0000`.
   pub fn format_git(&self) -> String {
      self.local().format(DATE_FMT).to_string()
   }

   /// Parse the `<posix_seconds> <±HHMM>` form embedded in message tags.
   pub fn parse_tag(s: &str) -> Option<Self> {
      let (secs, tz) = s.split_once(' ')?;
      let instant: i64 = secs.parse().ok()?;
      let tz_offset_minutes = parse_tz_token(tz)?;
      Some(Self { instant, tz_offset_minutes })
   }

   /// Render the `<posix_seconds> <±HHMM>` form embedded in message tags.
   pub fn to_tag(self) -> String {
      format!("{} {}", self.instant, format_tz_token(self.tz_offset_minutes))
   }
}

fn parse_tz_token(tz: &str) -> Option<i32> {
   if tz.len() != 5 {
      return None;
   }
   let sign = match tz.as_bytes()[0] {
      b'+' => 1,
      b'-' => -1,
      _ => return None,
   };
   let hours: i32 = tz[1..3].parse().ok()?;
   let minutes: i32 = tz[3..5].parse().ok()?;
   Some(sign * (hours * 60 + minutes))
}

fn format_tz_token(tz_offset_minutes: i32) -> String {
   let sign = if tz_offset_minutes < 0 { '-' } else { '+' };
   let abs = tz_offset_minutes.abs();
   format!("{sign}{:02}{:02}", abs / 60, abs % 60)
}

impl fmt::Display for Timestamp {
   fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
      write!(f, "{}", self.format_git())
   }
}

/// Which fields a [`RedactionPolicy`] coarsens to their minimum value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RedactionPattern {
   pub month: bool,
   pub day: bool,
   pub hour: bool,
   pub minute: bool,
   pub second: bool,
}

impl RedactionPattern {
   /// Parse a comma-separated token list (`M,d,h,m,s`), matching the
   /// `privacy.pattern` config value. Unknown tokens are ignored.
   pub fn parse(pattern: &str) -> Self {
      let mut out = Self::default();
      for token in pattern.split(',') {
         match token.trim() {
            "M" => out.month = true,
            "d" => out.day = true,
            "h" => out.hour = true,
            "m" => out.minute = true,
            "s" => out.second = true,
            _ => {},
         }
      }
      out
   }

   pub fn is_empty(self) -> bool {
      self == Self::default()
   }
}

/// An hour window `[start, end)` used to clamp the redacted hour. The `end`
/// boundary is exclusive, matching "office hours" semantics: an hour equal
/// to `end` clamps down to `end`; an hour equal to `start` is left alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HourLimit {
   pub start: u32,
   pub end: u32,
}

impl HourLimit {
   /// Parse the `"H1-H2"` config syntax. An empty string means no limit.
   pub fn parse(limit: &str) -> Result<Option<Self>> {
      let limit = limit.trim();
      if limit.is_empty() {
         return Ok(None);
      }
      let (start, end) = limit
         .split_once('-')
         .ok_or_else(|| PrivacyError::Other(format!("unexpected syntax for limit: '{limit}'")))?;
      let start: u32 = start
         .trim()
         .parse()
         .map_err(|_| PrivacyError::Other(format!("unexpected syntax for limit: '{limit}'")))?;
      let end: u32 = end
         .trim()
         .parse()
         .map_err(|_| PrivacyError::Other(format!("unexpected syntax for limit: '{limit}'")))?;
      Ok(Some(Self { start, end }))
   }
}

/// The redaction policy: pattern + optional hour window.
#[derive(Debug, Clone, Copy)]
pub struct RedactionPolicy {
   pattern: RedactionPattern,
   limit: Option<HourLimit>,
}

impl RedactionPolicy {
   pub fn new(pattern: RedactionPattern, limit: Option<HourLimit>) -> Self {
      Self { pattern, limit }
   }

   /// Coarsen `ts` per the configured pattern, then clamp per the hour
   /// limit. The limit is enforced unconditionally, even if the pattern
   /// leaves the hour untouched.
   pub fn redact(&self, ts: Timestamp) -> Timestamp {
      let mut local = ts.local();
      if self.pattern.month {
         local = local.with_month(1).unwrap_or(local);
      }
      if self.pattern.day {
         local = local.with_day(1).unwrap_or(local);
      }
      if self.pattern.hour {
         local = local.with_hour(0).unwrap_or(local);
      }
      if self.pattern.minute {
         local = local.with_minute(0).unwrap_or(local);
      }
      if self.pattern.second {
         local = local.with_second(0).unwrap_or(local);
      }
      if let Some(limit) = self.limit {
         local = enforce_limit(local, limit);
      }
      Timestamp::from_local(local)
   }

   /// `true` iff redacting `ts` would not change it.
   pub fn is_redacted(&self, ts: Timestamp) -> bool {
      self.redact(ts) == ts
   }
}

fn enforce_limit(local: DateTime<FixedOffset>, limit: HourLimit) -> DateTime<FixedOffset> {
   let hour = local.hour();
   if hour < limit.start {
      local.with_hour(limit.start).and_then(|d| d.with_minute(0)).and_then(|d| d.with_second(0))
   } else if hour >= limit.end {
      local.with_hour(limit.end).and_then(|d| d.with_minute(0)).and_then(|d| d.with_second(0))
   } else {
      Some(local)
   }
   .unwrap_or(local)
}

#[cfg(test)]
mod tests {
   use super::*;

   fn ts(y: i32, mo: u32, d: u32, h: u32, mi: u32, s: u32, tz_minutes: i32) -> Timestamp {
      let offset = FixedOffset::east_opt(tz_minutes * 60).unwrap();
      let dt = offset.with_ymd_and_hms(y, mo, d, h, mi, s).unwrap();
      Timestamp::from_local(dt)
   }

   #[test]
   fn basic_reduce_minutes_and_seconds() {
      // S1: pattern=m,s; 2018-12-18 14:42:13 +0000 -> 14:00:00 +0000
      let policy = RedactionPolicy::new(RedactionPattern::parse("m,s"), None);
      let input = ts(2018, 12, 18, 14, 42, 13, 0);
      let expected = ts(2018, 12, 18, 14, 0, 0, 0);
      assert_eq!(policy.redact(input), expected);
   }

   #[test]
   fn limit_clamps_below_and_above_window() {
      // S2: limit=9-17
      let policy = RedactionPolicy::new(RedactionPattern::default(), HourLimit::parse("9-17").unwrap());
      let below = ts(2018, 12, 18, 8, 42, 15, 0);
      assert_eq!(policy.redact(below), ts(2018, 12, 18, 9, 0, 0, 0));
      let above = ts(2018, 12, 18, 17, 42, 15, 0);
      assert_eq!(policy.redact(above), ts(2018, 12, 18, 17, 0, 0, 0));
   }

   #[test]
   fn limit_boundary_ties() {
      let policy = RedactionPolicy::new(RedactionPattern::default(), HourLimit::parse("9-17").unwrap());
      // hour == end clamps down
      let at_end = ts(2018, 1, 1, 17, 5, 5, 0);
      assert_eq!(policy.redact(at_end), ts(2018, 1, 1, 17, 0, 0, 0));
      // hour == start is unchanged
      let at_start = ts(2018, 1, 1, 9, 5, 5, 0);
      assert_eq!(policy.redact(at_start), at_start);
   }

   #[test]
   fn empty_pattern_is_identity() {
      let policy = RedactionPolicy::new(RedactionPattern::default(), None);
      let input = ts(2020, 6, 1, 3, 4, 5, 120);
      assert_eq!(policy.redact(input), input);
   }

   #[test]
   fn limit_0_24_never_triggers() {
      let policy = RedactionPolicy::new(RedactionPattern::default(), HourLimit::parse("0-24").unwrap());
      let input = ts(2020, 6, 1, 23, 4, 5, 0);
      assert_eq!(policy.redact(input), input);
   }

   #[test]
   fn idempotence_holds_for_arbitrary_pattern() {
      let policy =
         RedactionPolicy::new(RedactionPattern::parse("M,d,h,m,s"), HourLimit::parse("9-17").unwrap());
      let input = ts(2021, 3, 14, 23, 59, 59, -300);
      let once = policy.redact(input);
      let twice = policy.redact(once);
      assert_eq!(once, twice);
   }

   #[test]
   fn offset_is_preserved_through_redaction() {
      let policy = RedactionPolicy::new(RedactionPattern::parse("M,d,h,m,s"), None);
      let input = ts(2021, 3, 14, 23, 59, 59, -300);
      let redacted = policy.redact(input);
      assert_eq!(redacted.tz_offset_minutes(), input.tz_offset_minutes());
   }

   #[test]
   fn tag_round_trip() {
      let input = ts(2018, 12, 18, 14, 42, 13, -90);
      let tag = input.to_tag();
      let parsed = Timestamp::parse_tag(&tag).unwrap();
      assert_eq!(parsed, input);
   }
}
