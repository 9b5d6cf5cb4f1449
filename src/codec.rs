//! Message codec: embed/extract the `GitPrivacy:` ciphertext tag.
//!
//! Tag matching is strictly line-scoped: split the message on newlines,
//! find the first line with the `GitPrivacy: ` prefix, then tokenize that
//! line on whitespace. No multiline regex over the message.

use crate::{
   crypto::{DecryptionProvider, Encryptor},
   error::Result,
   timestamp::Timestamp,
};

pub const MSG_TAG: &str = "GitPrivacy: ";

/// Result of encoding a commit's dates: the redacted `(author, committer)`
/// timestamps, and the new message if it needs to change (`None` means
/// "leave the message alone", used by callers to choose `--no-edit`).
#[derive(Debug, Clone)]
pub struct EncodedCommit {
   pub author: Timestamp,
   pub committer: Timestamp,
   pub message: Option<String>,
}

/// Produces `(new_author, new_committer, new_message)` for a commit. A
/// closed capability rather than `dyn Encoder`: there are exactly two shapes
/// (dates only, or dates plus an embedded ciphertext tag).
pub trait Encoder {
   fn encode(&self, author: Timestamp, committer: Timestamp, message: &str) -> Result<EncodedCommit>;
}

/// Recovers `(author, committer)` dates from a commit message, where
/// possible.
pub trait Decoder {
   fn decode(&self, message: &str) -> (Option<Timestamp>, Option<Timestamp>);
}

/// Coarsens dates but never touches the message. `new_msg` is `None`
/// (no-op) iff both dates were already redacted; otherwise it's the
/// original message, unchanged — callers that must supply a message
/// unconditionally (the range rewriter's `commit-tree`) get one, while the
/// amend path can tell "nothing to do" apart from "same text, new dates".
pub struct BasicEncoder {
   pub policy: crate::timestamp::RedactionPolicy,
}

impl Encoder for BasicEncoder {
   fn encode(&self, author: Timestamp, committer: Timestamp, message: &str) -> Result<EncodedCommit> {
      let new_author = self.policy.redact(author);
      let new_committer = self.policy.redact(committer);
      let message = if new_author == author && new_committer == committer {
         None
      } else {
         Some(message.to_string())
      };
      Ok(EncodedCommit { author: new_author, committer: new_committer, message })
   }
}

/// Never decodes anything: used when no key is configured, so `log` falls
/// back to displaying only the recorded (redacted) dates.
pub struct BasicDecoder;

impl Decoder for BasicDecoder {
   fn decode(&self, _message: &str) -> (Option<Timestamp>, Option<Timestamp>) {
      (None, None)
   }
}

/// Embeds a `GitPrivacy:` ciphertext tag. Composes a [`BasicEncoder`]'s
/// policy with an [`Encryptor`] by value (not by inheritance): the date
/// math and the message surgery are independent concerns.
pub struct MessageEmbeddingEncoder {
   pub policy: crate::timestamp::RedactionPolicy,
   pub encryptor: Encryptor,
}

impl Encoder for MessageEmbeddingEncoder {
   fn encode(&self, author: Timestamp, committer: Timestamp, message: &str) -> Result<EncodedCommit> {
      let new_author = self.policy.redact(author);
      let new_committer = self.policy.redact(committer);
      if new_author == author && new_committer == committer {
         return Ok(EncodedCommit { author: new_author, committer: new_committer, message: None });
      }

      let new_message = match find_tag_line(message) {
         None => {
            // The tag stashes the *true* dates, not the redacted ones —
            // otherwise there'd be nothing left to recover.
            let a_cipher = self.encryptor.encrypt(author.to_tag().as_bytes())?;
            let c_cipher = self.encryptor.encrypt(committer.to_tag().as_bytes())?;
            let tag = format!("{MSG_TAG}{a_cipher} {c_cipher}");
            if message.is_empty() { tag } else { format!("{message}\n{tag}") }
         },
         Some((line_start, line_end, first_token)) => {
            // Substitution rule: keep whatever format the author-date
            // ciphertext is already in, overwrite only the committer half
            // with a fresh cipher over the true (not redacted) committer date.
            let c_cipher = self.encryptor.encrypt(committer.to_tag().as_bytes())?;
            let new_line = format!("{MSG_TAG}{first_token} {c_cipher}");
            format!("{}{new_line}{}", &message[..line_start], &message[line_end..])
         },
      };
      Ok(EncodedCommit { author: new_author, committer: new_committer, message: Some(new_message) })
   }
}

/// Decodes a `GitPrivacy:` tag via a [`DecryptionProvider`], trying the
/// active key then each archived key in turn.
pub struct MessageEmbeddingDecoder {
   pub decryptor: DecryptionProvider,
}

impl Decoder for MessageEmbeddingDecoder {
   fn decode(&self, message: &str) -> (Option<Timestamp>, Option<Timestamp>) {
      let Some((_, _, first_token)) = find_tag_line(message) else {
         return (None, None);
      };
      let second_token = tag_second_token(message);

      let first_plain = self.decryptor.decrypt(first_token).ok().and_then(|b| String::from_utf8(b).ok());

      if let Some(second_token) = second_token {
         // Dedicated ciphers. If the first still decrypts to a combined
         // "a;c" plaintext (mixed legacy), keep only the author half.
         let a_date = first_plain.as_deref().and_then(|p| match p.split_once(';') {
            Some((a, _)) => Timestamp::parse_tag(a),
            None => Timestamp::parse_tag(p),
         });
         let c_date = self
            .decryptor
            .decrypt(second_token)
            .ok()
            .and_then(|b| String::from_utf8(b).ok())
            .and_then(|p| Timestamp::parse_tag(&p));
         (a_date, c_date)
      } else {
         // Single cipher: either dedicated author-only, or legacy combined.
         match first_plain.as_deref() {
            Some(plain) if plain.contains(';') => {
               let (a, c) = plain.split_once(';').expect("checked contains ';'");
               (Timestamp::parse_tag(a), Timestamp::parse_tag(c))
            },
            Some(plain) => (Timestamp::parse_tag(plain), None),
            None => (None, None),
         }
      }
   }
}

/// Finds the first `GitPrivacy:` line and its first whitespace-delimited
/// token, returning the byte range of the whole line (for in-place
/// substitution) and the token itself.
fn find_tag_line(message: &str) -> Option<(usize, usize, &str)> {
   let mut offset = 0;
   for line in message.split_inclusive('\n') {
      let trimmed = line.strip_suffix('\n').unwrap_or(line);
      if let Some(rest) = trimmed.strip_prefix(MSG_TAG) {
         let first_token = rest.split_whitespace().next().unwrap_or("");
         return Some((offset, offset + trimmed.len(), first_token));
      }
      offset += line.len();
   }
   None
}

fn tag_second_token(message: &str) -> Option<&str> {
   for line in message.lines() {
      if let Some(rest) = line.strip_prefix(MSG_TAG) {
         let mut tokens = rest.split_whitespace();
         tokens.next()?;
         return tokens.next();
      }
   }
   None
}

#[cfg(test)]
mod tests {
   use super::*;
   use crate::{
      crypto::SecretKey,
      timestamp::{RedactionPattern, RedactionPolicy},
   };

   fn policy() -> RedactionPolicy {
      RedactionPolicy::new(RedactionPattern::parse("m,s"), None)
   }

   fn ts(secs: i64) -> Timestamp {
      Timestamp::new(secs, 0)
   }

   #[test]
   fn basic_encoder_noop_when_already_redacted() {
      let encoder = BasicEncoder { policy: policy() };
      let redacted = policy().redact(ts(1_545_144_133));
      let out = encoder.encode(redacted, redacted, "msg").unwrap();
      assert!(out.message.is_none());
   }

   #[test]
   fn basic_encoder_returns_original_message_when_dates_change() {
      let encoder = BasicEncoder { policy: policy() };
      let out = encoder.encode(ts(1_545_144_133), ts(1_545_144_133), "original message").unwrap();
      assert_eq!(out.message.as_deref(), Some("original message"));
   }

   #[test]
   fn embedding_round_trip_fresh_tag() {
      let key = SecretKey::generate();
      let encoder =
         MessageEmbeddingEncoder { policy: policy(), encryptor: Encryptor::new(key.clone()) };
      // Invariant 3: decoding must reproduce the *original* dates, not the
      // redacted ones the commit ends up recording.
      let author_in = ts(1_545_144_133);
      let committer_in = ts(1_545_144_200);
      let out = encoder.encode(author_in, committer_in, "fix: thing").unwrap();
      let message = out.message.unwrap();
      assert!(message.starts_with("fix: thing\n"));
      assert!(message.contains(MSG_TAG));

      let decoder =
         MessageEmbeddingDecoder { decryptor: DecryptionProvider::SingleKey(key) };
      let (a, c) = decoder.decode(&message);
      assert_eq!(a, Some(author_in));
      assert_eq!(c, Some(committer_in));
   }

   #[test]
   fn substitution_preserves_author_overwrites_committer() {
      let key = SecretKey::generate();
      let encoder =
         MessageEmbeddingEncoder { policy: policy(), encryptor: Encryptor::new(key.clone()) };
      let author_in = ts(1_545_144_133);
      let committer_in_1 = ts(1_545_144_200);
      let first = encoder.encode(author_in, committer_in_1, "msg").unwrap();
      let first_message = first.message.unwrap();

      // A rebase bumps only the committer date; author cipher must survive.
      let committer_in_2 = ts(1_700_000_000);
      let second = encoder.encode(first.author, committer_in_2, &first_message).unwrap();
      let second_message = second.message.unwrap();

      // Exactly one tag line remains (invariant 4).
      let tag_lines = second_message.lines().filter(|l| l.starts_with(MSG_TAG)).count();
      assert_eq!(tag_lines, 1);

      let decoder = MessageEmbeddingDecoder { decryptor: DecryptionProvider::SingleKey(key) };
      let (a, c) = decoder.decode(&second_message);
      assert_eq!(a, Some(author_in));
      assert_eq!(c, Some(committer_in_2));
   }

   #[test]
   fn decode_combined_legacy_single_cipher() {
      let key = SecretKey::generate();
      let encryptor = Encryptor::new(key.clone());
      let a = ts(1_545_144_133);
      let c = ts(1_545_144_200);
      let combined = format!("{};{}", a.to_tag(), c.to_tag());
      let cipher = encryptor.encrypt(combined.as_bytes()).unwrap();
      let message = format!("msg\n{MSG_TAG}{cipher}");

      let decoder = MessageEmbeddingDecoder { decryptor: DecryptionProvider::SingleKey(key) };
      let (da, dc) = decoder.decode(&message);
      assert_eq!(da, Some(a));
      assert_eq!(dc, Some(c));
   }

   #[test]
   fn decode_mixed_legacy_two_ciphers() {
      let key = SecretKey::generate();
      let encryptor = Encryptor::new(key.clone());
      let a = ts(1_545_144_133);
      let c_old = ts(1_545_144_200);
      let c_new = ts(1_700_000_000);
      let combined = format!("{};{}", a.to_tag(), c_old.to_tag());
      let combined_cipher = encryptor.encrypt(combined.as_bytes()).unwrap();
      let fresh_c_cipher = encryptor.encrypt(c_new.to_tag().as_bytes()).unwrap();
      let message = format!("msg\n{MSG_TAG}{combined_cipher} {fresh_c_cipher}");

      let decoder = MessageEmbeddingDecoder { decryptor: DecryptionProvider::SingleKey(key) };
      let (da, dc) = decoder.decode(&message);
      assert_eq!(da, Some(a));
      assert_eq!(dc, Some(c_new));
   }

   #[test]
   fn decode_failure_on_one_side_does_not_affect_other() {
      let key_a = SecretKey::generate();
      let key_b = SecretKey::generate();
      let encryptor = Encryptor::new(key_a.clone());
      let a = ts(1_545_144_133);
      let a_cipher = encryptor.encrypt(a.to_tag().as_bytes()).unwrap();
      // committer cipher produced under a key we won't have access to
      let c_cipher = Encryptor::new(SecretKey::generate()).encrypt(b"unused").unwrap();
      let message = format!("msg\n{MSG_TAG}{a_cipher} {c_cipher}");

      let decoder = MessageEmbeddingDecoder { decryptor: DecryptionProvider::SingleKey(key_a) };
      let (da, dc) = decoder.decode(&message);
      assert_eq!(da, Some(a));
      assert_eq!(dc, None);
      let _ = key_b;
   }
}
