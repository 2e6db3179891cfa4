//! Refspec parsing and matching.
//!
//! A refspec maps remote-side names to local-side names (fetch) or local-side
//! names to remote-side names (push): `[+]<src>[:<dst>]`, with at most one `*`
//! per side.

use crate::connection::Direction;
use crate::storage::utils::{HEADS_PREFIX, REFS_PREFIX, REMOTES_PREFIX, TAGS_PREFIX};
use crate::{Error, Result};
use lazy_static::lazy_static;
use regex::Regex;
use std::fmt;

lazy_static! {
    static ref FORBIDDEN: Regex =
        Regex::new(r"[\x00-\x20~^:?\[\\\x7f]").expect("refspec pattern is valid");
}

const WILDCARD: char = '*';

/// Where a fetch refspec without a destination sends what it matches.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShorthandTarget {
    /// Named remote with its own refspecs: branches go to
    /// `refs/remotes/<name>/…`, tags keep their `refs/tags/…` name.
    Tracking(String),
    /// No tracking namespace: branches are written straight to `refs/heads/…`
    /// and tags are not created.
    LocalBranches,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Refspec {
    text: String,
    source: String,
    destination: Option<String>,
    force: bool,
    direction: Direction,
}

impl Refspec {
    pub fn parse(text: &str, direction: Direction) -> Result<Self> {
        let malformed = |reason| Error::MalformedRefspec {
            spec: text.to_string(),
            reason,
        };

        let trimmed = text.trim();
        let (force, rest) = match trimmed.strip_prefix('+') {
            Some(rest) => (true, rest),
            None => (false, trimmed),
        };

        let (source, destination) = match rest.split_once(':') {
            Some((src, dst)) => (src, (!dst.is_empty()).then_some(dst)),
            None => (rest, None),
        };

        if source.is_empty() {
            match (direction, destination) {
                (Direction::Push, Some(_)) => {}
                (_, None) => return Err(malformed("empty refspec")),
                (Direction::Fetch, Some(_)) => return Err(malformed("fetch source is empty")),
            }
        }
        if force && source.is_empty() {
            return Err(malformed("a deletion cannot be forced"));
        }

        for side in std::iter::once(source).chain(destination) {
            check_pattern(side).map_err(malformed)?;
        }

        let src_stars = source.matches(WILDCARD).count();
        let dst_stars = destination.map_or(0, |dst| dst.matches(WILDCARD).count());
        if src_stars > 1 || dst_stars > 1 {
            return Err(malformed("more than one `*` on a side"));
        }
        if destination.is_some() && src_stars != dst_stars {
            return Err(malformed("wildcard must appear on both sides"));
        }

        Ok(Refspec {
            text: text.to_string(),
            source: source.to_string(),
            destination: destination.map(str::to_string),
            force,
            direction,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn destination(&self) -> Option<&str> {
        self.destination.as_deref()
    }

    pub fn is_force(&self) -> bool {
        self.force
    }

    pub fn direction(&self) -> Direction {
        self.direction
    }

    pub fn is_wildcard(&self) -> bool {
        self.source.contains(WILDCARD)
    }

    /// `:dst` push refspecs remove the destination ref.
    pub fn is_delete(&self) -> bool {
        self.source.is_empty()
    }

    /// How well `name` matches the source side: `Some(0)` is an exact or
    /// wildcard match, higher ranks are progressively looser shorthand
    /// expansions. Callers pick the lowest rank among candidates.
    pub fn match_rank(&self, name: &str) -> Option<usize> {
        if self.is_delete() {
            return None;
        }
        if self.is_wildcard() {
            return capture(&self.source, name).map(|_| 0);
        }
        if self.source == name {
            return Some(0);
        }
        if self.source.starts_with(REFS_PREFIX) {
            return None;
        }
        shorthand_candidates(&self.source)
            .iter()
            .position(|candidate| candidate == name)
    }

    pub fn matches_source(&self, name: &str) -> bool {
        self.match_rank(name).is_some()
    }

    /// Destination for a source name that matched, without any shorthand
    /// fallback. `None` if the refspec has no destination or `name` does not
    /// match.
    pub fn transform(&self, name: &str) -> Option<String> {
        let destination = self.destination.as_ref()?;
        if self.is_wildcard() {
            let captured = capture(&self.source, name)?;
            Some(destination.replacen(WILDCARD, captured, 1))
        } else {
            self.matches_source(name).then(|| destination.clone())
        }
    }

    /// Full local (fetch) or remote (push) ref name that `matched` maps to.
    ///
    /// `None` means the match produces no ref at all, e.g. a shorthand tag
    /// fetched into [`ShorthandTarget::LocalBranches`].
    pub fn destination_for(&self, matched: &str, target: &ShorthandTarget) -> Option<String> {
        if self.destination.is_some() {
            let dst = self.transform(matched)?;
            return Some(expand_destination(&dst, matched));
        }
        if !self.matches_source(matched) {
            return None;
        }
        match self.direction {
            Direction::Push => Some(matched.to_string()),
            Direction::Fetch => shorthand_destination(matched, target),
        }
    }
}

impl fmt::Display for Refspec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

/// Short form of a ref name used to build shorthand destinations.
pub fn shorten(name: &str) -> &str {
    [HEADS_PREFIX, TAGS_PREFIX, REMOTES_PREFIX, REFS_PREFIX]
        .iter()
        .find_map(|prefix| name.strip_prefix(prefix))
        .unwrap_or(name)
}

/// Completes a destination written relative to the ref namespace.
pub fn expand_destination(dst: &str, matched_source: &str) -> String {
    if dst.starts_with(REFS_PREFIX) || dst == "HEAD" {
        return dst.to_string();
    }
    if ["remotes/", "heads/", "tags/"]
        .iter()
        .any(|prefix| dst.starts_with(prefix))
    {
        return format!("{REFS_PREFIX}{dst}");
    }
    if matched_source.starts_with(TAGS_PREFIX) {
        format!("{TAGS_PREFIX}{dst}")
    } else {
        format!("{HEADS_PREFIX}{dst}")
    }
}

fn shorthand_destination(matched: &str, target: &ShorthandTarget) -> Option<String> {
    let short = shorten(matched);
    let is_tag = matched.starts_with(TAGS_PREFIX);
    match target {
        ShorthandTarget::Tracking(_) if is_tag => Some(format!("{TAGS_PREFIX}{short}")),
        ShorthandTarget::Tracking(remote) => Some(format!("{REMOTES_PREFIX}{remote}/{short}")),
        ShorthandTarget::LocalBranches if is_tag || matched == "HEAD" => None,
        ShorthandTarget::LocalBranches => Some(format!("{HEADS_PREFIX}{short}")),
    }
}

/// Names a short source like `master` may refer to, in priority order.
fn shorthand_candidates(short: &str) -> [String; 6] {
    [
        short.to_string(),
        format!("{REFS_PREFIX}{short}"),
        format!("{TAGS_PREFIX}{short}"),
        format!("{HEADS_PREFIX}{short}"),
        format!("{REMOTES_PREFIX}{short}"),
        format!("{REMOTES_PREFIX}{short}/HEAD"),
    ]
}

/// The segment of `name` covered by the `*` in `pattern`.
fn capture<'n>(pattern: &str, name: &'n str) -> Option<&'n str> {
    let (prefix, suffix) = pattern.split_once(WILDCARD)?;
    if name.len() < prefix.len() + suffix.len() {
        return None;
    }
    name.strip_prefix(prefix)?.strip_suffix(suffix)
}

fn check_pattern(side: &str) -> std::result::Result<(), &'static str> {
    if FORBIDDEN.is_match(side) {
        return Err("forbidden character in name");
    }
    if side.contains("..") || side.contains("//") || side.contains("@{") {
        return Err("forbidden sequence in name");
    }
    if side.starts_with('/') || side.ends_with('/') || side.ends_with(".lock") {
        return Err("badly placed `/` or `.lock`");
    }
    if side.split('/').any(|part| part.starts_with('.')) {
        return Err("name component starts with `.`");
    }
    Ok(())
}
