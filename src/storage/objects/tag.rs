use crate::storage::ObjectId;
use crate::storage::objects::{ObjectKind, VoxObject};
use crate::{Error, Result};
use chrono::{DateTime, FixedOffset, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use std::io::Write;

lazy_static! {
    static ref IDENTITY_REGEX: Regex =
        Regex::new(r"^(.*) <(.*?)> (\d+) ([\+\-]\d{4})$").expect("identity pattern is valid");
}

/// Represents an annotated tag object that points at another object
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Tag {
    /// Id of the object being tagged (a commit, or another tag)
    pub object: ObjectId,
    /// The kind of object being tagged
    pub object_kind: ObjectKind,
    /// The name of the tag
    pub tag: String,
    /// Information about who created the tag (name, email, timestamp)
    pub tagger: (String, String, DateTime<Utc>),
    /// The annotation message for the tag
    pub message: String,
}

impl Tag {
    /// Parses a tag object from raw string data
    ///
    /// # Format
    /// ```text
    /// object <hash>
    /// type <object-type>
    /// tag <name>
    /// tagger <name> <email> <timestamp> <timezone>
    ///
    /// <message>
    /// ```
    pub fn parse(data: &str) -> Result<Self> {
        let mut object = None;
        let mut object_kind = None;
        let mut tag_name = None;
        let mut tagger = None;
        let mut message = String::new();
        let mut in_message = false;

        for line in data.lines() {
            if in_message {
                message.push_str(line);
                message.push('\n');
                continue;
            }

            if line.is_empty() {
                in_message = true;
                continue;
            }

            let Some((key, value)) = line.split_once(' ') else {
                continue;
            };

            match key {
                "object" => object = Some(ObjectId::from_hex(value.trim())?),
                "type" => object_kind = Some(value.trim().parse::<ObjectKind>()?),
                "tag" => tag_name = Some(value.trim().to_string()),
                "tagger" => tagger = Some(Self::parse_identity(value)?),
                _ => {}
            }
        }

        Ok(Tag {
            object: object.ok_or_else(|| Error::corrupt("tag", "missing object"))?,
            object_kind: object_kind.ok_or_else(|| Error::corrupt("tag", "missing type"))?,
            tag: tag_name.ok_or_else(|| Error::corrupt("tag", "missing tag name"))?,
            tagger: tagger.ok_or_else(|| Error::corrupt("tag", "missing tagger"))?,
            message: message.trim().to_string(),
        })
    }

    /// Parses the tagger identity line: `Name <email> timestamp timezone`
    fn parse_identity(s: &str) -> Result<(String, String, DateTime<Utc>)> {
        let caps = IDENTITY_REGEX
            .captures(s)
            .ok_or_else(|| Error::corrupt("tag", format!("invalid tagger `{s}`")))?;

        let name = caps[1].trim().to_string();
        let email = caps[2].trim().to_string();
        let timestamp = caps[3]
            .parse::<i64>()
            .map_err(|e| Error::corrupt("tag", e.to_string()))?;
        let offset = caps[4]
            .parse::<i32>()
            .map_err(|e| Error::corrupt("tag", e.to_string()))?;
        let offset_seconds = (offset / 100) * 3600 + (offset % 100) * 60;

        let zone = FixedOffset::east_opt(offset_seconds)
            .ok_or_else(|| Error::corrupt("tag", format!("invalid timezone {offset}")))?;
        let dt = DateTime::from_timestamp(timestamp, 0)
            .ok_or_else(|| Error::corrupt("tag", format!("invalid timestamp {timestamp}")))?
            .with_timezone(&zone)
            .to_utc();

        Ok((name, email, dt))
    }
}

impl VoxObject for Tag {
    fn kind(&self) -> ObjectKind {
        ObjectKind::Tag
    }

    fn serialize(&self) -> Result<Vec<u8>> {
        let mut content = Vec::new();
        writeln!(content, "object {}", self.object)?;
        writeln!(content, "type {}", self.object_kind)?;
        writeln!(content, "tag {}", self.tag)?;
        writeln!(
            content,
            "tagger {} <{}> {} +0000",
            self.tagger.0,
            self.tagger.1,
            self.tagger.2.timestamp(),
        )?;
        writeln!(content)?;
        write!(content, "{}", self.message)?;
        Ok(content)
    }
}
