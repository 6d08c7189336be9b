//! Read concern, read preference and write concern value types.
//!
//! All three are immutable once built; the constructors validate the
//! combinations the server would reject.

use std::fmt;
use std::str::FromStr;

use tern_bson::{Document, Value, doc};

use crate::error::{Error, Result};

// ============================================================================
// Write concern
// ============================================================================

/// The `w` component of a write concern.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Acknowledgment {
    /// Use the server default.
    #[default]
    Default,
    /// Fire and forget, ignoring network errors (`w: -1`).
    ErrorsIgnored,
    /// Fire and forget (`w: 0`).
    Unacknowledged,
    /// Acknowledged by this many members, between 1 and `i32::MAX`.
    Nodes(u32),
    /// Acknowledged by a majority of members.
    Majority,
    /// Acknowledged by members matching a custom tag set.
    Tag(String),
}

impl Acknowledgment {
    /// Interpret a numeric `w` value.
    pub fn from_i32(w: i32) -> Result<Self> {
        match w {
            -1 => Ok(Self::ErrorsIgnored),
            0 => Ok(Self::Unacknowledged),
            n if n > 0 => Ok(Self::Nodes(n as u32)),
            n => Err(Error::invalid_argument(format!("Unsupported w value: {}", n))),
        }
    }

    /// Interpret a string `w` value; `majority` is matched case-insensitively.
    pub fn from_tag(tag: &str) -> Self {
        if tag.eq_ignore_ascii_case("majority") {
            Self::Majority
        } else {
            Self::Tag(tag.to_string())
        }
    }

    fn as_i32(&self) -> Option<i32> {
        match self {
            Self::ErrorsIgnored => Some(-1),
            Self::Unacknowledged => Some(0),
            Self::Nodes(n) => i32::try_from(*n).ok(),
            _ => None,
        }
    }

    fn allows_wtimeout(&self) -> bool {
        matches!(self, Self::Nodes(n) if *n > 1) || matches!(self, Self::Majority | Self::Tag(_))
    }
}

/// How many members must acknowledge a write before it is reported done.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct WriteConcern {
    w: Acknowledgment,
    wtimeout_ms: i32,
    journal: Option<bool>,
}

impl WriteConcern {
    /// Build and validate a write concern.
    ///
    /// `wtimeout_ms` is only kept when `w` waits for more than one member.
    pub fn new(w: Acknowledgment, wtimeout_ms: i32, journal: Option<bool>) -> Result<Self> {
        if wtimeout_ms < 0 {
            return Err(Error::invalid_argument(format!(
                "Expected wtimeout to be >= 0, {} given",
                wtimeout_ms
            )));
        }
        if let Acknowledgment::Nodes(n) = w {
            if n == 0 || i32::try_from(n).is_err() {
                return Err(Error::invalid_argument(format!("Unsupported w value: {}", n)));
            }
        }
        if journal == Some(true)
            && matches!(w, Acknowledgment::Unacknowledged | Acknowledgment::ErrorsIgnored)
        {
            let value = w.as_i32().unwrap_or_default();
            return Err(Error::invalid_argument(format!(
                "Journal conflicts with w value: {}",
                value
            )));
        }
        let wtimeout_ms = if w.allows_wtimeout() { wtimeout_ms } else { 0 };
        Ok(Self {
            w,
            wtimeout_ms,
            journal,
        })
    }

    /// `w: 1`.
    pub fn acknowledged() -> Self {
        Self {
            w: Acknowledgment::Nodes(1),
            ..Self::default()
        }
    }

    /// `w: 0`.
    pub fn unacknowledged() -> Self {
        Self {
            w: Acknowledgment::Unacknowledged,
            ..Self::default()
        }
    }

    /// `w: "majority"` with the given timeout.
    pub fn majority(wtimeout_ms: i32) -> Result<Self> {
        Self::new(Acknowledgment::Majority, wtimeout_ms, None)
    }

    pub fn w(&self) -> &Acknowledgment {
        &self.w
    }

    pub fn wtimeout_ms(&self) -> i32 {
        self.wtimeout_ms
    }

    pub fn journal(&self) -> Option<bool> {
        self.journal
    }

    /// Whether the server will reply to writes made with this concern.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(
            self.w,
            Acknowledgment::Unacknowledged | Acknowledgment::ErrorsIgnored
        ) || self.journal == Some(true)
    }

    /// Whether nothing differs from the server default.
    pub fn is_default(&self) -> bool {
        self.w == Acknowledgment::Default && self.wtimeout_ms == 0 && self.journal.is_none()
    }

    /// Wire form: `{w, wtimeout, j}` with unset parts omitted.
    pub fn to_document(&self) -> Document {
        let mut d = Document::new();
        match &self.w {
            Acknowledgment::Default => {}
            Acknowledgment::Majority => d.append("w", "majority"),
            Acknowledgment::Tag(tag) => d.append("w", tag.as_str()),
            other => d.append("w", other.as_i32().unwrap_or(1)),
        }
        if self.wtimeout_ms > 0 {
            d.append("wtimeout", self.wtimeout_ms);
        }
        if let Some(j) = self.journal {
            d.append("j", j);
        }
        d
    }

    /// Parse the wire form, as found in command replies.
    pub fn from_document(doc: &Document) -> Result<Self> {
        let w = match doc.get("w") {
            None | Some(Value::Null) => Acknowledgment::Default,
            Some(Value::String(s)) => Acknowledgment::from_tag(s),
            Some(other) => match other.to_i64().and_then(|n| i32::try_from(n).ok()) {
                Some(n) => Acknowledgment::from_i32(n)?,
                None => {
                    return Err(Error::invalid_argument(format!(
                        "Expected w to be integer or string, {} given",
                        other.type_name()
                    )));
                }
            },
        };
        let wtimeout_ms = doc
            .get("wtimeout")
            .and_then(Value::to_i64)
            .map(|n| n.clamp(0, i64::from(i32::MAX)) as i32)
            .unwrap_or(0);
        let journal = doc.get("j").and_then(Value::as_bool);
        Self::new(w, wtimeout_ms, journal)
    }
}

// ============================================================================
// Read concern
// ============================================================================

/// Isolation level for reads.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ReadConcern {
    level: Option<String>,
}

impl ReadConcern {
    pub const LOCAL: &'static str = "local";
    pub const MAJORITY: &'static str = "majority";
    pub const LINEARIZABLE: &'static str = "linearizable";
    pub const AVAILABLE: &'static str = "available";
    pub const SNAPSHOT: &'static str = "snapshot";

    /// A read concern with the given level; `None` means the server default.
    pub fn new(level: Option<impl Into<String>>) -> Self {
        Self {
            level: level.map(Into::into),
        }
    }

    /// A read concern with a level.
    pub fn with_level(level: impl Into<String>) -> Self {
        Self {
            level: Some(level.into()),
        }
    }

    pub fn level(&self) -> Option<&str> {
        self.level.as_deref()
    }

    pub fn is_default(&self) -> bool {
        self.level.is_none()
    }

    /// Wire form: `{level}` or an empty document.
    pub fn to_document(&self) -> Document {
        match &self.level {
            Some(level) => doc! { "level" => level.as_str() },
            None => Document::new(),
        }
    }
}

// ============================================================================
// Read preference
// ============================================================================

/// Which members may serve a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum ReadMode {
    /// Read from primary only.
    #[default]
    Primary,
    /// Read from primary preferred, fallback to secondary.
    PrimaryPreferred,
    /// Read from secondary only.
    Secondary,
    /// Read from secondary preferred, fallback to primary.
    SecondaryPreferred,
    /// Read from nearest member.
    Nearest,
}

impl ReadMode {
    /// The camel-case name used on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::PrimaryPreferred => "primaryPreferred",
            Self::Secondary => "secondary",
            Self::SecondaryPreferred => "secondaryPreferred",
            Self::Nearest => "nearest",
        }
    }
}

impl FromStr for ReadMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "primary" => Ok(Self::Primary),
            "primarypreferred" => Ok(Self::PrimaryPreferred),
            "secondary" => Ok(Self::Secondary),
            "secondarypreferred" => Ok(Self::SecondaryPreferred),
            "nearest" => Ok(Self::Nearest),
            _ => Err(Error::invalid_argument(format!(
                "Unsupported readPreference value: '{}'",
                s
            ))),
        }
    }
}

impl fmt::Display for ReadMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Mode plus optional tag sets and staleness bound.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ReadPreference {
    mode: ReadMode,
    tags: Vec<Document>,
    max_staleness_seconds: Option<i64>,
}

impl ReadPreference {
    /// Build a read preference; the primary mode cannot carry tags.
    pub fn new(mode: ReadMode, tags: Vec<Document>) -> Result<Self> {
        if mode == ReadMode::Primary && !tags.is_empty() {
            return Err(Error::invalid_argument(
                "Primary read preference mode conflicts with tags",
            ));
        }
        Ok(Self {
            mode,
            tags,
            max_staleness_seconds: None,
        })
    }

    /// A read preference with just a mode.
    pub fn from_mode(mode: ReadMode) -> Self {
        Self {
            mode,
            ..Self::default()
        }
    }

    pub fn primary() -> Self {
        Self::from_mode(ReadMode::Primary)
    }

    pub fn secondary_preferred() -> Self {
        Self::from_mode(ReadMode::SecondaryPreferred)
    }

    /// Bound how stale a secondary may be.
    pub fn with_max_staleness(mut self, seconds: i64) -> Result<Self> {
        if seconds <= 0 {
            return Err(Error::invalid_argument(format!(
                "Expected maxStalenessSeconds to be positive, {} given",
                seconds
            )));
        }
        if self.mode == ReadMode::Primary {
            return Err(Error::invalid_argument(
                "Primary read preference mode conflicts with maxStalenessSeconds",
            ));
        }
        self.max_staleness_seconds = Some(seconds);
        Ok(self)
    }

    pub fn mode(&self) -> ReadMode {
        self.mode
    }

    pub fn tags(&self) -> &[Document] {
        &self.tags
    }

    pub fn max_staleness_seconds(&self) -> Option<i64> {
        self.max_staleness_seconds
    }

    /// Whether a non-primary member may answer.
    pub fn is_secondary_ok(&self) -> bool {
        self.mode != ReadMode::Primary
    }

    /// The `$readPreference` document.
    pub fn to_document(&self) -> Document {
        let mut d = doc! { "mode" => self.mode.as_str() };
        if !self.tags.is_empty() {
            d.append("tags", self.tags.clone());
        }
        if let Some(seconds) = self.max_staleness_seconds {
            d.append("maxStalenessSeconds", seconds);
        }
        d
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_write_concern_wtimeout_cleared_for_single_node() {
        let wc = WriteConcern::new(Acknowledgment::Nodes(1), 500, None).unwrap();
        assert_eq!(wc.wtimeout_ms(), 0);

        let wc = WriteConcern::new(Acknowledgment::Nodes(2), 500, None).unwrap();
        assert_eq!(wc.wtimeout_ms(), 500);

        let wc = WriteConcern::new(Acknowledgment::Tag("dc".into()), 500, None).unwrap();
        assert_eq!(wc.wtimeout_ms(), 500);
    }

    #[test]
    fn test_write_concern_journal_conflict() {
        let err = WriteConcern::new(Acknowledgment::Unacknowledged, 0, Some(true)).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(err.to_string(), "Journal conflicts with w value: 0");

        let err = WriteConcern::new(Acknowledgment::ErrorsIgnored, 0, Some(true)).unwrap_err();
        assert_eq!(err.to_string(), "Journal conflicts with w value: -1");
    }

    #[test]
    fn test_write_concern_rejects_negative_wtimeout() {
        assert!(WriteConcern::new(Acknowledgment::Majority, -1, None).is_err());
    }

    #[test]
    fn test_unsupported_w() {
        let err = Acknowledgment::from_i32(-2).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported w value: -2");
    }

    #[test]
    fn test_node_count_must_fit_the_wire() {
        let err = WriteConcern::new(Acknowledgment::Nodes(0), 0, None).unwrap_err();
        assert!(err.is_invalid_argument());
        assert_eq!(err.to_string(), "Unsupported w value: 0");

        let too_many = u32::try_from(i32::MAX).unwrap() + 1;
        let err = WriteConcern::new(Acknowledgment::Nodes(too_many), 0, None).unwrap_err();
        assert_eq!(err.to_string(), "Unsupported w value: 2147483648");

        let wc = WriteConcern::new(Acknowledgment::Nodes(i32::MAX as u32), 0, None).unwrap();
        assert_eq!(wc.to_document(), doc! { "w" => i32::MAX });
    }

    #[test]
    fn test_write_concern_document() {
        let wc = WriteConcern::new(Acknowledgment::Majority, 100, Some(true)).unwrap();
        assert_eq!(
            wc.to_document(),
            doc! { "w" => "majority", "wtimeout" => 100, "j" => true }
        );
        assert_eq!(WriteConcern::default().to_document(), Document::new());
        assert_eq!(WriteConcern::unacknowledged().to_document(), doc! { "w" => 0 });
    }

    #[test]
    fn test_write_concern_from_document() {
        let wc = WriteConcern::from_document(&doc! { "w" => 2, "wtimeout" => 10 }).unwrap();
        assert_eq!(wc.w(), &Acknowledgment::Nodes(2));
        assert_eq!(wc.wtimeout_ms(), 10);

        let wc = WriteConcern::from_document(&doc! { "w" => "MAJORITY" }).unwrap();
        assert_eq!(wc.w(), &Acknowledgment::Majority);
    }

    #[test]
    fn test_acknowledged() {
        assert!(WriteConcern::default().is_acknowledged());
        assert!(WriteConcern::acknowledged().is_acknowledged());
        assert!(!WriteConcern::unacknowledged().is_acknowledged());
    }

    #[test]
    fn test_read_mode_parse() {
        assert_eq!("PRIMARYPREFERRED".parse::<ReadMode>().unwrap(), ReadMode::PrimaryPreferred);
        assert_eq!("nearest".parse::<ReadMode>().unwrap(), ReadMode::Nearest);
        let err = "fastest".parse::<ReadMode>().unwrap_err();
        assert_eq!(err.to_string(), "Unsupported readPreference value: 'fastest'");
    }

    #[test]
    fn test_primary_with_tags_rejected() {
        let err = ReadPreference::new(ReadMode::Primary, vec![doc! { "dc" => "ny" }]).unwrap_err();
        assert_eq!(err.to_string(), "Primary read preference mode conflicts with tags");
        assert!(ReadPreference::new(ReadMode::Secondary, vec![doc! { "dc" => "ny" }]).is_ok());
    }

    #[test]
    fn test_read_preference_document() {
        let rp = ReadPreference::new(ReadMode::Nearest, vec![doc! { "dc" => "ny" }])
            .unwrap()
            .with_max_staleness(120)
            .unwrap();
        assert_eq!(
            rp.to_document(),
            doc! {
                "mode" => "nearest",
                "tags" => vec![doc! { "dc" => "ny" }],
                "maxStalenessSeconds" => 120i64,
            }
        );
        assert!(rp.is_secondary_ok());
        assert!(!ReadPreference::primary().is_secondary_ok());
    }

    #[test]
    fn test_read_concern() {
        let rc = ReadConcern::with_level(ReadConcern::MAJORITY);
        assert_eq!(rc.to_document(), doc! { "level" => "majority" });
        assert!(ReadConcern::default().to_document().is_empty());
        assert_eq!(ReadConcern::new(None::<String>).level(), None);
    }
}
