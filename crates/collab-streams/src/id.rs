//! Redis stream entry IDs.
//!
//! The textual form is `{milliseconds}-{sequence}`. Lexicographic comparison
//! of the strings is wrong ("9-0" > "10-0"), so IDs are parsed into their
//! numeric pair and ordered on that.

use std::str::FromStr;

/// A parsed Redis stream ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct EntryId {
    pub ms: u64,
    pub seq: u64,
}

impl EntryId {
    /// The ID before every real entry; XREAD from here sees the whole
    /// stream.
    pub const ZERO: EntryId = EntryId { ms: 0, seq: 0 };

    #[must_use]
    pub fn new(ms: u64, seq: u64) -> Self {
        Self { ms, seq }
    }

    /// The immediately following ID. `XTRIM MINID` with this value removes
    /// every entry up to and including `self`.
    #[must_use]
    pub fn next(self) -> Self {
        match self.seq.checked_add(1) {
            Some(seq) => Self { ms: self.ms, seq },
            None => Self {
                ms: self.ms + 1,
                seq: 0,
            },
        }
    }

    /// Age of this entry relative to `now_ms` (Unix milliseconds); zero when
    /// the clock reads earlier than the entry.
    #[must_use]
    pub fn age_ms(self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.ms)
    }
}

/// Error parsing an ID out of its textual form.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
#[error("malformed stream id: {0}")]
pub struct ParseEntryIdError(String);

impl FromStr for EntryId {
    type Err = ParseEntryIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (ms, seq) = s
            .split_once('-')
            .ok_or_else(|| ParseEntryIdError(s.to_string()))?;
        let ms = ms.parse().map_err(|_| ParseEntryIdError(s.to_string()))?;
        let seq = seq.parse().map_err(|_| ParseEntryIdError(s.to_string()))?;
        Ok(Self { ms, seq })
    }
}

impl std::fmt::Display for EntryId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}-{}", self.ms, self.seq)
    }
}
