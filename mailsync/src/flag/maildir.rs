//! Module dedicated to Maildir flags.
//!
//! Maildir stores flags as single characters in the info part of the
//! file name (`:2,FRS`). Custom flags have no Maildir counterpart and
//! are dropped when formatting.

use tracing::debug;

use super::{Error, Flag, Flags, Result};

impl TryFrom<char> for Flag {
    type Error = Error;

    fn try_from(c: char) -> Result<Self> {
        match c {
            'r' | 'R' => Ok(Flag::Answered),
            's' | 'S' => Ok(Flag::Seen),
            't' | 'T' => Ok(Flag::Deleted),
            'd' | 'D' => Ok(Flag::Draft),
            'f' | 'F' => Ok(Flag::Flagged),
            unknown => Err(Error::ParseMaildirFlagError(unknown)),
        }
    }
}

impl Flag {
    pub fn to_maildir_char(&self) -> Option<char> {
        match self {
            Flag::Answered => Some('R'),
            Flag::Seen => Some('S'),
            Flag::Deleted => Some('T'),
            Flag::Draft => Some('D'),
            Flag::Flagged => Some('F'),
            Flag::Custom(_) => None,
        }
    }
}

impl Flags {
    /// Parse flags from a Maildir info string, skipping unknown
    /// characters.
    pub fn from_maildir_info(info: &str) -> Self {
        info.chars()
            .filter_map(|c| match Flag::try_from(c) {
                Ok(flag) => Some(flag),
                Err(err) => {
                    debug!("skipping maildir flag: {err}");
                    None
                }
            })
            .collect()
    }

    /// Format flags as a Maildir info string.
    ///
    /// Characters are sorted in ASCII order, as required by the
    /// Maildir specification.
    pub fn to_maildir_info(&self) -> String {
        let mut chars: Vec<char> = self.iter().filter_map(Flag::to_maildir_char).collect();
        chars.sort_unstable();
        String::from_iter(chars)
    }
}
