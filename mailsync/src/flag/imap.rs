//! Module dedicated to IMAP flags.
//!
//! IMAP system flags start with a backslash (`\Seen`), keywords do
//! not and map to custom flags.

use super::{Error, Flag, Flags, Result};

impl Flag {
    pub fn try_from_imap(flag: &str) -> Result<Self> {
        let flag = flag.trim();

        match flag.strip_prefix('\\') {
            Some(system) if system.eq_ignore_ascii_case("seen") => Ok(Flag::Seen),
            Some(system) if system.eq_ignore_ascii_case("answered") => Ok(Flag::Answered),
            Some(system) if system.eq_ignore_ascii_case("flagged") => Ok(Flag::Flagged),
            Some(system) if system.eq_ignore_ascii_case("deleted") => Ok(Flag::Deleted),
            Some(system) if system.eq_ignore_ascii_case("draft") => Ok(Flag::Draft),
            Some(_) => Err(Error::ParseImapFlagError(flag.to_owned())),
            None => Ok(Flag::Custom(flag.to_owned())),
        }
    }

    pub fn to_imap_query_string(&self) -> String {
        match self {
            Flag::Seen => String::from("\\Seen"),
            Flag::Answered => String::from("\\Answered"),
            Flag::Flagged => String::from("\\Flagged"),
            Flag::Deleted => String::from("\\Deleted"),
            Flag::Draft => String::from("\\Draft"),
            Flag::Custom(flag) => flag.clone(),
        }
    }
}

impl Flags {
    pub fn to_imap_query_string(&self) -> String {
        self.iter().fold(String::new(), |mut flags, flag| {
            if !flags.is_empty() {
                flags.push(' ')
            }
            flags.push_str(&flag.to_imap_query_string());
            flags
        })
    }
}
