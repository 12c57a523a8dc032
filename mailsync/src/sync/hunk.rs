//! # Sync hunk
//!
//! Module dedicated to synchronization hunks. The core structure of
//! the module is the [`SyncHunk`], which represents one change of a
//! [`SyncPatch`](super::patch::SyncPatch) targeted at one side.

use std::fmt;

use crate::{
    envelope::{Envelope, Id},
    flag::Flags,
};

use super::SyncDestination;

/// The synchronization hunk.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub enum SyncHunk {
    /// The message matching the given remote envelope needs to be
    /// copied to the local side.
    CreateOnLocal(Envelope),

    /// The message matching the given local envelope needs to be
    /// copied to the remote side.
    CreateOnRemote(Envelope),

    /// The message matching the given identity key needs to be
    /// deleted from the local side.
    DeleteOnLocal(Id),

    /// The message matching the given identity key needs to be
    /// deleted from the remote side.
    DeleteOnRemote(Id),

    /// The flags of the local message matching the given identity key
    /// need to be replaced by the given ones.
    UpdateFlagsOnLocal(Id, Flags),

    /// The flags of the remote message matching the given identity
    /// key need to be replaced by the given ones.
    UpdateFlagsOnRemote(Id, Flags),
}

/// The kind of a hunk.
///
/// Kinds are ordered the way they are applied: deletes first, then
/// creates, then flag updates.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum SyncHunkKind {
    Delete,
    Create,
    UpdateFlags,
}

impl SyncHunk {
    /// Return the identity key the hunk applies to.
    pub fn id(&self) -> &str {
        match self {
            Self::CreateOnLocal(envelope) | Self::CreateOnRemote(envelope) => &envelope.id,
            Self::DeleteOnLocal(id) | Self::DeleteOnRemote(id) => id,
            Self::UpdateFlagsOnLocal(id, _) | Self::UpdateFlagsOnRemote(id, _) => id,
        }
    }

    /// Return the side the hunk needs to be applied on.
    pub fn target(&self) -> SyncDestination {
        match self {
            Self::CreateOnLocal(_) | Self::DeleteOnLocal(_) | Self::UpdateFlagsOnLocal(..) => {
                SyncDestination::Local
            }
            Self::CreateOnRemote(_) | Self::DeleteOnRemote(_) | Self::UpdateFlagsOnRemote(..) => {
                SyncDestination::Remote
            }
        }
    }

    pub fn kind(&self) -> SyncHunkKind {
        match self {
            Self::DeleteOnLocal(_) | Self::DeleteOnRemote(_) => SyncHunkKind::Delete,
            Self::CreateOnLocal(_) | Self::CreateOnRemote(_) => SyncHunkKind::Create,
            Self::UpdateFlagsOnLocal(..) | Self::UpdateFlagsOnRemote(..) => {
                SyncHunkKind::UpdateFlags
            }
        }
    }

    /// Build a create hunk copying the given envelope to the given
    /// side.
    pub fn create(envelope: Envelope, target: SyncDestination) -> Self {
        match target {
            SyncDestination::Local => Self::CreateOnLocal(envelope),
            SyncDestination::Remote => Self::CreateOnRemote(envelope),
        }
    }

    /// Build a delete hunk for the given side.
    pub fn delete(id: impl Into<Id>, target: SyncDestination) -> Self {
        match target {
            SyncDestination::Local => Self::DeleteOnLocal(id.into()),
            SyncDestination::Remote => Self::DeleteOnRemote(id.into()),
        }
    }

    /// Build a flags update hunk for the given side.
    pub fn update_flags(id: impl Into<Id>, flags: Flags, target: SyncDestination) -> Self {
        match target {
            SyncDestination::Local => Self::UpdateFlagsOnLocal(id.into(), flags),
            SyncDestination::Remote => Self::UpdateFlagsOnRemote(id.into(), flags),
        }
    }
}

impl fmt::Display for SyncHunk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let target = self.target();
        let source = target.opposite();
        let id = self.id();

        match self {
            Self::CreateOnLocal(_) | Self::CreateOnRemote(_) => {
                write!(f, "Copying {source} message {id} to {target}")
            }
            Self::DeleteOnLocal(_) | Self::DeleteOnRemote(_) => {
                write!(f, "Deleting {target} message {id}")
            }
            Self::UpdateFlagsOnLocal(_, flags) | Self::UpdateFlagsOnRemote(_, flags) => {
                write!(f, "Setting flags [{flags}] of {target} message {id}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::{envelope::Envelope, sync::SyncDestination};

    use super::{SyncHunk, SyncHunkKind};

    #[test]
    fn hunk_accessors() {
        let envelope = Envelope::new("a", "seen", Default::default());
        let hunk = SyncHunk::create(envelope, SyncDestination::Remote);
        assert_eq!(hunk.id(), "a");
        assert_eq!(hunk.target(), SyncDestination::Remote);
        assert_eq!(hunk.kind(), SyncHunkKind::Create);
        assert_eq!(hunk.to_string(), "Copying local message a to remote");

        let hunk = SyncHunk::update_flags("b", "seen flagged".into(), SyncDestination::Local);
        assert_eq!(hunk.kind(), SyncHunkKind::UpdateFlags);
        assert_eq!(
            hunk.to_string(),
            "Setting flags [seen, flagged] of local message b"
        );

        assert!(SyncHunkKind::Delete < SyncHunkKind::Create);
        assert!(SyncHunkKind::Create < SyncHunkKind::UpdateFlags);
    }
}
