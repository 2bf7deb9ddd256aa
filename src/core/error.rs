use crate::core::packets::types::PacketTrackingId;
use std::fmt;

/// A single field whose recorded value disagrees with an incoming event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldDiff {
    pub field: &'static str,
    pub recorded: String,
    pub incoming: String,
}

impl FieldDiff {
    pub fn new(field: &'static str, recorded: impl fmt::Debug, incoming: impl fmt::Debug) -> Self {
        Self {
            field,
            recorded: format!("{:?}", recorded),
            incoming: format!("{:?}", incoming),
        }
    }
}

impl fmt::Display for FieldDiff {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {} -> {}", self.field, self.recorded, self.incoming)
    }
}

/// Renders a diff list as `a: x -> y, b: ...` for log lines.
pub struct DiffList<'a>(pub &'a [FieldDiff]);

impl fmt::Display for DiffList<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, diff) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}", diff)?;
        }
        Ok(())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Required event fields are absent or unparsable. The event is dropped.
    #[error("malformed event: {0}")]
    MalformedEvent(String),
    /// The registry could not (yet) resolve a chain reference.
    #[error("unknown network: {0}")]
    UnknownNetwork(String),
    /// Two different packets derived the same identity. Ingestion must halt.
    #[error("identity collision for {id}: [{}]", DiffList(.diff))]
    IdentityCollision {
        id: PacketTrackingId,
        diff: Vec<FieldDiff>,
    },
    /// The transition would move a record backwards or overwrite recorded data.
    #[error("inconsistent transition for {id}: {reason} [{}]", DiffList(.diff))]
    InconsistentTransition {
        id: PacketTrackingId,
        reason: String,
        diff: Vec<FieldDiff>,
    },
    #[error("hop {hop_index} of {id} recorded before hop {} was reached", .hop_index.saturating_sub(1))]
    OutOfOrderHop {
        id: PacketTrackingId,
        hop_index: usize,
    },
    #[error("hop {hop_index} of {id} exceeds the hop limit")]
    HopOverflow {
        id: PacketTrackingId,
        hop_index: usize,
    },
    #[error("store error: {0}")]
    Store(String),
    #[error("{0}")]
    Custom(String),
}

impl Error {
    /// Only an identity collision is a process-level fault.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::IdentityCollision { .. })
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::UnknownNetwork(_))
    }

    pub(crate) fn inconsistent(id: &PacketTrackingId, reason: impl Into<String>) -> Self {
        Error::InconsistentTransition {
            id: id.clone(),
            reason: reason.into(),
            diff: vec![],
        }
    }
}

impl From<String> for Error {
    fn from(error: String) -> Self {
        Self::Custom(error)
    }
}
