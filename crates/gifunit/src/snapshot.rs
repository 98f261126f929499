//! Save state support for paths.
use easyerr::{Error, ResultExt};
use serde::{Deserialize, Serialize};

use crate::GifUnit;
use crate::packet::GsPacket;
use crate::path::{PathId, PathState};
use crate::tag::Tag;

#[derive(Debug, Error)]
pub enum SnapshotError {
    #[error(transparent)]
    Encode {
        source: ciborium::ser::Error<std::io::Error>,
    },
    #[error(transparent)]
    Decode {
        source: ciborium::de::Error<std::io::Error>,
    },
    #[error("snapshot holds {found} bytes but the path buffer only fits {capacity}")]
    Size { capacity: usize, found: usize },
    #[error("parse cursor {parse} is past the write cursor {write}")]
    Cursors { parse: usize, write: usize },
    #[error("packet at {offset} with {size} bytes ends past the parse cursor {parse}")]
    Packet { offset: u32, size: u32, parse: usize },
    #[error("tag with {nregs} registers per loop, at most 16 are possible")]
    Registers { nregs: u32 },
}

/// The state of a single path. The downstream read counter is not part of it: restored paths
/// start with nothing outstanding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PathSnapshot {
    pub data: Vec<u8>,
    pub parse: usize,
    pub tag: Tag,
    pub packet: GsPacket,
    pub state: PathState,
    pub placeholders: u32,
}

impl GifUnit {
    /// Captures the state of a path.
    pub fn path_snapshot(&self, id: PathId) -> PathSnapshot {
        let path = self.path(id);
        PathSnapshot {
            data: path.buffer().contents().to_vec(),
            parse: path.buffer().parse_pos(),
            tag: *path.tag(),
            packet: *path.packet(),
            state: path.state(),
            placeholders: path.mtvu().map_or(0, |m| m.placeholders()),
        }
    }

    /// Restores the state of a path.
    pub fn restore_path_snapshot(
        &mut self,
        id: PathId,
        snapshot: PathSnapshot,
    ) -> Result<(), SnapshotError> {
        let path = self.path_mut(id);
        let capacity = path.buffer().capacity();
        if snapshot.data.len() > capacity {
            return Err(SnapshotError::Size {
                capacity,
                found: snapshot.data.len(),
            });
        }

        if snapshot.parse > snapshot.data.len() {
            return Err(SnapshotError::Cursors {
                parse: snapshot.parse,
                write: snapshot.data.len(),
            });
        }

        let packet = snapshot.packet;
        if packet.offset as usize + packet.size as usize > snapshot.parse {
            return Err(SnapshotError::Packet {
                offset: packet.offset,
                size: packet.size,
                parse: snapshot.parse,
            });
        }

        if snapshot.tag.nregs > 16 {
            return Err(SnapshotError::Registers {
                nregs: snapshot.tag.nregs,
            });
        }

        path.restore(
            &snapshot.data,
            snapshot.parse,
            snapshot.tag,
            snapshot.packet,
            snapshot.state,
        );

        if let Some(mtvu) = path.mtvu() {
            mtvu.set_placeholders(snapshot.placeholders);
        }

        Ok(())
    }

    /// Encodes the state of a path as an opaque byte blob.
    pub fn save_path(&self, id: PathId) -> Result<Vec<u8>, SnapshotError> {
        let mut out = Vec::new();
        ciborium::into_writer(&self.path_snapshot(id), &mut out).context(SnapshotCtx::Encode)?;
        Ok(out)
    }

    /// Restores a path from a blob produced by [`GifUnit::save_path`].
    pub fn load_path(&mut self, id: PathId, blob: &[u8]) -> Result<(), SnapshotError> {
        let snapshot: PathSnapshot = ciborium::from_reader(blob).context(SnapshotCtx::Decode)?;
        self.restore_path_snapshot(id, snapshot)
    }
}
