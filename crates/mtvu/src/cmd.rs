//! Commands sent to the vector unit thread.
//!
//! Every command is a tag word followed by its payload. Byte payloads are prefixed with their
//! length in bytes and packed little endian into whole words.
use std::borrow::Cow;

use strum::FromRepr;

use crate::vu::{VIF_WORDS, VifSnapshot};

#[derive(Debug, Clone, Copy, PartialEq, Eq, FromRepr)]
#[repr(u32)]
pub enum CommandTag {
    Execute    = 0,
    WriteMicro = 1,
    WriteData  = 2,
    WriteCol   = 3,
    WriteRow   = 4,
    Unpack     = 5,
    /// Continue reading from the start of the ring.
    Wrap       = 6,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command<'a> {
    /// Runs a microprogram. A `pc` of `None` resumes from the current TPC.
    Execute { pc: Option<u32>, top: u32, itop: u32 },
    WriteMicro { addr: u32, data: Cow<'a, [u8]> },
    WriteData { addr: u32, data: Cow<'a, [u8]> },
    WriteCol([u32; 4]),
    WriteRow([u32; 4]),
    Unpack {
        vif: VifSnapshot,
        data: Cow<'a, [u8]>,
    },
    Wrap,
}

const NO_PC: u32 = u32::MAX;

#[inline(always)]
fn bytes_to_words(len: usize) -> usize {
    len.div_ceil(4)
}

fn encode_bytes(data: &[u8], push: &mut impl FnMut(u32)) {
    push(data.len() as u32);
    for chunk in data.chunks(4) {
        let mut word = [0; 4];
        word[..chunk.len()].copy_from_slice(chunk);
        push(u32::from_le_bytes(word));
    }
}

fn decode_bytes(words: &mut impl Iterator<Item = u32>) -> Option<Vec<u8>> {
    let len = words.next()? as usize;
    let count = bytes_to_words(len);
    if words.size_hint().1.is_some_and(|left| count > left) {
        return None;
    }

    let mut data = Vec::with_capacity(count * 4);
    for _ in 0..count {
        data.extend_from_slice(&words.next()?.to_le_bytes());
    }

    data.truncate(len);
    Some(data)
}

fn decode_quad(words: &mut impl Iterator<Item = u32>) -> Option<[u32; 4]> {
    Some([words.next()?, words.next()?, words.next()?, words.next()?])
}

impl Command<'_> {
    pub fn tag(&self) -> CommandTag {
        match self {
            Self::Execute { .. } => CommandTag::Execute,
            Self::WriteMicro { .. } => CommandTag::WriteMicro,
            Self::WriteData { .. } => CommandTag::WriteData,
            Self::WriteCol(_) => CommandTag::WriteCol,
            Self::WriteRow(_) => CommandTag::WriteRow,
            Self::Unpack { .. } => CommandTag::Unpack,
            Self::Wrap => CommandTag::Wrap,
        }
    }

    /// Size of the encoded command, in words.
    pub fn size_words(&self) -> usize {
        1 + match self {
            Self::Execute { .. } => 3,
            Self::WriteMicro { data, .. } | Self::WriteData { data, .. } => {
                2 + bytes_to_words(data.len())
            }
            Self::WriteCol(_) | Self::WriteRow(_) => 4,
            Self::Unpack { data, .. } => VIF_WORDS + 1 + bytes_to_words(data.len()),
            Self::Wrap => 0,
        }
    }

    /// Encodes the command, handing each word to `push`.
    pub fn encode(&self, mut push: impl FnMut(u32)) {
        push(self.tag() as u32);
        match self {
            Self::Execute { pc, top, itop } => {
                push(pc.unwrap_or(NO_PC));
                push(*top);
                push(*itop);
            }
            Self::WriteMicro { addr, data } | Self::WriteData { addr, data } => {
                push(*addr);
                encode_bytes(data, &mut push);
            }
            Self::WriteCol(values) | Self::WriteRow(values) => {
                values.iter().copied().for_each(&mut push);
            }
            Self::Unpack { vif, data } => {
                let words: [u32; VIF_WORDS] = zerocopy::transmute!(*vif);
                words.into_iter().for_each(&mut push);
                encode_bytes(data, &mut push);
            }
            Self::Wrap => (),
        }
    }

    /// Decodes a command from `words`. Returns `None` if the tag is unknown or the words run out.
    pub fn decode(words: &mut impl Iterator<Item = u32>) -> Option<Command<'static>> {
        let tag = CommandTag::from_repr(words.next()?)?;
        let command = match tag {
            CommandTag::Execute => {
                let pc = words.next()?;
                Command::Execute {
                    pc: (pc != NO_PC).then_some(pc),
                    top: words.next()?,
                    itop: words.next()?,
                }
            }
            CommandTag::WriteMicro => Command::WriteMicro {
                addr: words.next()?,
                data: Cow::Owned(decode_bytes(words)?),
            },
            CommandTag::WriteData => Command::WriteData {
                addr: words.next()?,
                data: Cow::Owned(decode_bytes(words)?),
            },
            CommandTag::WriteCol => Command::WriteCol(decode_quad(words)?),
            CommandTag::WriteRow => Command::WriteRow(decode_quad(words)?),
            CommandTag::Unpack => {
                let mut vif = [0u32; VIF_WORDS];
                for word in &mut vif {
                    *word = words.next()?;
                }

                Command::Unpack {
                    vif: zerocopy::transmute!(vif),
                    data: Cow::Owned(decode_bytes(words)?),
                }
            }
            CommandTag::Wrap => Command::Wrap,
        };

        Some(command)
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn encoded(command: &Command) -> Vec<u32> {
        let mut words = Vec::new();
        command.encode(|w| words.push(w));
        assert_eq!(words.len(), command.size_words());
        words
    }

    #[test]
    fn execute_layout() {
        let words = encoded(&Command::Execute {
            pc: None,
            top: 0x10,
            itop: 0x20,
        });

        assert_eq!(words, [0, u32::MAX, 0x10, 0x20]);
    }

    #[test]
    fn bytes_are_padded() {
        let command = Command::WriteData {
            addr: 0x40,
            data: Cow::Borrowed(&[1, 2, 3, 4, 5]),
        };

        let words = encoded(&command);
        assert_eq!(words, [2, 0x40, 5, 0x0403_0201, 0x0000_0005]);
        assert_eq!(Command::decode(&mut words.into_iter()), Some(command));
    }

    #[test]
    fn unpack_carries_vif_state() {
        let command = Command::Unpack {
            vif: VifSnapshot {
                num: 3,
                addr: 0x100,
                usn: 1,
                ..Default::default()
            },
            data: Cow::Borrowed(&[9; 12]),
        };

        let words = encoded(&command);
        assert_eq!(words.len(), 1 + VIF_WORDS + 1 + 3);
        assert_eq!(Command::decode(&mut words.into_iter()), Some(command));
    }

    #[test]
    fn unknown_tag_and_truncation() {
        assert_eq!(Command::decode(&mut [99].into_iter()), None);
        assert_eq!(Command::decode(&mut [3, 1, 2].into_iter()), None);
        assert_eq!(Command::decode(&mut [6].into_iter()), Some(Command::Wrap));
    }

    #[test]
    fn corrupt_length_is_rejected() {
        // a length far past the words that follow
        let words = [1, 0x80, u32::MAX, 0xDEAD_BEEF];
        assert_eq!(Command::decode(&mut words.into_iter()), None);

        let words = [2, 0x80, 9, 1, 2];
        assert_eq!(Command::decode(&mut words.into_iter()), None);
    }
}
