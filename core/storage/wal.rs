/* WAL file layout:
Documentation: https://www.sqlite.org/fileformat2.html#walformat

┌──────────────┬──────────────┬──────────────┬─────┬──────────────┬──────────────┐
│ WAL header   │ frame header │ page image   │ ... │ frame header │ page image   │
│ 32 bytes     │ 24 bytes     │ page_size    │     │ 24 bytes     │ page_size    │
└──────────────┴──────────────┴──────────────┴─────┴──────────────┴──────────────┘

Header:  magic, format version, page size, checkpoint seq, salt-1, salt-2,
         checksum-1, checksum-2 (all u32)
Frame:   page number, db size after commit (0 if not a commit frame), salt-1,
         salt-2, checksum-1, checksum-2

Magic 0x377f0682 selects little-endian and 0x377f0683 big-endian, both for
the header and frame fields and for the words fed to the checksum. The SQL
engine itself writes every field big-endian whatever the magic says, so a
header that does not make sense in the selected order is read again in the
other one.

The checksum chain starts at the header and runs through every frame, so once
a frame fails verification nothing after it can be trusted.
*/
use crate::{error::ForensicError, storage::sqlite3_ondisk::PageSize, Result};

pub const WAL_HEADER_SIZE: usize = 32;
pub const WAL_FRAME_HEADER_SIZE: usize = 24;
pub const WAL_MAGIC_LE: u32 = 0x377f_0682;
pub const WAL_MAGIC_BE: u32 = 0x377f_0683;
pub const WAL_FORMAT_VERSION: u32 = 3_007_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum ByteOrder {
    LittleEndian,
    BigEndian,
}

impl ByteOrder {
    pub fn from_magic(magic: u32) -> Option<Self> {
        match magic {
            WAL_MAGIC_LE => Some(Self::LittleEndian),
            WAL_MAGIC_BE => Some(Self::BigEndian),
            _ => None,
        }
    }

    pub fn other(self) -> Self {
        match self {
            Self::LittleEndian => Self::BigEndian,
            Self::BigEndian => Self::LittleEndian,
        }
    }

    fn word(self, bytes: &[u8]) -> u32 {
        let raw = [bytes[0], bytes[1], bytes[2], bytes[3]];
        match self {
            Self::LittleEndian => u32::from_le_bytes(raw),
            Self::BigEndian => u32::from_be_bytes(raw),
        }
    }

    /// Reads the u32 at `pos`; the caller guarantees four bytes are there.
    pub fn read_u32(self, buf: &[u8], pos: usize) -> u32 {
        self.word(&buf[pos..pos + 4])
    }

    pub fn write_u32(self, value: u32) -> [u8; 4] {
        match self {
            Self::LittleEndian => value.to_le_bytes(),
            Self::BigEndian => value.to_be_bytes(),
        }
    }
}

/// Rolling WAL checksum over 8-byte chunks, continuing from `seed`.
///
/// Inputs are always multiples of 8 in a well-formed WAL; a short tail is
/// ignored.
pub fn wal_checksum(data: &[u8], order: ByteOrder, seed: (u32, u32)) -> (u32, u32) {
    let (mut s1, mut s2) = seed;
    for chunk in data.chunks_exact(8) {
        s1 = s1.wrapping_add(order.word(&chunk[..4])).wrapping_add(s2);
        s2 = s2.wrapping_add(order.word(&chunk[4..])).wrapping_add(s1);
    }
    (s1, s2)
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WalHeader {
    pub magic: u32,
    /// Word order of the checksum, selected by the magic.
    pub checksum_order: ByteOrder,
    /// Byte order the header and frame fields were decoded with.
    pub field_order: ByteOrder,
    pub format_version: u32,
    pub page_size: u32,
    pub checkpoint_seq: u32,
    pub salt: (u32, u32),
    pub checksum: (u32, u32),
    pub checksum_valid: bool,
}

impl WalHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < WAL_HEADER_SIZE {
            return Err(ForensicError::InvalidWal(format!(
                "file too short for WAL header: {} bytes",
                buf.len()
            )));
        }
        let (magic, checksum_order) = [ByteOrder::BigEndian, ByteOrder::LittleEndian]
            .into_iter()
            .map(|order| order.read_u32(buf, 0))
            .find_map(|magic| ByteOrder::from_magic(magic).map(|order| (magic, order)))
            .ok_or_else(|| {
                ForensicError::InvalidWal(format!(
                    "Invalid WAL magic: {:#010x}",
                    ByteOrder::BigEndian.read_u32(buf, 0)
                ))
            })?;

        let field_order = if Self::fields_plausible(buf, checksum_order) {
            checksum_order
        } else if Self::fields_plausible(buf, checksum_order.other()) {
            checksum_order.other()
        } else {
            return Err(ForensicError::InvalidWal(format!(
                "invalid WAL page size: {}",
                checksum_order.read_u32(buf, 8)
            )));
        };

        let read = |pos| field_order.read_u32(buf, pos);
        let checksum = (read(24), read(28));
        let computed = wal_checksum(&buf[..24], checksum_order, (0, 0));
        Ok(Self {
            magic,
            checksum_order,
            field_order,
            format_version: read(4),
            page_size: read(8),
            checkpoint_seq: read(12),
            salt: (read(16), read(20)),
            checksum,
            checksum_valid: computed == checksum,
        })
    }

    fn fields_plausible(buf: &[u8], order: ByteOrder) -> bool {
        order.read_u32(buf, 4) == WAL_FORMAT_VERSION && PageSize::new(order.read_u32(buf, 8)).is_some()
    }

    pub fn frame_size(&self) -> usize {
        WAL_FRAME_HEADER_SIZE + self.page_size as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum SuspectReason {
    HeaderChecksumMismatch,
    SaltMismatch,
    ChecksumMismatch,
    /// An earlier frame broke the chain.
    FollowsSuspect,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WalFrame {
    pub index: usize,
    pub page_number: u32,
    /// Database size in pages after this commit; 0 for mid-transaction frames.
    pub commit_seq: u32,
    pub salt: (u32, u32),
    pub checksum: (u32, u32),
    pub offset: u64,
    pub size: usize,
    #[cfg_attr(feature = "serde", serde(skip))]
    pub page_image: Vec<u8>,
    pub suspect: bool,
    pub suspect_reason: Option<SuspectReason>,
}

impl WalFrame {
    pub fn is_commit(&self) -> bool {
        self.commit_seq != 0
    }
}

#[derive(Debug, Clone, Default)]
pub struct FrameScan {
    pub frames: Vec<WalFrame>,
    /// Index of the first suspect frame.
    pub suspect_from: Option<usize>,
    /// Bytes after the last complete frame.
    pub trailing_bytes: usize,
}

/// Decodes every complete frame after the header, with the header's field
/// byte order.
///
/// A partial trailing frame ends the scan. With `verify` set, salts and the
/// cumulative checksum are checked and the first failure marks that frame and
/// all later frames suspect.
pub fn decode_frames(wal: &[u8], header: &WalHeader, verify: bool) -> FrameScan {
    let frame_size = header.frame_size();
    let order = header.field_order;
    let mut scan = FrameScan::default();
    let mut running = header.checksum;
    let mut pos = WAL_HEADER_SIZE;

    if verify && !header.checksum_valid {
        scan.suspect_from = Some(0);
    }

    while pos + frame_size <= wal.len() {
        let frame_header = &wal[pos..pos + WAL_FRAME_HEADER_SIZE];
        let page_image = &wal[pos + WAL_FRAME_HEADER_SIZE..pos + frame_size];
        let index = scan.frames.len();
        let salt = (order.read_u32(frame_header, 8), order.read_u32(frame_header, 12));
        let checksum = (order.read_u32(frame_header, 16), order.read_u32(frame_header, 20));

        let mut suspect_reason = None;
        if verify {
            if scan.suspect_from.is_some() {
                suspect_reason = Some(if index == 0 {
                    SuspectReason::HeaderChecksumMismatch
                } else {
                    SuspectReason::FollowsSuspect
                });
            } else if salt != header.salt {
                suspect_reason = Some(SuspectReason::SaltMismatch);
            } else {
                running = wal_checksum(&frame_header[..8], header.checksum_order, running);
                running = wal_checksum(page_image, header.checksum_order, running);
                if running != checksum {
                    suspect_reason = Some(SuspectReason::ChecksumMismatch);
                }
            }
            if suspect_reason.is_some() && scan.suspect_from.is_none() {
                scan.suspect_from = Some(index);
            }
        }

        scan.frames.push(WalFrame {
            index,
            page_number: order.read_u32(frame_header, 0),
            commit_seq: order.read_u32(frame_header, 4),
            salt,
            checksum,
            offset: pos as u64,
            size: frame_size,
            page_image: page_image.to_vec(),
            suspect: suspect_reason.is_some(),
            suspect_reason,
        });
        pos += frame_size;
    }

    scan.trailing_bytes = wal.len().saturating_sub(pos);
    scan
}
