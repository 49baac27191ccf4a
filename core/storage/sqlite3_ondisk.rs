use pack1::U16BE;

use crate::{
    bail_corrupt_error,
    error::ForensicError,
    storage::btree::offset::{BTREE_CELL_COUNT, BTREE_PAGE_TYPE, BTREE_RIGHTMOST_PTR},
    storage::text::{extract_text_runs, TextEncoding},
    types::{decode_record, Value},
    Result,
};

pub const CELL_PTR_SIZE_BYTES: usize = 2;
pub const INTERIOR_PAGE_HEADER_SIZE_BYTES: usize = 12;
pub const LEAF_PAGE_HEADER_SIZE_BYTES: usize = 8;
pub const DATABASE_HEADER_SIZE_BYTES: usize = 100;
pub const SQLITE_MAGIC: &[u8; 16] = b"SQLite format 3\0";

/// SQLite varints never exceed nine bytes.
pub const MAX_VARINT_LEN: usize = 9;

pub struct PageSize(U16BE);

impl PageSize {
    pub const MIN: u32 = 512;
    pub const MAX: u32 = 65536;
    pub const DEFAULT: u16 = 4096;

    pub const fn new(size: u32) -> Option<Self> {
        if size < PageSize::MIN || size > PageSize::MAX {
            return None;
        }

        // Page size must be power of 2
        if size.count_ones() != 1 {
            return None;
        }

        if size == PageSize::MAX {
            // The header field is a u16, so 65536 is stored as 1
            return Some(Self(U16BE::new(1)));
        }

        Some(Self(U16BE::new(size as u16)))
    }

    pub fn new_from_header_u16(value: u16) -> Result<Self> {
        match value {
            1 => Ok(Self(U16BE::new(1))),
            n => {
                let Some(size) = Self::new(n as u32) else {
                    bail_corrupt_error!("invalid page size in database header: {n}")
                };
                Ok(size)
            }
        }
    }

    pub const fn get(self) -> u32 {
        match self.0.get() {
            1 => Self::MAX,
            n => n as u32,
        }
    }

    pub const fn get_raw(self) -> u16 {
        self.0.get()
    }
}

impl Default for PageSize {
    fn default() -> Self {
        Self(U16BE::new(Self::DEFAULT))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum PageType {
    IndexInterior = 2,
    TableInterior = 5,
    IndexLeaf = 10,
    TableLeaf = 13,
    /// Not a B-tree page: freelist trunks and leaves, overflow pages, or
    /// anything overwritten.
    Unknown = 0,
}

impl PageType {
    pub fn from_byte(value: u8) -> Self {
        Self::try_from(value).unwrap_or(Self::Unknown)
    }

    pub fn is_interior(&self) -> bool {
        matches!(self, PageType::IndexInterior | PageType::TableInterior)
    }
}

impl TryFrom<u8> for PageType {
    type Error = ForensicError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            2 => Ok(Self::IndexInterior),
            5 => Ok(Self::TableInterior),
            10 => Ok(Self::IndexLeaf),
            13 => Ok(Self::TableLeaf),
            _ => Err(ForensicError::Corrupt(format!("Invalid page type: {value}"))),
        }
    }
}

/// The fixed 100-byte database file header.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DatabaseHeader {
    pub page_size: u32,
    pub write_version: u8,
    pub read_version: u8,
    pub reserved_bytes: u8,
    pub file_change_counter: u32,
    pub database_size_pages: u32,
    pub freelist_trunk_page: u32,
    pub freelist_page_count: u32,
    pub schema_cookie: u32,
    pub schema_format: u32,
    pub text_encoding: Option<TextEncoding>,
    pub user_version: u32,
    pub application_id: u32,
    pub sqlite_version_number: u32,
}

pub fn has_sqlite_magic(buf: &[u8]) -> bool {
    buf.len() >= SQLITE_MAGIC.len() && &buf[..SQLITE_MAGIC.len()] == SQLITE_MAGIC
}

impl DatabaseHeader {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < DATABASE_HEADER_SIZE_BYTES {
            bail_corrupt_error!("database header truncated: {} bytes", buf.len());
        }
        if !has_sqlite_magic(buf) {
            bail_corrupt_error!("missing SQLite magic string");
        }
        let page_size = PageSize::new_from_header_u16(read_u16(buf, 16))?.get();
        Ok(Self {
            page_size,
            write_version: buf[18],
            read_version: buf[19],
            reserved_bytes: buf[20],
            file_change_counter: read_u32(buf, 24),
            database_size_pages: read_u32(buf, 28),
            freelist_trunk_page: read_u32(buf, 32),
            freelist_page_count: read_u32(buf, 36),
            schema_cookie: read_u32(buf, 40),
            schema_format: read_u32(buf, 44),
            text_encoding: TextEncoding::from_header_code(read_u32(buf, 56)),
            user_version: read_u32(buf, 60),
            application_id: read_u32(buf, 68),
            sqlite_version_number: read_u32(buf, 96),
        })
    }

    /// Text encoding to decode records with; UTF-8 when the field is unset.
    pub fn encoding(&self) -> TextEncoding {
        self.text_encoding.unwrap_or(TextEncoding::Utf8)
    }

    /// Usable bytes per page (page size minus reserved space).
    pub fn usable_size(&self) -> usize {
        (self.page_size as usize).saturating_sub(self.reserved_bytes as usize)
    }
}

/// Decodes a SQLite varint starting at `offset`.
///
/// Returns `(value, bytes_consumed)`. At most nine bytes are read; the ninth
/// contributes all eight bits. Input that ends mid-varint yields whatever
/// has accumulated so far, and an offset past the end yields `(0, 0)`.
pub fn decode_varint(buf: &[u8], offset: usize) -> (u64, usize) {
    let Some(bytes) = buf.get(offset..) else {
        return (0, 0);
    };
    let mut value: u64 = 0;
    for (i, &byte) in bytes.iter().take(MAX_VARINT_LEN).enumerate() {
        if i == MAX_VARINT_LEN - 1 {
            return ((value << 8) | u64::from(byte), MAX_VARINT_LEN);
        }
        value = (value << 7) | u64::from(byte & 0x7f);
        if byte & 0x80 == 0 {
            return (value, i + 1);
        }
    }
    (value, bytes.len().min(MAX_VARINT_LEN))
}

pub fn classify_page(buf: &[u8]) -> PageType {
    classify_page_at(buf, 0)
}

/// Classifies the B-tree page whose header starts at `offset` (100 on page 1).
pub fn classify_page_at(buf: &[u8], offset: usize) -> PageType {
    buf.get(offset).map_or(PageType::Unknown, |&b| PageType::from_byte(b))
}

/// Offset of the B-tree header within a page: page 1 carries the database
/// header first.
pub fn btree_header_offset(page_number: u32) -> usize {
    if page_number == 1 {
        DATABASE_HEADER_SIZE_BYTES
    } else {
        0
    }
}

/* PageContent is a read-only view over one page.
The first page has header of 100bytes (database file header)
All other pages have header of 0 bytes.
This header space is adjusted by offset
Every read is bounds-checked: freed pages are attacker-shaped input.
*/
pub struct PageContent<'a> {
    pub offset: usize,
    pub buf: &'a [u8],
}

impl<'a> PageContent<'a> {
    pub fn new(offset: usize, buf: &'a [u8]) -> Self {
        Self { offset, buf }
    }

    pub fn page_type(&self) -> PageType {
        classify_page_at(self.buf, self.offset + BTREE_PAGE_TYPE)
    }

    fn read_u16(&self, pos: usize) -> u16 {
        read_u16_checked(self.buf, self.offset + pos).unwrap_or(0)
    }

    fn read_u32(&self, pos: usize) -> u32 {
        read_u32_checked(self.buf, self.offset + pos).unwrap_or(0)
    }

    pub fn read_u16_no_offset(&self, pos: usize) -> Option<u16> {
        read_u16_checked(self.buf, pos)
    }

    pub fn read_cell_count(&self) -> u16 {
        self.read_u16(BTREE_CELL_COUNT)
    }

    pub fn read_rightmost_ptr(&self) -> Option<u32> {
        self.page_type()
            .is_interior()
            .then(|| self.read_u32(BTREE_RIGHTMOST_PTR))
    }

    pub fn header_size(&self) -> usize {
        if self.page_type().is_interior() {
            INTERIOR_PAGE_HEADER_SIZE_BYTES
        } else {
            LEAF_PAGE_HEADER_SIZE_BYTES
        }
    }

    pub fn cell_pointer_array_offset(&self) -> usize {
        self.offset + self.header_size()
    }

    /// Cell offsets from the pointer array, limited to `page_size`.
    ///
    /// The declared cell count is clamped to what fits in the page and any
    /// pointer landing in the header/pointer area or past the page is dropped.
    pub fn cell_pointers(&self, page_size: usize) -> Vec<usize> {
        let limit = page_size.min(self.buf.len());
        let array_start = self.cell_pointer_array_offset();
        if array_start >= limit {
            return Vec::new();
        }
        let max_cells = (limit - array_start) / CELL_PTR_SIZE_BYTES;
        let count = (self.read_cell_count() as usize).min(max_cells);
        let array_end = array_start + count * CELL_PTR_SIZE_BYTES;

        (0..count)
            .filter_map(|i| self.read_u16_no_offset(array_start + i * CELL_PTR_SIZE_BYTES))
            .map(usize::from)
            .filter(|&ptr| ptr >= array_end && ptr < limit)
            .collect()
    }
}

/// A table B-tree leaf cell with its record decoded.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Cell {
    pub offset: usize,
    pub payload_size: u64,
    pub rowid: i64,
    pub header_size: usize,
    pub values: Vec<Value>,
    /// Values were cut short by the page boundary or an overflow chain that
    /// was not followed.
    pub truncated: bool,
}

/// Text salvaged from a cell (or page region) that did not decode.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct Fragment {
    pub offset: usize,
    pub rowid: Option<i64>,
    pub text: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ParseOutcome {
    Structured(Cell),
    Heuristic(Fragment),
    None,
}

/// Bytes of a table-leaf payload stored on the page itself; the rest lives on
/// overflow pages.
pub fn local_payload_size(payload_size: u64, usable_size: usize) -> usize {
    let usable = usable_size as u64;
    let max_local = usable.saturating_sub(35);
    if payload_size <= max_local {
        return payload_size as usize;
    }
    let min_local = ((usable.saturating_sub(12)) * 32 / 255).saturating_sub(23);
    let modulus = usable.saturating_sub(4).max(1);
    let local = min_local + (payload_size - min_local) % modulus;
    if local <= max_local {
        local as usize
    } else {
        min_local as usize
    }
}

/// Parses the table-leaf cell at `cell_offset`. Reads stop at `page_size`;
/// the local payload split uses `usable_size`.
pub fn parse_cell(
    buf: &[u8],
    cell_offset: usize,
    page_size: usize,
    usable_size: usize,
    encoding: TextEncoding,
) -> ParseOutcome {
    let limit = page_size.min(buf.len());
    if cell_offset >= limit {
        return ParseOutcome::None;
    }
    let (payload_size, n1) = decode_varint(&buf[..limit], cell_offset);
    if n1 == 0 || payload_size == 0 {
        return ParseOutcome::None;
    }
    let (rowid, n2) = decode_varint(&buf[..limit], cell_offset + n1);
    if n2 == 0 {
        return ParseOutcome::None;
    }
    let rowid = rowid as i64;

    let start = cell_offset + n1 + n2;
    let local = local_payload_size(payload_size, usable_size);
    let end = start.saturating_add(local).min(limit);
    let payload = &buf[start.min(end)..end];

    match decode_record(payload, encoding) {
        Some(record) => ParseOutcome::Structured(Cell {
            offset: cell_offset,
            payload_size,
            rowid,
            header_size: record.header_size,
            values: record.values,
            truncated: record.truncated || (local as u64) < payload_size,
        }),
        None => {
            let text = extract_text_runs(payload, &[encoding, TextEncoding::Utf8], 4);
            if text.is_empty() {
                ParseOutcome::None
            } else {
                ParseOutcome::Heuristic(Fragment {
                    offset: cell_offset,
                    rowid: Some(rowid),
                    text,
                })
            }
        }
    }
}

/// Parses every cell of a table-leaf page whose B-tree header starts at
/// `header_offset` (100 on page 1). Non-leaf pages yield nothing.
pub fn parse_leaf_table_page_at(
    buf: &[u8],
    header_offset: usize,
    page_size: usize,
    usable_size: usize,
    encoding: TextEncoding,
) -> Vec<ParseOutcome> {
    let page = PageContent::new(header_offset, buf);
    if page.page_type() != PageType::TableLeaf {
        return Vec::new();
    }
    page.cell_pointers(page_size)
        .into_iter()
        .map(|ptr| parse_cell(buf, ptr, page_size, usable_size, encoding))
        .filter(|outcome| !matches!(outcome, ParseOutcome::None))
        .collect()
}

pub fn read_u16(buf: &[u8], pos: usize) -> u16 {
    u16::from_be_bytes([buf[pos], buf[pos + 1]])
}

pub fn read_u32(buf: &[u8], pos: usize) -> u32 {
    u32::from_be_bytes([buf[pos], buf[pos + 1], buf[pos + 2], buf[pos + 3]])
}

pub fn read_u16_checked(buf: &[u8], pos: usize) -> Option<u16> {
    let bytes = buf.get(pos..pos.checked_add(2)?)?;
    Some(u16::from_be_bytes([bytes[0], bytes[1]]))
}

pub fn read_u32_checked(buf: &[u8], pos: usize) -> Option<u32> {
    let bytes = buf.get(pos..pos.checked_add(4)?)?;
    Some(u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}
