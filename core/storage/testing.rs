//! Builders for hand-crafted database and WAL images used by unit tests.

use crate::storage::sqlite3_ondisk::{DATABASE_HEADER_SIZE_BYTES, SQLITE_MAGIC};
use crate::storage::wal::{wal_checksum, ByteOrder, WAL_FORMAT_VERSION, WAL_MAGIC_BE};
use crate::types::Value;

pub fn encode_varint(mut value: u64) -> Vec<u8> {
    if value > 0x00ff_ffff_ffff_ffff {
        let mut out = vec![0u8; 9];
        out[8] = value as u8;
        value >>= 8;
        for byte in out[..8].iter_mut().rev() {
            *byte = (value & 0x7f) as u8 | 0x80;
            value >>= 7;
        }
        return out;
    }
    let mut out = Vec::new();
    loop {
        out.push((value & 0x7f) as u8);
        value >>= 7;
        if value == 0 {
            break;
        }
    }
    out.reverse();
    let last = out.len() - 1;
    for byte in &mut out[..last] {
        *byte |= 0x80;
    }
    out
}

/// Encodes values as a record (header then body).
pub fn record(values: &[Value]) -> Vec<u8> {
    let mut types = Vec::new();
    let mut body = Vec::new();
    for value in values {
        let serial: u64 = match value {
            Value::Null => 0,
            Value::Integer(0) => 8,
            Value::Integer(1) => 9,
            Value::Integer(i) => {
                let bytes = i.to_be_bytes();
                let (serial, width) = match *i {
                    -128..=127 => (1, 1),
                    -32768..=32767 => (2, 2),
                    -8_388_608..=8_388_607 => (3, 3),
                    -2_147_483_648..=2_147_483_647 => (4, 4),
                    _ => (6, 8),
                };
                body.extend_from_slice(&bytes[8 - width..]);
                serial
            }
            Value::Real(r) => {
                body.extend_from_slice(&r.to_be_bytes());
                7
            }
            Value::Text(s) => {
                body.extend_from_slice(s.as_bytes());
                13 + 2 * s.len() as u64
            }
            Value::Blob(b) => {
                body.extend_from_slice(b);
                12 + 2 * b.len() as u64
            }
        };
        types.extend(encode_varint(serial));
    }
    let mut out = encode_varint(types.len() as u64 + 1);
    out.extend(types);
    out.extend(body);
    out
}

fn cell(rowid: i64, payload: &[u8]) -> Vec<u8> {
    let mut out = encode_varint(payload.len() as u64);
    out.extend(encode_varint(rowid as u64));
    out.extend_from_slice(payload);
    out
}

/// A table-leaf page holding `cells` in pointer order, content packed at the
/// end of the page.
pub fn leaf_table_page(page_size: usize, cells: &[(i64, Vec<u8>)]) -> Vec<u8> {
    leaf_table_page_at(page_size, 0, cells)
}

pub fn leaf_table_page_at(page_size: usize, header_offset: usize, cells: &[(i64, Vec<u8>)]) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    page[header_offset] = 13;
    page[header_offset + 3..header_offset + 5].copy_from_slice(&(cells.len() as u16).to_be_bytes());
    let mut content = page_size;
    for (i, (rowid, payload)) in cells.iter().enumerate() {
        let bytes = cell(*rowid, payload);
        content -= bytes.len();
        page[content..content + bytes.len()].copy_from_slice(&bytes);
        let ptr = header_offset + 8 + i * 2;
        page[ptr..ptr + 2].copy_from_slice(&(content as u16).to_be_bytes());
    }
    page[header_offset + 5..header_offset + 7].copy_from_slice(&(content as u16).to_be_bytes());
    page
}

pub fn trunk_page(page_size: usize, next_trunk: u32, leaves: &[u32]) -> Vec<u8> {
    let mut page = vec![0u8; page_size];
    page[0..4].copy_from_slice(&next_trunk.to_be_bytes());
    page[4..8].copy_from_slice(&(leaves.len() as u32).to_be_bytes());
    for (i, leaf) in leaves.iter().enumerate() {
        page[8 + i * 4..12 + i * 4].copy_from_slice(&leaf.to_be_bytes());
    }
    page
}

/// A `sqlite_master` row for a table.
pub fn master_row(name: &str, rootpage: i64) -> Vec<u8> {
    record(&[
        Value::Text("table".into()),
        Value::Text(name.into()),
        Value::Text(name.into()),
        Value::Integer(rootpage),
        Value::Text(format!("CREATE TABLE {name}(a)")),
    ])
}

/// Assembles a database image. `pages[0]` becomes page 1 with the file header
/// written over its first 100 bytes; pass `None` to get an empty schema page.
pub struct ImageBuilder {
    pub page_size: usize,
    pub pages: Vec<Vec<u8>>,
    pub freelist_trunk: u32,
    pub freelist_count: u32,
    pub reserved_bytes: u8,
}

impl ImageBuilder {
    pub fn new(page_size: usize) -> Self {
        let page1 = leaf_table_page_at(page_size, DATABASE_HEADER_SIZE_BYTES, &[]);
        Self {
            page_size,
            pages: vec![page1],
            freelist_trunk: 0,
            freelist_count: 0,
            reserved_bytes: 0,
        }
    }

    pub fn schema(mut self, rows: &[(i64, Vec<u8>)]) -> Self {
        self.pages[0] = leaf_table_page_at(self.page_size, DATABASE_HEADER_SIZE_BYTES, rows);
        self
    }

    pub fn page(mut self, page: Vec<u8>) -> Self {
        assert_eq!(page.len(), self.page_size);
        self.pages.push(page);
        self
    }

    pub fn freelist(mut self, trunk: u32, count: u32) -> Self {
        self.freelist_trunk = trunk;
        self.freelist_count = count;
        self
    }

    pub fn reserved(mut self, bytes: u8) -> Self {
        self.reserved_bytes = bytes;
        self
    }

    pub fn build(self) -> Vec<u8> {
        let mut out: Vec<u8> = self.pages.concat();
        out[..16].copy_from_slice(SQLITE_MAGIC);
        let raw_size: u16 = if self.page_size == 65536 { 1 } else { self.page_size as u16 };
        out[16..18].copy_from_slice(&raw_size.to_be_bytes());
        out[18] = 1;
        out[19] = 1;
        out[20] = self.reserved_bytes;
        out[21] = 64;
        out[22] = 32;
        out[23] = 32;
        out[28..32].copy_from_slice(&(self.pages.len() as u32).to_be_bytes());
        out[32..36].copy_from_slice(&self.freelist_trunk.to_be_bytes());
        out[36..40].copy_from_slice(&self.freelist_count.to_be_bytes());
        out[44..48].copy_from_slice(&4u32.to_be_bytes());
        out[56..60].copy_from_slice(&1u32.to_be_bytes());
        out
    }
}

/// Builds a WAL with a valid checksum chain, one frame per `(page, image,
/// commit_size)`.
pub fn wal_image(page_size: u32, salts: (u32, u32), frames: &[(u32, Vec<u8>, u32)]) -> Vec<u8> {
    wal_image_with(WAL_MAGIC_BE, ByteOrder::BigEndian, page_size, salts, frames)
}

/// Like [`wal_image`], with the magic and every field written in
/// `field_order`. The checksum words follow the order the magic selects.
pub fn wal_image_with(
    magic: u32,
    field_order: ByteOrder,
    page_size: u32,
    salts: (u32, u32),
    frames: &[(u32, Vec<u8>, u32)],
) -> Vec<u8> {
    let checksum_order = ByteOrder::from_magic(magic).unwrap_or(ByteOrder::BigEndian);
    let mut out = Vec::new();
    for word in [magic, WAL_FORMAT_VERSION, page_size, 7, salts.0, salts.1] {
        out.extend_from_slice(&field_order.write_u32(word));
    }
    let mut sum = wal_checksum(&out, checksum_order, (0, 0));
    out.extend_from_slice(&field_order.write_u32(sum.0));
    out.extend_from_slice(&field_order.write_u32(sum.1));

    for (page_number, image, commit) in frames {
        let mut header = Vec::new();
        header.extend_from_slice(&field_order.write_u32(*page_number));
        header.extend_from_slice(&field_order.write_u32(*commit));
        sum = wal_checksum(&header, checksum_order, sum);
        sum = wal_checksum(image, checksum_order, sum);
        for word in [salts.0, salts.1, sum.0, sum.1] {
            header.extend_from_slice(&field_order.write_u32(word));
        }
        out.extend(header);
        out.extend_from_slice(image);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::sqlite3_ondisk::decode_varint;

    #[test]
    fn test_encode_varint_matches_decoder() {
        for value in [0u64, 127, 128, 16_383, 16_384, 1 << 40, u64::MAX] {
            let encoded = encode_varint(value);
            assert_eq!(decode_varint(&encoded, 0), (value, encoded.len()));
        }
    }
}
