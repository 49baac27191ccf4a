/// The B-Tree page header is 12 bytes for interior pages and 8 bytes for leaf pages.
///
/// +--------+-----------------+-----------------+-----------------+--------+----- ..... ----+
/// | Page   | First Freeblock | Cell Count      | Cell Content    | Frag.  | Right-most     |
/// | Type   | Offset          |                 | Area Start      | Bytes  | pointer        |
/// +--------+-----------------+-----------------+-----------------+--------+----- ..... ----+
///     0        1        2        3        4        5        6        7        8       11
///
/// B-Tree Page: https://www.sqlite.org/fileformat.html
pub mod offset {
    pub const BTREE_PAGE_TYPE: usize = 0;
    pub const BTREE_CELL_COUNT: usize = 3;
    pub const BTREE_RIGHTMOST_PTR: usize = 8;
}

/// A freelist trunk page lists leaf pages and links to the next trunk.
///
/// +----------------+----------------+----------------+----- ..... ----+
/// | Next trunk     | Leaf count     | Leaf page 1    | Leaf page N    |
/// +----------------+----------------+----------------+----- ..... ----+
///  0              4                8               12
///
/// Freelist: https://www.sqlite.org/fileformat.html#the_freelist
pub mod freelist {
    use crate::storage::sqlite3_ondisk::read_u32_checked;

    pub const TRUNK_NEXT_PTR: usize = 0;
    pub const TRUNK_LEAF_COUNT: usize = 4;
    pub const TRUNK_LEAF_ARRAY: usize = 8;
    pub const LEAF_PTR_SIZE_BYTES: usize = 4;

    /// Decoded view of one trunk page.
    #[derive(Debug, Clone, PartialEq, Eq)]
    pub struct TrunkPage {
        pub next_trunk: u32,
        /// Leaf count as stored, before clamping to the page.
        pub declared_leaf_count: u32,
        pub leaves: Vec<u32>,
    }

    /// Decodes a trunk page. The leaf array is clamped to what the page can
    /// hold so a damaged count never reads past the buffer.
    pub fn decode_trunk(buf: &[u8]) -> Option<TrunkPage> {
        let next_trunk = read_u32_checked(buf, TRUNK_NEXT_PTR)?;
        let declared_leaf_count = read_u32_checked(buf, TRUNK_LEAF_COUNT)?;
        let capacity = buf.len().saturating_sub(TRUNK_LEAF_ARRAY) / LEAF_PTR_SIZE_BYTES;
        let count = (declared_leaf_count as usize).min(capacity);
        let leaves = (0..count)
            .filter_map(|i| read_u32_checked(buf, TRUNK_LEAF_ARRAY + i * LEAF_PTR_SIZE_BYTES))
            .collect();
        Some(TrunkPage {
            next_trunk,
            declared_leaf_count,
            leaves,
        })
    }
}
