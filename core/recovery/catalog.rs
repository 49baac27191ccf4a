use std::collections::HashSet;

use tracing::{debug, warn};

use crate::{
    storage::sqlite3_ondisk::{
        btree_header_offset, decode_varint, parse_leaf_table_page_at, read_u32_checked, PageContent,
        PageType, ParseOutcome,
    },
    storage::text::TextEncoding,
    Result,
};

/// Interior pages deeper than this are not followed.
const MAX_CATALOG_DEPTH: usize = 32;

/// One row of `sqlite_master`.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CatalogEntry {
    pub kind: String,
    pub name: String,
    pub tbl_name: String,
    pub rootpage: u32,
    pub sql: Option<String>,
}

/// The schema table, read straight off the pages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TableCatalog {
    pub entries: Vec<CatalogEntry>,
    /// Pages that could not be read or were not table pages.
    pub skipped_pages: Vec<u32>,
}

impl TableCatalog {
    /// Walks the `sqlite_master` B-tree from page 1. `load` returns a page's
    /// bytes, which lets callers overlay WAL images on the main file.
    pub fn read<F>(load: F, page_size: usize, usable_size: usize, encoding: TextEncoding) -> Result<Self>
    where
        F: Fn(u32) -> Result<Vec<u8>>,
    {
        let mut catalog = TableCatalog::default();
        let mut visited = HashSet::new();
        let mut stack = vec![(1u32, 0usize)];

        while let Some((page_number, depth)) = stack.pop() {
            if page_number == 0 || depth > MAX_CATALOG_DEPTH || !visited.insert(page_number) {
                catalog.skipped_pages.push(page_number);
                continue;
            }
            let buf = match load(page_number) {
                Ok(buf) => buf,
                Err(e) if page_number == 1 => return Err(e),
                Err(e) => {
                    warn!(page_number, error = %e, "schema page unreadable");
                    catalog.skipped_pages.push(page_number);
                    continue;
                }
            };
            let offset = btree_header_offset(page_number);
            let page = PageContent::new(offset, &buf);
            match page.page_type() {
                PageType::TableLeaf => {
                    for outcome in parse_leaf_table_page_at(&buf, offset, page_size, usable_size, encoding) {
                        if let ParseOutcome::Structured(cell) = outcome {
                            if let Some(entry) = entry_from_values(&cell.values) {
                                catalog.entries.push(entry);
                            }
                        }
                    }
                }
                PageType::TableInterior => {
                    for ptr in page.cell_pointers(page_size) {
                        if let Some(child) = read_u32_checked(&buf, ptr) {
                            // the rowid key follows; it is not needed here
                            let (_, n) = decode_varint(&buf, ptr + 4);
                            if n > 0 {
                                stack.push((child, depth + 1));
                            }
                        }
                    }
                    if let Some(right) = page.read_rightmost_ptr() {
                        stack.push((right, depth + 1));
                    }
                }
                other => {
                    debug!(page_number, ?other, "not a table page, skipped");
                    catalog.skipped_pages.push(page_number);
                }
            }
        }
        Ok(catalog)
    }

    pub fn tables(&self) -> impl Iterator<Item = &CatalogEntry> {
        self.entries.iter().filter(|e| e.kind == "table")
    }

    pub fn root_of(&self, table: &str) -> Option<u32> {
        self.tables()
            .find(|e| e.name.eq_ignore_ascii_case(table))
            .map(|e| e.rootpage)
    }

    /// The table or index whose root is `page_number`.
    pub fn owner_of_root(&self, page_number: u32) -> Option<&CatalogEntry> {
        self.entries.iter().find(|e| e.rootpage == page_number && e.rootpage != 0)
    }
}

fn entry_from_values(values: &[crate::types::Value]) -> Option<CatalogEntry> {
    let [kind, name, tbl_name, rootpage, sql, ..] = values else {
        return None;
    };
    Some(CatalogEntry {
        kind: kind.as_text()?.to_string(),
        name: name.as_text()?.to_string(),
        tbl_name: tbl_name.as_text()?.to_string(),
        rootpage: u32::try_from(rootpage.as_integer().unwrap_or(0)).unwrap_or(0),
        sql: sql.as_text().map(str::to_string),
    })
}
