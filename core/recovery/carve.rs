use std::{collections::HashSet, path::Path};

use tracing::{debug, info};

use crate::{
    config::RecoveryConfig,
    io::{EvidenceFile, MemoryFile},
    recovery::freelist::{recover_page, walk_freelist, RecoveredRecord},
    storage::{
        sqlite3_ondisk::{
            btree_header_offset, classify_page_at, has_sqlite_magic, read_u16, DatabaseHeader, PageSize, PageType,
            DATABASE_HEADER_SIZE_BYTES,
        },
        text::{rank_fragments, TextEncoding},
    },
    File, Result,
};

/// Sizes tried, in order, when the header gives no usable page size.
pub const CANDIDATE_PAGE_SIZES: [usize; 8] = [4096, 8192, 16384, 32768, 65536, 1024, 2048, 512];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum PageSizeSource {
    Header,
    Guessed,
    Default,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CarvedPage {
    pub page_number: u32,
    pub offset: u64,
    /// `None` when the freelist could not be read for comparison.
    pub on_freelist: Option<bool>,
    pub records: Vec<RecoveredRecord>,
    pub fragments: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CarveResult {
    pub page_size: u32,
    pub page_size_source: PageSizeSource,
    pub page_count: u32,
    pub pages: Vec<CarvedPage>,
    pub fragments: Vec<String>,
}

impl CarveResult {
    pub fn records(&self) -> impl Iterator<Item = &RecoveredRecord> {
        self.pages.iter().flat_map(|p| p.records.iter())
    }
}

/// Page size from the header when it is valid, else the first candidate that
/// evenly divides the file length, else 4096.
pub fn detect_page_size(data: &[u8]) -> (usize, PageSizeSource) {
    if data.len() >= DATABASE_HEADER_SIZE_BYTES && has_sqlite_magic(data) {
        if let Ok(size) = PageSize::new_from_header_u16(read_u16(data, 16)) {
            return (size.get() as usize, PageSizeSource::Header);
        }
    }
    if !data.is_empty() {
        if let Some(&size) = CANDIDATE_PAGE_SIZES.iter().find(|&&s| data.len() % s == 0) {
            return (size, PageSizeSource::Guessed);
        }
    }
    (PageSize::DEFAULT as usize, PageSizeSource::Default)
}

/// Sweeps every page-aligned offset of the file at `path` for table-leaf
/// pages, whether or not the freelist still references them.
pub fn carve_file(path: impl AsRef<Path>, config: &RecoveryConfig) -> Result<CarveResult> {
    let path = path.as_ref();
    let data = EvidenceFile::open(path)?.read_all()?;
    debug!(path = %path.display(), bytes = data.len(), "carving");
    Ok(carve_bytes(&data, config))
}

pub fn carve_bytes(data: &[u8], config: &RecoveryConfig) -> CarveResult {
    let (page_size, page_size_source) = detect_page_size(data);
    let header = DatabaseHeader::parse(data).ok();
    let encoding = header.as_ref().map_or(TextEncoding::Utf8, DatabaseHeader::encoding);
    let free_pages = header.as_ref().map(|h| live_freelist(data, h, config));

    let page_count = data.len().div_ceil(page_size) as u32;
    let mut pages = Vec::new();
    for (index, buf) in data.chunks(page_size).enumerate() {
        let page_number = index as u32 + 1;
        // without a valid header, page 1 is treated like any other page
        let header_offset = if header.is_some() {
            btree_header_offset(page_number)
        } else {
            0
        };
        if classify_page_at(buf, header_offset) != PageType::TableLeaf {
            continue;
        }
        let usable_size = header.as_ref().map_or(page_size, DatabaseHeader::usable_size);
        let recovered = recover_page(
            buf,
            page_number,
            header_offset,
            page_size,
            usable_size,
            encoding,
            config,
        );
        if recovered.is_empty() {
            continue;
        }
        pages.push(CarvedPage {
            page_number,
            offset: (index * page_size) as u64,
            on_freelist: free_pages.as_ref().map(|free| free.contains(&page_number)),
            records: recovered.records,
            fragments: recovered.fragments,
        });
    }

    let fragments = rank_fragments(
        pages.iter().flat_map(|p| p.fragments.iter().cloned()),
        config.fragment_cap,
    );
    info!(
        page_size,
        ?page_size_source,
        pages = pages.len(),
        "carve finished"
    );
    CarveResult {
        page_size: page_size as u32,
        page_size_source,
        page_count,
        pages,
        fragments,
    }
}

fn live_freelist(data: &[u8], header: &DatabaseHeader, config: &RecoveryConfig) -> HashSet<u32> {
    let file = MemoryFile::new(data);
    walk_freelist(
        &file,
        header,
        header.freelist_trunk_page,
        config.freelist_depth_bound,
    )
    .page_numbers()
}
