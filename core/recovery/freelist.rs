use std::{
    collections::{BTreeMap, HashSet},
    path::Path,
    sync::Arc,
};

use tracing::{debug, info, warn};

use crate::{
    accessor::read_header_from,
    config::RecoveryConfig,
    error::ForensicError,
    io::EvidenceFile,
    storage::{
        btree::freelist::{decode_trunk, LEAF_PTR_SIZE_BYTES, TRUNK_LEAF_ARRAY},
        sqlite3_ondisk::{
            btree_header_offset, classify_page_at, parse_leaf_table_page_at, DatabaseHeader,
            PageType, ParseOutcome, DATABASE_HEADER_SIZE_BYTES,
        },
        text::{extract_text_runs, rank_fragments, TextEncoding},
    },
    types::Value,
    File, Result,
};

/// How much a recovered record can be trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Confidence {
    /// Decoded cell structure and record body.
    Structured,
    /// Text pulled from bytes that did not decode.
    Heuristic,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct RecoveredRecord {
    pub page_number: u32,
    pub cell_offset: usize,
    pub rowid: Option<i64>,
    pub values: Vec<Value>,
    pub fragments: Vec<String>,
    pub confidence: Confidence,
    pub truncated: bool,
}

impl RecoveredRecord {
    fn from_outcome(page_number: u32, outcome: ParseOutcome) -> Option<Self> {
        match outcome {
            ParseOutcome::Structured(cell) => Some(Self {
                page_number,
                cell_offset: cell.offset,
                rowid: Some(cell.rowid),
                values: cell.values,
                fragments: Vec::new(),
                confidence: Confidence::Structured,
                truncated: cell.truncated,
            }),
            ParseOutcome::Heuristic(fragment) => Some(Self {
                page_number,
                cell_offset: fragment.offset,
                rowid: fragment.rowid,
                values: Vec::new(),
                fragments: fragment.text,
                confidence: Confidence::Heuristic,
                truncated: false,
            }),
            ParseOutcome::None => None,
        }
    }
}

/// Role of a page within the freelist chain.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum FreelistRole {
    Trunk,
    Leaf,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FreePage {
    pub page_number: u32,
    pub role: FreelistRole,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct FreePages {
    pub pages: Vec<FreePage>,
    /// Set when the chain was cut short by a cycle, a bad pointer or the
    /// depth bound. Pages collected up to that point are kept.
    pub chain_error: Option<String>,
}

impl FreePages {
    pub fn page_numbers(&self) -> HashSet<u32> {
        self.pages.iter().map(|p| p.page_number).collect()
    }

    pub fn chain_corruption(&self) -> Option<ForensicError> {
        self.chain_error.clone().map(ForensicError::FreelistChainCorrupt)
    }
}

/// What one page yielded.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct PageRecovery {
    pub page_number: u32,
    pub page_type: PageType,
    pub role: Option<FreelistRole>,
    pub records: Vec<RecoveredRecord>,
    pub fragments: Vec<String>,
    pub error: Option<String>,
}

impl PageRecovery {
    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.fragments.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ScanResult {
    pub page_size: u32,
    /// Freelist page count as declared by the file header.
    pub free_page_count: u32,
    pub collected_pages: usize,
    pub pages: Vec<PageRecovery>,
    pub fragments: Vec<String>,
    pub chain_error: Option<String>,
}

impl ScanResult {
    pub fn records(&self) -> impl Iterator<Item = &RecoveredRecord> {
        self.pages.iter().flat_map(|p| p.records.iter())
    }
}

/// Deleted rows with their (heuristic) table attribution.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct DeletedRecordsReport {
    pub requested_table: Option<String>,
    pub recovered_count: usize,
    pub by_table: BTreeMap<String, Vec<RecoveredRecord>>,
    pub fragments: Vec<String>,
    pub chain_error: Option<String>,
}

/// Attribution label for records whose table cannot be determined.
pub const UNATTRIBUTED: &str = "unknown";

/// Walks the freelist chain and recovers what freed pages still hold.
pub struct FreelistRecoveryEngine {
    file: Arc<dyn File>,
    header: DatabaseHeader,
    config: RecoveryConfig,
}

impl FreelistRecoveryEngine {
    pub fn open(path: impl AsRef<Path>, config: RecoveryConfig) -> Result<Self> {
        let file = EvidenceFile::open(path)?;
        let header = read_header_from(&file)?;
        Ok(Self {
            file: Arc::new(file),
            header,
            config,
        })
    }

    /// Builds an engine over any page source; the header is read from it.
    pub fn new(file: Arc<dyn File>, config: RecoveryConfig) -> Result<Self> {
        let mut buf = vec![0u8; DATABASE_HEADER_SIZE_BYTES];
        let n = file.pread(0, &mut buf)?;
        let header = DatabaseHeader::parse(&buf[..n])?;
        Ok(Self {
            file,
            header,
            config,
        })
    }

    pub fn header(&self) -> &DatabaseHeader {
        &self.header
    }

    fn page_size(&self) -> usize {
        self.header.page_size as usize
    }

    /// Follows the trunk chain starting at `trunk_page`.
    pub fn collect_free_pages(&self, trunk_page: u32) -> FreePages {
        walk_freelist(
            self.file.as_ref(),
            &self.header,
            trunk_page,
            self.config.freelist_depth_bound,
        )
    }

    /// Recovers records and text from every page on the freelist.
    pub fn scan_freelist(&self) -> Result<ScanResult> {
        let free = self.collect_free_pages(self.header.freelist_trunk_page);
        let mut pages = Vec::with_capacity(free.pages.len());

        for free_page in free.pages.iter().filter(|p| p.page_number != 1) {
            let page = match self.file.read_page(free_page.page_number, self.page_size()) {
                Ok(buf) => self.recover_free_page(&buf, *free_page),
                Err(e) => PageRecovery {
                    page_number: free_page.page_number,
                    page_type: PageType::Unknown,
                    role: Some(free_page.role),
                    records: Vec::new(),
                    fragments: Vec::new(),
                    error: Some(e.to_string()),
                },
            };
            pages.push(page);
        }

        let fragments = rank_fragments(
            pages.iter().flat_map(|p| p.fragments.iter().cloned()),
            self.config.fragment_cap,
        );
        let result = ScanResult {
            page_size: self.header.page_size,
            free_page_count: self.header.freelist_page_count,
            collected_pages: free.pages.len(),
            pages,
            fragments,
            chain_error: free.chain_error,
        };
        info!(
            free_pages = result.collected_pages,
            records = result.records().count(),
            fragments = result.fragments.len(),
            "freelist scan finished"
        );
        Ok(result)
    }

    fn recover_free_page(&self, buf: &[u8], free_page: FreePage) -> PageRecovery {
        match free_page.role {
            FreelistRole::Leaf => {
                let mut page = recover_page(
                    buf,
                    free_page.page_number,
                    btree_header_offset(free_page.page_number),
                    self.page_size(),
                    self.header.usable_size(),
                    self.header.encoding(),
                    &self.config,
                );
                page.role = Some(FreelistRole::Leaf);
                page
            }
            FreelistRole::Trunk => {
                // only the bytes past the leaf array can hold old content
                let used = decode_trunk(buf).map_or(TRUNK_LEAF_ARRAY, |t| {
                    TRUNK_LEAF_ARRAY + t.leaves.len() * LEAF_PTR_SIZE_BYTES
                });
                let tail = buf.get(used..).unwrap_or_default();
                PageRecovery {
                    page_number: free_page.page_number,
                    page_type: PageType::Unknown,
                    role: Some(FreelistRole::Trunk),
                    records: Vec::new(),
                    fragments: page_text(tail, self.header.encoding(), &self.config),
                    error: None,
                }
            }
        }
    }

    /// Freelist records grouped by table. Freed pages carry no owner, so
    /// everything lands under [`UNATTRIBUTED`].
    pub fn recover_deleted_records(&self, table: Option<&str>) -> Result<DeletedRecordsReport> {
        let scan = self.scan_freelist()?;
        let records: Vec<RecoveredRecord> = scan.records().cloned().collect();
        let mut by_table = BTreeMap::new();
        if !records.is_empty() {
            by_table.insert(UNATTRIBUTED.to_string(), records);
        }
        Ok(DeletedRecordsReport {
            requested_table: table.map(str::to_string),
            recovered_count: by_table.values().map(Vec::len).sum(),
            by_table,
            fragments: scan.fragments,
            chain_error: scan.chain_error,
        })
    }

    /// Sweeps the whole file; see [`crate::recovery::carve::carve_bytes`].
    pub fn carve(&self) -> Result<crate::recovery::carve::CarveResult> {
        let data = self.file.read_all()?;
        Ok(crate::recovery::carve::carve_bytes(&data, &self.config))
    }
}

/// Follows the trunk chain of any page source from `trunk_page`.
///
/// The walk stops at a cycle, an out-of-range trunk, an unreadable trunk or
/// after `depth_bound` trunks (capped by the header's freelist count). Pages
/// collected up to that point are kept and the reason lands in `chain_error`.
pub fn walk_freelist(
    file: &dyn File,
    header: &DatabaseHeader,
    trunk_page: u32,
    depth_bound: Option<u32>,
) -> FreePages {
    let page_size = header.page_size as usize;
    let declared = header.freelist_page_count;
    let limit = depth_bound.map_or(declared, |bound| bound.min(declared)) as usize;
    let last_page = file.page_count(page_size).unwrap_or(0);

    let mut result = FreePages::default();
    let mut seen = HashSet::new();
    let mut trunk = trunk_page;
    let mut trunks_visited = 0usize;

    while trunk != 0 {
        if trunks_visited >= limit {
            result.chain_error = Some(format!(
                "chain continues at trunk {trunk} past the bound of {limit} pages"
            ));
            break;
        }
        if trunk == 1 || trunk > last_page {
            result.chain_error = Some(format!("trunk pointer {trunk} is out of range"));
            break;
        }
        if !seen.insert(trunk) {
            result.chain_error = Some(format!("cycle detected at trunk {trunk}"));
            break;
        }
        trunks_visited += 1;

        let buf = match file.read_page(trunk, page_size) {
            Ok(buf) => buf,
            Err(e) => {
                result.chain_error = Some(format!("trunk {trunk} unreadable: {e}"));
                break;
            }
        };
        let Some(decoded) = decode_trunk(&buf) else {
            result.chain_error = Some(format!("trunk {trunk} is truncated"));
            break;
        };
        result.pages.push(FreePage {
            page_number: trunk,
            role: FreelistRole::Trunk,
        });

        let mut dropped = 0usize;
        for leaf in decoded.leaves {
            if leaf > 1 && leaf <= last_page && seen.insert(leaf) {
                result.pages.push(FreePage {
                    page_number: leaf,
                    role: FreelistRole::Leaf,
                });
            } else {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(trunk, dropped, "ignored invalid or repeated leaf pointers");
        }
        trunk = decoded.next_trunk;
    }

    if result.chain_error.is_none() && result.pages.len() != declared as usize {
        result.chain_error = Some(format!(
            "collected {} free pages but the header declares {declared}",
            result.pages.len()
        ));
    }
    if let Some(reason) = &result.chain_error {
        warn!(reason = %reason, "freelist chain incomplete");
    }
    result
}

/// Encodings to try for a page: the database's own first, then the rest.
pub(crate) fn candidate_encodings(source: TextEncoding, config: &RecoveryConfig) -> Vec<TextEncoding> {
    let mut encodings = vec![source];
    for &encoding in &config.encodings {
        if !encodings.contains(&encoding) {
            encodings.push(encoding);
        }
    }
    encodings
}

fn page_text(buf: &[u8], source: TextEncoding, config: &RecoveryConfig) -> Vec<String> {
    extract_text_runs(buf, &candidate_encodings(source, config), config.min_run_len)
}

/// Structured cells (table-leaf pages only) plus text runs for one page.
pub(crate) fn recover_page(
    buf: &[u8],
    page_number: u32,
    header_offset: usize,
    page_size: usize,
    usable_size: usize,
    encoding: TextEncoding,
    config: &RecoveryConfig,
) -> PageRecovery {
    let page_type = classify_page_at(buf, header_offset);
    let records = if page_type == PageType::TableLeaf {
        parse_leaf_table_page_at(buf, header_offset, page_size, usable_size, encoding)
            .into_iter()
            .filter_map(|outcome| RecoveredRecord::from_outcome(page_number, outcome))
            .collect()
    } else {
        Vec::new()
    };
    let content = buf.get(header_offset..).unwrap_or_default();
    PageRecovery {
        page_number,
        page_type,
        role: None,
        records,
        fragments: page_text(content, encoding, config),
        error: None,
    }
}
