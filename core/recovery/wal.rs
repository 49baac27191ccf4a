use std::{
    collections::HashMap,
    path::{Path, PathBuf},
};

use tracing::{debug, info, warn};

use crate::{
    accessor::{read_header_from, wal_path},
    config::{RecoveryConfig, WalConfig},
    error::ForensicError,
    io::EvidenceFile,
    recovery::{
        catalog::TableCatalog,
        freelist::{recover_page, RecoveredRecord},
    },
    storage::{
        sqlite3_ondisk::{btree_header_offset, classify_page_at, DatabaseHeader, PageType},
        text::TextEncoding,
        wal::{decode_frames, FrameScan, WalFrame, WalHeader},
    },
    File, Result,
};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WalState {
    Unparsed,
    HeaderValid,
    FramesScanned,
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct WalAnalysis {
    pub header: WalHeader,
    pub frames: Vec<WalFrame>,
    pub frame_count: usize,
    pub suspect_from: Option<usize>,
    pub trailing_bytes: usize,
    pub wal_size: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum ModificationKind {
    /// The main file holds different bytes for this page.
    Changed,
    /// The main file ends before this page.
    Appended,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ModifiedPage {
    pub page_number: u32,
    pub commit_seq: u32,
    pub frame_index: usize,
    pub kind: ModificationKind,
    pub suspect: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct ModifiedPagesReport {
    pub page_size_db: u32,
    pub page_size_wal: u32,
    pub modified_pages: Vec<ModifiedPage>,
    pub warnings: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum Attribution {
    /// The frame rewrites the table's root page.
    RootPage,
    /// No structural link was established; the frame may belong to the table.
    Potential,
}

#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct CandidateRecord {
    pub frame_index: usize,
    pub page_number: u32,
    pub commit_seq: u32,
    pub table: Option<String>,
    pub attribution: Attribution,
    pub page_type: PageType,
    pub suspect: bool,
    /// Rows decoded from the frame's page image when it is a table leaf.
    pub records: Vec<RecoveredRecord>,
}

/// Parses a WAL file and compares its frames with the main database.
///
/// `Unparsed -> HeaderValid -> FramesScanned`, or `Unparsed -> Invalid` when
/// the header is rejected.
pub struct WalAnalyzer {
    wal_path: PathBuf,
    db_path: Option<PathBuf>,
    config: WalConfig,
    recovery: RecoveryConfig,
    state: WalState,
    data: Vec<u8>,
    header: Option<WalHeader>,
    scan: Option<FrameScan>,
}

impl WalAnalyzer {
    pub fn new(wal_path: impl Into<PathBuf>, config: WalConfig) -> Self {
        Self {
            wal_path: wal_path.into(),
            db_path: None,
            config,
            recovery: RecoveryConfig::default(),
            state: WalState::Unparsed,
            data: Vec::new(),
            header: None,
            scan: None,
        }
    }

    /// Analyzer for `<db_path>-wal`, with the database known for attribution.
    pub fn for_database(db_path: impl AsRef<Path>, config: WalConfig) -> Self {
        let db_path = db_path.as_ref();
        let mut analyzer = Self::new(wal_path(db_path), config);
        analyzer.db_path = Some(db_path.to_path_buf());
        analyzer
    }

    pub fn with_recovery_config(mut self, recovery: RecoveryConfig) -> Self {
        self.recovery = recovery;
        self
    }

    pub fn state(&self) -> &WalState {
        &self.state
    }

    pub fn wal_path(&self) -> &Path {
        &self.wal_path
    }

    pub fn parse_header(&mut self) -> Result<&WalHeader> {
        if let WalState::Invalid(reason) = &self.state {
            return Err(ForensicError::InvalidWal(reason.clone()));
        }
        if self.header.is_none() {
            if !self.wal_path.exists() {
                return Err(ForensicError::MissingWal(self.wal_path.clone()));
            }
            self.data = EvidenceFile::open(&self.wal_path)?.read_all()?;
            match WalHeader::parse(&self.data) {
                Ok(header) => {
                    debug!(
                        page_size = header.page_size,
                        checkpoint_seq = header.checkpoint_seq,
                        "WAL header valid"
                    );
                    self.header = Some(header);
                    self.state = WalState::HeaderValid;
                }
                Err(e) => {
                    let reason = match &e {
                        ForensicError::InvalidWal(reason) => reason.clone(),
                        other => other.to_string(),
                    };
                    warn!(path = %self.wal_path.display(), reason = %reason, "WAL rejected");
                    self.state = WalState::Invalid(reason);
                    return Err(e);
                }
            }
        }
        self.header
            .as_ref()
            .ok_or_else(|| ForensicError::InvalidWal("header not parsed".into()))
    }

    pub fn parse_frames(&mut self) -> Result<&[WalFrame]> {
        self.ensure_scanned()?;
        Ok(self.scan.as_ref().map_or(&[][..], |s| s.frames.as_slice()))
    }

    fn ensure_scanned(&mut self) -> Result<(&WalHeader, &FrameScan)> {
        if self.scan.is_none() {
            let header = self.parse_header()?.clone();
            let scan = decode_frames(&self.data, &header, self.config.verify_checksums);
            if let Some(index) = scan.suspect_from {
                warn!(frame = index, "WAL checksum chain broken; later frames are suspect");
            }
            info!(frames = scan.frames.len(), "WAL frames scanned");
            self.scan = Some(scan);
            self.state = WalState::FramesScanned;
        }
        match (&self.header, &self.scan) {
            (Some(header), Some(scan)) => Ok((header, scan)),
            _ => Err(ForensicError::InvalidWal("frames not scanned".into())),
        }
    }

    pub fn analyze(&mut self) -> Result<WalAnalysis> {
        self.ensure_scanned()?;
        let wal_size = self.data.len() as u64;
        let (header, scan) = self.ensure_scanned()?;
        Ok(WalAnalysis {
            header: header.clone(),
            frames: scan.frames.clone(),
            frame_count: scan.frames.len(),
            suspect_from: scan.suspect_from,
            trailing_bytes: scan.trailing_bytes,
            wal_size,
        })
    }

    /// Frames whose page image differs from the main file's page.
    pub fn diff_against_main(&mut self, db_path: impl AsRef<Path>) -> Result<ModifiedPagesReport> {
        let db_path = db_path.as_ref();
        let db = EvidenceFile::open(db_path)?;
        let db_header = read_header_from(&db)?;
        let db_size = db.size()?;
        let (header, scan) = self.ensure_scanned()?;

        let page_size_db = db_header.page_size;
        let page_size_wal = header.page_size;
        let mut warnings = Vec::new();
        if page_size_db != page_size_wal {
            let warning = format!(
                "page size mismatch: database {page_size_db}, WAL {page_size_wal}; pages compared at database offsets"
            );
            warn!("{warning}");
            warnings.push(warning);
        }

        let mut modified_pages = Vec::new();
        for frame in &scan.frames {
            let offset = (frame.page_number as u64).saturating_sub(1) * page_size_db as u64;
            let kind = if frame.page_number == 0 || offset >= db_size {
                Some(ModificationKind::Appended)
            } else {
                let mut main = vec![0u8; frame.page_image.len()];
                let n = db.pread(offset, &mut main)?;
                (n != main.len() || main != frame.page_image).then_some(ModificationKind::Changed)
            };
            if let Some(kind) = kind {
                modified_pages.push(ModifiedPage {
                    page_number: frame.page_number,
                    commit_seq: frame.commit_seq,
                    frame_index: frame.index,
                    kind,
                    suspect: frame.suspect,
                });
            }
        }

        info!(
            frames = scan.frames.len(),
            modified = modified_pages.len(),
            "WAL compared with main file"
        );
        Ok(ModifiedPagesReport {
            page_size_db,
            page_size_wal,
            modified_pages,
            warnings,
        })
    }

    /// Frames that may carry rows of `table_name` (or of any table).
    ///
    /// Attribution is structural only for root pages: the table catalog is read
    /// from page 1 (latest trusted WAL image first, then the main file) and a
    /// frame rewriting a table's root page is tagged [`Attribution::RootPage`].
    /// Every other frame is a [`Attribution::Potential`] source. Frames that
    /// rewrite the root of a different table are left out when a table is named.
    pub fn extract_candidate_records(&mut self, table_name: Option<&str>) -> Result<Vec<CandidateRecord>> {
        let db_path = self.db_path.clone();
        let recovery = self.recovery.clone();
        let (header, scan) = self.ensure_scanned()?;
        let page_size = header.page_size as usize;

        // latest trusted image per page
        let mut latest: HashMap<u32, &[u8]> = HashMap::new();
        for frame in scan.frames.iter().filter(|f| !f.suspect) {
            latest.insert(frame.page_number, &frame.page_image);
        }

        let main = db_path.as_deref().and_then(|p| EvidenceFile::open(p).ok());
        let main_header = main.as_ref().and_then(|file| read_header_from(file).ok());
        let encoding = main_header
            .as_ref()
            .map_or(TextEncoding::Utf8, DatabaseHeader::encoding);
        // reserved space is a property of the database, not of the WAL
        let usable_size = main_header
            .as_ref()
            .map_or(page_size, |h| page_size.saturating_sub(h.reserved_bytes as usize));
        let catalog = TableCatalog::read(
            |page_number| {
                if let Some(image) = latest.get(&page_number) {
                    return Ok(image.to_vec());
                }
                match &main {
                    Some(file) => file.read_page(page_number, page_size),
                    None => Err(ForensicError::Corrupt(format!(
                        "page {page_number} is not in the WAL and no database was given"
                    ))),
                }
            },
            page_size,
            usable_size,
            encoding,
        )
        .unwrap_or_else(|e| {
            debug!(error = %e, "no table catalog available");
            TableCatalog::default()
        });

        let wanted_root = table_name.and_then(|t| catalog.root_of(t));
        if let (Some(table), None) = (table_name, wanted_root) {
            debug!(table, "table not in catalog; every frame is a potential source");
        }

        let mut candidates = Vec::new();
        for frame in &scan.frames {
            let owner = if frame.page_number == 1 {
                Some("sqlite_master".to_string())
            } else {
                catalog.owner_of_root(frame.page_number).map(|e| e.name.clone())
            };
            let (table, attribution) = match (table_name, owner) {
                (Some(wanted), Some(owner)) if owner.eq_ignore_ascii_case(wanted) => {
                    (Some(owner), Attribution::RootPage)
                }
                (Some(_), Some(_)) => continue,
                (Some(wanted), None) => (Some(wanted.to_string()), Attribution::Potential),
                (None, Some(owner)) => (Some(owner), Attribution::RootPage),
                (None, None) => (None, Attribution::Potential),
            };

            let header_offset = btree_header_offset(frame.page_number);
            let page_type = classify_page_at(&frame.page_image, header_offset);
            let records = if page_type == PageType::TableLeaf {
                recover_page(
                    &frame.page_image,
                    frame.page_number,
                    header_offset,
                    page_size,
                    usable_size,
                    encoding,
                    &recovery,
                )
                .records
            } else {
                Vec::new()
            };

            candidates.push(CandidateRecord {
                frame_index: frame.index,
                page_number: frame.page_number,
                commit_seq: frame.commit_seq,
                table,
                attribution,
                page_type,
                suspect: frame.suspect,
                records,
            });
        }
        Ok(candidates)
    }
}
