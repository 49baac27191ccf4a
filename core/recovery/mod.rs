//! Byte-level recovery: the freelist chain, whole-file carving and the WAL.

pub mod carve;
pub mod catalog;
pub mod freelist;
pub mod wal;

pub use carve::{carve_bytes, carve_file, detect_page_size, CarveResult, CarvedPage, PageSizeSource};
pub use catalog::{CatalogEntry, TableCatalog};
pub use freelist::{
    Confidence, DeletedRecordsReport, FreePage, FreePages, FreelistRecoveryEngine, FreelistRole,
    PageRecovery, RecoveredRecord, ScanResult, UNATTRIBUTED,
};
pub use wal::{
    Attribution, CandidateRecord, ModificationKind, ModifiedPage, ModifiedPagesReport, WalAnalysis,
    WalAnalyzer, WalState,
};
