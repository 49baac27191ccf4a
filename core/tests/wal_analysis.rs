mod common;

use common::{fingerprint, plain_db, read_page, write_wal, PAGE_SIZE};
use rusqlite::Connection;
use sqlite_recover_core::{
    accessor::wal_path,
    error::ForensicError,
    recovery::{Attribution, ModificationKind, WalState},
    storage::wal::ByteOrder,
    AccessorConfig, ForensicAccessor, QueryParams, Value, WalAnalyzer, WalConfig,
};

#[test]
fn test_one_altered_frame_is_one_modified_page() {
    let evidence = plain_db();
    let untouched = read_page(&evidence.db, 1);
    let mut altered = read_page(&evidence.db, 2);
    let last = altered.len() - 1;
    altered[last] ^= 0xff;
    write_wal(
        &wal_path(&evidence.db),
        PAGE_SIZE as u32,
        &[(1, untouched, 0), (2, altered, 3)],
    );

    let mut analyzer = WalAnalyzer::for_database(&evidence.db, WalConfig::default());
    let analysis = analyzer.analyze().unwrap();
    assert_eq!(analysis.header.checksum_order, ByteOrder::LittleEndian);
    // engine layout: little-endian magic over big-endian fields
    assert_eq!(analysis.header.field_order, ByteOrder::BigEndian);
    assert!(analysis.header.checksum_valid);
    assert_eq!(analysis.frame_count, 2);
    assert_eq!(analysis.suspect_from, None);

    let report = analyzer.diff_against_main(&evidence.db).unwrap();
    assert_eq!(report.page_size_db, PAGE_SIZE as u32);
    assert_eq!(report.page_size_wal, PAGE_SIZE as u32);
    assert_eq!(report.modified_pages.len(), 1);
    assert_eq!(report.modified_pages[0].page_number, 2);
    assert_eq!(report.modified_pages[0].commit_seq, 3);
    assert_eq!(report.modified_pages[0].kind, ModificationKind::Changed);
    assert!(!report.modified_pages[0].suspect);
}

#[test]
fn test_live_wal_from_the_engine() {
    let evidence = plain_db();
    // the writer stays open so nothing is checkpointed
    let writer = Connection::open(&evidence.db).unwrap();
    let mode: String = writer
        .query_row("PRAGMA journal_mode=WAL", [], |row| row.get(0))
        .unwrap();
    assert_eq!(mode, "wal");
    writer.pragma_update(None, "wal_autocheckpoint", 0).unwrap();
    writer
        .execute_batch(
            "INSERT INTO contacts (name, phone) VALUES ('dave', '555-0199');
             CREATE TABLE drafts (id INTEGER PRIMARY KEY, body TEXT);
             INSERT INTO drafts (body) VALUES ('never sent');",
        )
        .unwrap();
    let wal = wal_path(&evidence.db);
    assert!(wal.exists());
    let db_before = fingerprint(&evidence.db);
    let wal_before = fingerprint(&wal);

    let mut analyzer = WalAnalyzer::for_database(&evidence.db, WalConfig::default());
    let analysis = analyzer.analyze().unwrap();
    assert!(analysis.header.checksum_valid);
    assert_eq!(analysis.header.page_size, PAGE_SIZE as u32);
    assert!(analysis.frame_count > 0);
    assert_eq!(analysis.suspect_from, None);
    assert!(analysis.frames.iter().all(|f| !f.suspect));
    assert!(analysis.frames.iter().any(|f| f.is_commit()));
    assert_eq!(analyzer.state(), &WalState::FramesScanned);

    let report = analyzer.diff_against_main(&evidence.db).unwrap();
    assert!(!report.modified_pages.is_empty());
    assert!(report.warnings.is_empty());

    // the new table's root only exists in the WAL, written once per commit
    let drafts = analyzer.extract_candidate_records(Some("drafts")).unwrap();
    let roots: Vec<_> = drafts
        .iter()
        .filter(|c| c.attribution == Attribution::RootPage)
        .collect();
    assert!(!roots.is_empty());
    assert!(roots.iter().all(|c| c.table.as_deref() == Some("drafts")));
    assert!(roots
        .iter()
        .flat_map(|c| c.records.iter())
        .any(|r| r.values.contains(&Value::Text("never sent".into()))));

    // queries see WAL content through the snapshot's copied sidecars
    let accessor = ForensicAccessor::new(AccessorConfig::default()).unwrap();
    let handle = accessor.open(&evidence.db).unwrap();
    let result = accessor
        .execute_query(&handle, "SELECT count(*) FROM contacts", &QueryParams::None)
        .unwrap();
    assert_eq!(result.rows, vec![vec![Value::Integer(4)]]);
    assert!(accessor.describe_schema(&handle).unwrap().has_wal);

    assert_eq!(fingerprint(&evidence.db), db_before);
    assert_eq!(fingerprint(&wal), wal_before);
    drop(writer);
}

#[test]
fn test_tampered_frame_marks_rest_suspect() {
    let evidence = plain_db();
    let frames: Vec<(u32, Vec<u8>, u32)> = (1..=3)
        .map(|n| (n, read_page(&evidence.db, n.min(2)), n))
        .collect();
    let wal = wal_path(&evidence.db);
    write_wal(&wal, PAGE_SIZE as u32, &frames);

    // flip a byte inside the second frame's page image
    let mut bytes = std::fs::read(&wal).unwrap();
    let second_image = 32 + (24 + PAGE_SIZE) + 24;
    bytes[second_image + 100] ^= 0x01;
    std::fs::write(&wal, bytes).unwrap();

    let mut analyzer = WalAnalyzer::for_database(&evidence.db, WalConfig::default());
    let analysis = analyzer.analyze().unwrap();
    assert_eq!(analysis.suspect_from, Some(1));
    let suspect: Vec<bool> = analysis.frames.iter().map(|f| f.suspect).collect();
    assert_eq!(suspect, vec![false, true, true]);

    let unverified = WalAnalyzer::for_database(
        &evidence.db,
        WalConfig {
            verify_checksums: false,
        },
    )
    .analyze()
    .unwrap();
    assert_eq!(unverified.suspect_from, None);
}

#[test]
fn test_missing_and_invalid_wal() {
    let evidence = plain_db();
    let mut analyzer = WalAnalyzer::for_database(&evidence.db, WalConfig::default());
    assert!(matches!(analyzer.analyze(), Err(ForensicError::MissingWal(_))));

    std::fs::write(wal_path(&evidence.db), [0u8; 32]).unwrap();
    let mut analyzer = WalAnalyzer::for_database(&evidence.db, WalConfig::default());
    assert!(matches!(analyzer.analyze(), Err(ForensicError::InvalidWal(_))));
    assert!(matches!(analyzer.state(), WalState::Invalid(_)));
}
