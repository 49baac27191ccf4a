#![allow(dead_code)]

use std::{
    path::{Path, PathBuf},
    time::SystemTime,
};

use rusqlite::{params, Connection};
use sha2::{Digest, Sha256};
use sqlite_recover_core::storage::wal::{wal_checksum, ByteOrder, WAL_FORMAT_VERSION, WAL_MAGIC_LE};
use tempfile::TempDir;

pub const PAGE_SIZE: usize = 4096;
pub const DELETED_ROWID: i64 = 3;
pub const DELETED_PHRASE: &str = "meet at the docks";

pub struct Evidence {
    pub dir: TempDir,
    pub db: PathBuf,
}

/// Fingerprint of a file that must not change while it is analyzed.
#[derive(Debug, PartialEq, Eq)]
pub struct Fingerprint {
    pub sha256: Vec<u8>,
    pub len: u64,
    pub modified: SystemTime,
}

pub fn fingerprint(path: &Path) -> Fingerprint {
    let bytes = std::fs::read(path).unwrap();
    let metadata = std::fs::metadata(path).unwrap();
    Fingerprint {
        sha256: Sha256::digest(&bytes).to_vec(),
        len: metadata.len(),
        modified: metadata.modified().unwrap(),
    }
}

/// Roughly 3000 bytes of text, so each row fills most of a 4096-byte page.
pub fn evidence_text(rowid: i64) -> String {
    let lead = if rowid == DELETED_ROWID {
        format!("entry {rowid}: {DELETED_PHRASE} at midnight. ")
    } else {
        format!("entry {rowid}: routine shipping manifest. ")
    };
    let mut text = lead;
    let mut n = 0;
    while text.len() < 3000 {
        text.push_str(&format!("crate {rowid}-{n} cleared customs; "));
        n += 1;
    }
    text
}

/// Three tables, with rowid 3 deleted from `deleted_evidence` and never
/// vacuumed.
///
/// A dropped scratch table puts a trunk on the freelist first, so the page
/// freed by the delete becomes a freelist leaf.
pub fn deleted_evidence_db() -> Evidence {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("evidence.db");
    {
        let conn = Connection::open(&db).unwrap();
        conn.pragma_update(None, "page_size", PAGE_SIZE as i64).unwrap();
        conn.pragma_update(None, "secure_delete", false).unwrap();
        conn.pragma_update(None, "auto_vacuum", 0).unwrap();
        conn.execute_batch(
            "CREATE TABLE notes (id INTEGER PRIMARY KEY, body TEXT);
             CREATE TABLE deleted_evidence (id INTEGER PRIMARY KEY, body TEXT);
             CREATE TABLE settings (key TEXT PRIMARY KEY, value TEXT);
             INSERT INTO notes (body) VALUES ('buy milk'), ('call the lawyer');
             INSERT INTO settings VALUES ('theme', 'dark'), ('locale', 'en_US');",
        )
        .unwrap();
        for rowid in 1..=3 {
            conn.execute(
                "INSERT INTO deleted_evidence (id, body) VALUES (?1, ?2)",
                params![rowid, evidence_text(rowid)],
            )
            .unwrap();
        }
        conn.execute_batch(
            "CREATE TABLE scratch (x TEXT);
             INSERT INTO scratch VALUES ('temporary');
             DROP TABLE scratch;",
        )
        .unwrap();
        conn.execute("DELETE FROM deleted_evidence WHERE id = ?1", [DELETED_ROWID])
            .unwrap();
    }
    Evidence { dir, db }
}

/// A small database in rollback-journal mode.
pub fn plain_db() -> Evidence {
    let dir = tempfile::tempdir().unwrap();
    let db = dir.path().join("plain.db");
    {
        let conn = Connection::open(&db).unwrap();
        conn.pragma_update(None, "page_size", PAGE_SIZE as i64).unwrap();
        conn.execute_batch(
            "CREATE TABLE contacts (id INTEGER PRIMARY KEY, name TEXT, phone TEXT);
             CREATE INDEX contacts_name ON contacts(name);
             CREATE VIEW named AS SELECT name FROM contacts;
             INSERT INTO contacts (name, phone) VALUES
                 ('alice', '555-0100'), ('bob', '555-0101'), ('carol', '555-0102');",
        )
        .unwrap();
    }
    Evidence { dir, db }
}

/// Writes a WAL the way the SQL engine does: little-endian checksum magic,
/// big-endian fields, and a valid checksum chain.
pub fn write_wal(path: &Path, page_size: u32, frames: &[(u32, Vec<u8>, u32)]) {
    let order = ByteOrder::LittleEndian;
    let salts = (0x1234_5678u32, 0x9abc_def0u32);
    let mut out = Vec::new();
    for word in [WAL_MAGIC_LE, WAL_FORMAT_VERSION, page_size, 1, salts.0, salts.1] {
        out.extend_from_slice(&word.to_be_bytes());
    }
    let mut sum = wal_checksum(&out, order, (0, 0));
    out.extend_from_slice(&sum.0.to_be_bytes());
    out.extend_from_slice(&sum.1.to_be_bytes());

    for (page_number, image, commit) in frames {
        let mut header = Vec::with_capacity(24);
        header.extend_from_slice(&page_number.to_be_bytes());
        header.extend_from_slice(&commit.to_be_bytes());
        sum = wal_checksum(&header, order, sum);
        sum = wal_checksum(image, order, sum);
        for word in [salts.0, salts.1, sum.0, sum.1] {
            header.extend_from_slice(&word.to_be_bytes());
        }
        out.extend(header);
        out.extend_from_slice(image);
    }
    std::fs::write(path, out).unwrap();
}

pub fn read_page(db: &Path, page_number: u32) -> Vec<u8> {
    let bytes = std::fs::read(db).unwrap();
    let start = (page_number as usize - 1) * PAGE_SIZE;
    bytes[start..start + PAGE_SIZE].to_vec()
}
