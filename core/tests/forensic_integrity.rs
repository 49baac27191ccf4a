mod common;

use common::{deleted_evidence_db, fingerprint, plain_db};
use sqlite_recover_core::{
    error::ForensicError, AccessorConfig, ForensicAccessor, QueryParams, Value,
};

fn accessor() -> ForensicAccessor {
    ForensicAccessor::new(AccessorConfig::default()).unwrap()
}

#[test]
fn test_open_and_snapshot_leave_evidence_untouched() {
    let evidence = deleted_evidence_db();
    let before = fingerprint(&evidence.db);
    let accessor = accessor();

    let handle = accessor.open(&evidence.db).unwrap();
    let scratch = {
        let snapshot = accessor.snapshot(&evidence.db).unwrap();
        assert_ne!(snapshot.path(), evidence.db.as_path());
        assert_eq!(snapshot.source_len(), before.len);
        snapshot.scratch_dir().to_path_buf()
    };
    assert!(!scratch.exists());

    accessor
        .execute_query(&handle, "SELECT * FROM deleted_evidence", &QueryParams::None)
        .unwrap();
    accessor.describe_schema(&handle).unwrap();
    accessor.engine_stats(&handle).unwrap();
    accessor.cross_check_header(&handle).unwrap();

    assert_eq!(fingerprint(&evidence.db), before);
}

#[test]
fn test_rejects_non_sqlite_files() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("notes.txt");
    std::fs::write(&path, b"just some notes, definitely not a database").unwrap();
    assert!(matches!(
        accessor().open(&path),
        Err(ForensicError::NotASqliteDatabase(_))
    ));
}

#[test]
fn test_query_validation() {
    let evidence = plain_db();
    let accessor = accessor();
    let handle = accessor.open(&evidence.db).unwrap();

    for sql in [
        "SELECT 1; SELECT 2",
        "SELECT 1;;",
        "DELETE FROM contacts",
        "drop table contacts",
        "SELECT * FROM contacts; pragma writable_schema",
        "Update contacts SET name = 'x'",
        "ATTACH DATABASE 'other.db' AS other",
        "",
    ] {
        assert!(
            matches!(
                accessor.execute_query(&handle, sql, &QueryParams::None),
                Err(ForensicError::QueryValidationError(_))
            ),
            "accepted: {sql:?}"
        );
    }

    // keywords only count as whole tokens
    let result = accessor
        .execute_query(
            &handle,
            "SELECT name AS updated_name FROM contacts ORDER BY id;",
            &QueryParams::None,
        )
        .unwrap();
    assert_eq!(result.columns, vec!["updated_name".to_string()]);
    assert_eq!(result.row_count, 3);
}

#[test]
fn test_query_params_and_truncation() {
    let evidence = plain_db();
    let accessor = ForensicAccessor::new(AccessorConfig {
        max_query_rows: 2,
        ..AccessorConfig::default()
    })
    .unwrap();
    let handle = accessor.open(&evidence.db).unwrap();

    let all = accessor
        .execute_query(&handle, "SELECT name FROM contacts ORDER BY id", &QueryParams::None)
        .unwrap();
    assert_eq!(all.row_count, 2);
    assert!(all.truncated);

    let named = accessor
        .execute_query(
            &handle,
            "SELECT phone FROM contacts WHERE name = :name",
            &QueryParams::Named(vec![("name".into(), Value::Text("bob".into()))]),
        )
        .unwrap();
    assert_eq!(named.rows, vec![vec![Value::Text("555-0101".into())]]);
    assert!(!named.truncated);

    let positional = accessor
        .execute_query(
            &handle,
            "SELECT id FROM contacts WHERE id > ?1",
            &QueryParams::Positional(vec![Value::Integer(2)]),
        )
        .unwrap();
    assert_eq!(positional.rows, vec![vec![Value::Integer(3)]]);

    let err = accessor
        .execute_query(&handle, "SELECT * FROM no_such_table", &QueryParams::None)
        .unwrap_err();
    assert!(matches!(err, ForensicError::QueryExecutionError(_)));
}

#[test]
fn test_table_page_quotes_names() {
    let evidence = plain_db();
    let accessor = accessor();
    let handle = accessor.open(&evidence.db).unwrap();

    let page = accessor.table_page(&handle, "contacts", 2, 1).unwrap();
    assert_eq!(page.columns, vec!["id", "name", "phone"]);
    assert_eq!(page.rows[0][1], Value::Text("bob".into()));

    let err = accessor
        .table_page(&handle, "contacts\"; DROP TABLE contacts; --", 10, 0)
        .unwrap_err();
    assert!(matches!(
        err,
        ForensicError::QueryValidationError(_) | ForensicError::QueryExecutionError(_)
    ));
}

#[test]
fn test_describe_schema() {
    let evidence = plain_db();
    let accessor = accessor();
    let handle = accessor.open(&evidence.db).unwrap();
    let schema = accessor.describe_schema(&handle).unwrap();

    assert_eq!(schema.tables.len(), 1);
    let contacts = &schema.tables[0];
    assert_eq!(contacts.name, "contacts");
    assert_eq!(contacts.row_count, Some(3));
    let columns: Vec<&str> = contacts.columns.iter().map(|c| c.name.as_str()).collect();
    assert_eq!(columns, vec!["id", "name", "phone"]);
    assert_eq!(schema.indexes.len(), 1);
    assert_eq!(schema.views.len(), 1);
    assert!(!schema.has_wal);
}

#[test]
fn test_header_agrees_with_engine() {
    let evidence = deleted_evidence_db();
    let accessor = accessor();
    let handle = accessor.open(&evidence.db).unwrap();

    let stats = accessor.engine_stats(&handle).unwrap();
    assert_eq!(stats.page_size, 4096);
    assert_eq!(stats.freelist_count, handle.header().freelist_page_count);
    assert_eq!(stats.encoding, "UTF-8");
    assert!(accessor.cross_check_header(&handle).unwrap().is_empty());
}
