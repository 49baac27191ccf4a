pub mod btree;
pub mod sqlite3_ondisk;
pub mod text;
pub mod wal;

#[cfg(test)]
pub(crate) mod testing;
