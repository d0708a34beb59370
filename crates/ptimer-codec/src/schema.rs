//! Fixed container schema, format version `1.0`.
//!
//! `step.sound` points at `asset.id` but is not a foreign key. The codec
//! checks it on encode and filters by it on decode.

/// File name of the scratch database inside a codec's temp directory.
pub(crate) const CONTAINER_FILE: &str = "container.ptimer";

/// Page size of freshly written containers.
pub const PAGE_SIZE: u32 = 1024;

/// Relations every container must have.
pub const RELATIONS: [&str; 3] = ["metadata", "asset", "step"];

/// DDL run against an empty database, in order.
pub const STATEMENTS: [&str; 4] = [
  r#"
  CREATE TABLE metadata (
    version TEXT,
    title TEXT NOT NULL,
    description TEXT,
    lang TEXT NOT NULL
  )
  "#,
  r#"
  CREATE TABLE asset (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL,
    mime TEXT NOT NULL,
    data BLOB NOT NULL,
    notice TEXT
  )
  "#,
  r#"
  CREATE TABLE step (
    id INTEGER PRIMARY KEY,
    title TEXT NOT NULL,
    description TEXT,
    sound INTEGER,
    duration_seconds INTEGER,
    "index" INTEGER UNIQUE ON CONFLICT ABORT
  )
  "#,
  r#"CREATE UNIQUE INDEX order_index ON step ("index")"#,
];
