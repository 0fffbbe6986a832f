pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS case_status (
  case_id TEXT PRIMARY KEY,
  bucket TEXT NOT NULL,
  passed INTEGER,
  consistency_score REAL,
  status_json TEXT NOT NULL,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS store_meta (
  key TEXT PRIMARY KEY,
  value TEXT
);

CREATE INDEX IF NOT EXISTS idx_case_status_bucket ON case_status(bucket);
"#;
