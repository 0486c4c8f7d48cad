pub const SCHEMA: &str = r#"
-- Inspections: one row per inspection session
CREATE TABLE IF NOT EXISTS inspections (
    id TEXT PRIMARY KEY,
    address TEXT NOT NULL,
    inspector_name TEXT,
    client_name TEXT,
    inspection_type TEXT NOT NULL,
    created_at TEXT NOT NULL,       -- RFC 3339, nanosecond precision
    updated_at TEXT NOT NULL,
    photo_ids TEXT NOT NULL DEFAULT '[]',  -- JSON array of photo ids
    completed INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_inspections_created_at ON inspections(created_at);

-- Photos: no foreign key, the writer keeps inspections and photos consistent
CREATE TABLE IF NOT EXISTS photos (
    id TEXT PRIMARY KEY,
    inspection_id TEXT NOT NULL,
    room TEXT NOT NULL,
    captured_at TEXT NOT NULL,
    notes TEXT NOT NULL DEFAULT '',
    thumbnail BLOB NOT NULL,
    full_image BLOB NOT NULL,
    ai_status TEXT NOT NULL DEFAULT 'pending',
    ai_result TEXT,                 -- JSON, NULL until analysed
    revision INTEGER NOT NULL DEFAULT 0
);

CREATE INDEX IF NOT EXISTS idx_photos_inspection ON photos(inspection_id);

-- Small persisted preferences
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);

-- Outbound mutations waiting for the remote
CREATE TABLE IF NOT EXISTS sync_queue (
    id TEXT PRIMARY KEY,            -- photo_id@edit_timestamp
    photo_id TEXT NOT NULL,
    revision INTEGER NOT NULL,
    edit_timestamp TEXT NOT NULL,
    payload BLOB NOT NULL,
    created_at TEXT NOT NULL,
    retries INTEGER NOT NULL DEFAULT 0,
    last_retry_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_sync_queue_photo ON sync_queue(photo_id);
"#;
