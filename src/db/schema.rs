pub const SCHEMA: &str = r#"
-- Media table: one row per indexed file
CREATE TABLE IF NOT EXISTS media (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    path TEXT NOT NULL UNIQUE,
    filename TEXT NOT NULL,
    taken_at TEXT NOT NULL,              -- RFC 3339, UTC, second precision
    width INTEGER NOT NULL DEFAULT 0,
    height INTEGER NOT NULL DEFAULT 0,
    orientation INTEGER NOT NULL DEFAULT 1,  -- EXIF orientation 1-8
    media_type TEXT NOT NULL DEFAULT 'image',  -- 'image' or 'video'
    file_size INTEGER NOT NULL DEFAULT 0,
    duration REAL NOT NULL DEFAULT 0,    -- seconds, videos only
    indexed_at TEXT NOT NULL
);

-- Timeline paging walks taken_at newest-first
CREATE INDEX IF NOT EXISTS idx_media_taken_at ON media(taken_at DESC);
CREATE INDEX IF NOT EXISTS idx_media_path ON media(path);
CREATE INDEX IF NOT EXISTS idx_media_type ON media(media_type);
"#;
