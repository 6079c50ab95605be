//! SQL DDL for the lookout-store database.
//! WAL mode + foreign keys enabled at connection time.

/// Current schema version.
pub const SCHEMA_VERSION: u32 = 1;

/// Connection pragmas.
pub const PRAGMAS: &str = r"
PRAGMA journal_mode = WAL;
PRAGMA synchronous = NORMAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;
";

/// Table and index definitions.
pub const CREATE_TABLES: &str = r"
CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    role TEXT NOT NULL DEFAULT 'viewer',
    created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS broadcasters (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    owner_id TEXT NOT NULL REFERENCES users(id),
    token TEXT,
    token_expires_at TEXT,
    installation_token TEXT,
    installation_token_expires_at TEXT,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    last_connected_at TEXT
);

CREATE TABLE IF NOT EXISTS broadcaster_permissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broadcaster_id TEXT NOT NULL REFERENCES broadcasters(id) ON DELETE CASCADE,
    viewer_id TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    granted_by TEXT NOT NULL,
    created_at TEXT NOT NULL,
    UNIQUE (broadcaster_id, viewer_id)
);

CREATE TABLE IF NOT EXISTS activities (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broadcaster_id TEXT NOT NULL,
    installation_id TEXT,
    host TEXT,
    active_url TEXT,
    idle_seconds REAL,
    is_idle INTEGER NOT NULL DEFAULT 0,
    payload TEXT NOT NULL,
    reported_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS browser_history (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    broadcaster_id TEXT NOT NULL,
    browser TEXT,
    url TEXT NOT NULL,
    title TEXT,
    visit_time TEXT NOT NULL,
    recorded_at TEXT NOT NULL,
    UNIQUE (broadcaster_id, visit_time, url)
);

CREATE INDEX IF NOT EXISTS idx_broadcasters_token ON broadcasters(token);
CREATE INDEX IF NOT EXISTS idx_broadcasters_installation ON broadcasters(installation_token);
CREATE INDEX IF NOT EXISTS idx_broadcasters_owner ON broadcasters(owner_id);
CREATE INDEX IF NOT EXISTS idx_permissions_viewer ON broadcaster_permissions(viewer_id);
CREATE INDEX IF NOT EXISTS idx_activities_broadcaster ON activities(broadcaster_id, reported_at);
CREATE INDEX IF NOT EXISTS idx_history_broadcaster ON browser_history(broadcaster_id, visit_time);
";
