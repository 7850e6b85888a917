pub const CREATE_POSITION_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS position (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    device_id TEXT NOT NULL,
    time INTEGER NOT NULL,
    latitude REAL NOT NULL,
    longitude REAL NOT NULL,
    altitude REAL NOT NULL DEFAULT 0,
    speed REAL NOT NULL DEFAULT 0,
    course REAL NOT NULL DEFAULT 0,
    battery REAL NOT NULL DEFAULT 0,
    delivered INTEGER NOT NULL DEFAULT 0
);
"#;

pub const CREATE_POSITION_UNSENT_INDEX: &str = r#"
CREATE INDEX IF NOT EXISTS idx_position_unsent ON position (delivered, id);
"#;

pub const CREATE_SETTINGS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

pub const SELECT_SETTING: &str = r#"
SELECT value FROM settings WHERE key = ?;
"#;

pub const INSERT_SETTING: &str = r#"
INSERT INTO settings (key, value) VALUES (?, ?)
ON CONFLICT (key) DO NOTHING;
"#;

pub const INSERT_POSITION: &str = r#"
INSERT INTO position (device_id, time, latitude, longitude, altitude, speed, course, battery, delivered)
VALUES (?, ?, ?, ?, ?, ?, ?, ?, 0);
"#;

pub const SELECT_OLDEST_UNSENT: &str = r#"
SELECT id, device_id, time, latitude, longitude, altitude, speed, course, battery, delivered
FROM position
WHERE delivered = 0
ORDER BY id
LIMIT 1;
"#;

pub const UPDATE_MARK_DELIVERED: &str = r#"
UPDATE position SET delivered = 1 WHERE id = ?;
"#;

pub const DELETE_DELIVERED_BEFORE: &str = r#"
DELETE FROM position WHERE delivered = 1 AND time < ?;
"#;

pub const COUNT_UNSENT: &str = r#"
SELECT COUNT(*) FROM position WHERE delivered = 0;
"#;
