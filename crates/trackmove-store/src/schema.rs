use rusqlite_migration::{M, Migrations};

pub fn migrations() -> Migrations<'static> {
    Migrations::new(vec![
        M::up(
        "CREATE TABLE activities (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            title           TEXT NOT NULL DEFAULT '',
            description     TEXT NOT NULL DEFAULT '',
            keywords_json   TEXT NOT NULL DEFAULT '[]',
            public          INTEGER NOT NULL DEFAULT 0,
            start_time      TEXT,
            end_time        TEXT,
            point_count     INTEGER NOT NULL DEFAULT 0
        );

        CREATE TABLE points (
            activity_id     INTEGER NOT NULL,
            seq             INTEGER NOT NULL,
            time            TEXT NOT NULL,
            latitude        REAL NOT NULL,
            longitude       REAL NOT NULL,
            elevation       REAL,
            PRIMARY KEY (activity_id, seq),
            FOREIGN KEY (activity_id) REFERENCES activities(id) ON DELETE CASCADE
        );

        CREATE INDEX idx_activities_start ON activities(start_time);",
        ),
        M::up("ALTER TABLE activities ADD COLUMN what TEXT NOT NULL DEFAULT 'Cycling';"),
    ])
}
