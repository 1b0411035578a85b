//! SQL schema for the entity store

/// Table names, in the order they are dropped by a reset
pub const TABLES: &[&str] = &["code_test", "code_function", "code_class"];

pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS code_class (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(name) > 0),
    source_text TEXT NOT NULL,
    file_path TEXT NOT NULL,
    docstring TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL CHECK (end_line >= start_line),
    test_status TEXT NOT NULL DEFAULT 'unknown',
    missing_lines TEXT NOT NULL DEFAULT '[]',
    UNIQUE (name, file_path)
);

CREATE TABLE IF NOT EXISTS code_function (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(name) > 0),
    source_text TEXT NOT NULL,
    file_path TEXT NOT NULL,
    docstring TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL CHECK (end_line >= start_line),
    test_status TEXT NOT NULL DEFAULT 'unknown',
    missing_lines TEXT NOT NULL DEFAULT '[]',
    class_id INTEGER,
    is_function INTEGER NOT NULL
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_function_key
    ON code_function (name, file_path, IFNULL(class_id, 0));

CREATE TABLE IF NOT EXISTS code_test (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL CHECK (length(name) > 0),
    source_text TEXT NOT NULL,
    file_path TEXT NOT NULL,
    docstring TEXT,
    start_line INTEGER NOT NULL,
    end_line INTEGER NOT NULL CHECK (end_line >= start_line),
    function_id INTEGER,
    class_id INTEGER,
    class_test INTEGER,
    outcome TEXT NOT NULL DEFAULT 'unrun',
    test_class TEXT
);

CREATE UNIQUE INDEX IF NOT EXISTS idx_test_key
    ON code_test (name, file_path, IFNULL(test_class, ''));

CREATE INDEX IF NOT EXISTS idx_function_class ON code_function (class_id);
CREATE INDEX IF NOT EXISTS idx_test_function ON code_test (function_id);
CREATE INDEX IF NOT EXISTS idx_test_outcome ON code_test (outcome);
"#;
