//! SQLite-backed entity store
//!
//! Holds one table per entity kind. Upserts are keyed by
//! `(name, file_path)` (plus the parent class for functions) so a rescan never
//! duplicates rows. Cross-references between tables are plain integer columns
//! with no cascades; the linker and the coverage mapper fill them in.

mod schema;

use crate::error::StoreError;
use crate::linker::{self, LinkResolution, LinkStats};
use crate::types::{
    ClassEntity, CodeUnit, CoverageStatus, Entity, EntityCounts, EntityKind, FunctionEntity,
    TestEntity, TestOutcome,
};
use rusqlite::{Connection, OptionalExtension, Params, Row, params};
use std::path::{Path, PathBuf};

const CLASS_COLUMNS: &str =
    "id, name, source_text, file_path, docstring, start_line, end_line, test_status, missing_lines";

const FUNCTION_COLUMNS: &str = "id, name, source_text, file_path, docstring, start_line, end_line, \
     test_status, missing_lines, class_id, is_function";

const TEST_COLUMNS: &str = "id, name, source_text, file_path, docstring, start_line, end_line, \
     function_id, class_id, class_test, outcome, test_class";

/// Outcome of an upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Upsert {
    pub id: i64,
    /// False when a row with the same key already existed
    pub created: bool,
    /// The existing row's source text differs from the one offered
    pub stale: bool,
}

impl Upsert {
    fn created(id: i64) -> Self {
        Self {
            id,
            created: true,
            stale: false,
        }
    }

    fn existing(id: i64, stale: bool) -> Self {
        Self {
            id,
            created: false,
            stale,
        }
    }
}

/// A test written by the generator, with its links already known
#[derive(Debug, Clone)]
pub struct NewTest {
    pub name: String,
    pub source_text: String,
    pub file_path: String,
    pub start_line: u32,
    pub end_line: u32,
    pub function_id: Option<i64>,
    pub class_id: Option<i64>,
    pub class_test: Option<bool>,
}

/// Groups writes into one SQLite transaction.
///
/// Dropping without [`StoreTransaction::commit`] rolls everything back.
pub struct StoreTransaction<'a> {
    tx: rusqlite::Transaction<'a>,
}

impl StoreTransaction<'_> {
    pub fn commit(self) -> Result<(), StoreError> {
        self.tx.commit()?;
        Ok(())
    }
}

pub struct EntityStore {
    conn: Connection,
    path: Option<PathBuf>,
}

impl EntityStore {
    /// Open (or create) the store at `path`, creating parent directories and
    /// tables as needed
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
            && !parent.exists()
        {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::DirectoryCreationFailed {
                path: parent.display().to_string(),
                reason: e.to_string(),
            })?;
        }

        let conn = Connection::open(path)?;
        // WAL is best effort; some filesystems refuse it
        let _ = conn.execute_batch("PRAGMA journal_mode = WAL;");
        conn.execute_batch(schema::SCHEMA_SQL)?;

        tracing::debug!("Opened entity store at {:?}", path);
        Ok(Self {
            conn,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(schema::SCHEMA_SQL)?;
        Ok(Self { conn, path: None })
    }

    /// Database file, `None` for in-memory stores
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Start a transaction. Writes made through the store until the returned
    /// guard is committed or dropped belong to it.
    pub fn begin(&self) -> Result<StoreTransaction<'_>, StoreError> {
        Ok(StoreTransaction {
            tx: self.conn.unchecked_transaction()?,
        })
    }

    /// Drop every table and recreate an empty schema
    pub fn reset(&self) -> Result<(), StoreError> {
        for table in schema::TABLES {
            self.conn
                .execute_batch(&format!("DROP TABLE IF EXISTS {};", table))?;
        }
        self.conn.execute_batch(schema::SCHEMA_SQL)?;
        tracing::info!("Entity store reset");
        Ok(())
    }

    // ===== Upserts =====

    pub fn upsert_class(&self, unit: &CodeUnit, file_path: &str) -> Result<Upsert, StoreError> {
        let existing: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, source_text FROM code_class WHERE name = ?1 AND file_path = ?2",
                params![unit.name, file_path],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((id, source_text)) = existing {
            return Ok(Upsert::existing(id, source_text != unit.source_text));
        }

        self.conn.execute(
            "INSERT INTO code_class (name, source_text, file_path, docstring, start_line, end_line)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                unit.name,
                unit.source_text,
                file_path,
                docstring_column(&unit.docstring),
                unit.start_line,
                unit.end_line
            ],
        )?;
        Ok(Upsert::created(self.conn.last_insert_rowid()))
    }

    /// Upsert a function (`parent_class == None`) or a method
    pub fn upsert_function(
        &self,
        unit: &CodeUnit,
        file_path: &str,
        parent_class: Option<i64>,
    ) -> Result<Upsert, StoreError> {
        let existing: Option<(i64, String)> = self
            .conn
            .query_row(
                "SELECT id, source_text FROM code_function
                 WHERE name = ?1 AND file_path = ?2 AND class_id IS ?3",
                params![unit.name, file_path, parent_class],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        if let Some((id, source_text)) = existing {
            return Ok(Upsert::existing(id, source_text != unit.source_text));
        }

        self.conn.execute(
            "INSERT INTO code_function
                (name, source_text, file_path, docstring, start_line, end_line, class_id, is_function)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                unit.name,
                unit.source_text,
                file_path,
                docstring_column(&unit.docstring),
                unit.start_line,
                unit.end_line,
                parent_class,
                parent_class.is_none()
            ],
        )?;
        Ok(Upsert::created(self.conn.last_insert_rowid()))
    }

    /// Upsert a test. `test_class` names the class a test method is defined
    /// in, `None` for module-level tests.
    pub fn upsert_test(
        &self,
        unit: &CodeUnit,
        file_path: &str,
        test_class: Option<&str>,
    ) -> Result<Upsert, StoreError> {
        if let Some((id, source_text)) = self.test_key(&unit.name, file_path, test_class)? {
            return Ok(Upsert::existing(id, source_text != unit.source_text));
        }

        self.conn.execute(
            "INSERT INTO code_test
                (name, source_text, file_path, docstring, start_line, end_line, test_class)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                unit.name,
                unit.source_text,
                file_path,
                docstring_column(&unit.docstring),
                unit.start_line,
                unit.end_line,
                test_class
            ],
        )?;
        Ok(Upsert::created(self.conn.last_insert_rowid()))
    }

    /// Insert a generated test with its links. An existing test with the same
    /// key is left untouched.
    pub fn insert_test(&self, test: &NewTest) -> Result<Upsert, StoreError> {
        if let Some((id, source_text)) = self.test_key(&test.name, &test.file_path, None)? {
            return Ok(Upsert::existing(id, source_text != test.source_text));
        }

        self.conn.execute(
            "INSERT INTO code_test
                (name, source_text, file_path, start_line, end_line, function_id, class_id, class_test)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                test.name,
                test.source_text,
                test.file_path,
                test.start_line,
                test.end_line,
                test.function_id,
                test.class_id,
                test.class_test
            ],
        )?;
        Ok(Upsert::created(self.conn.last_insert_rowid()))
    }

    fn test_key(
        &self,
        name: &str,
        file_path: &str,
        test_class: Option<&str>,
    ) -> Result<Option<(i64, String)>, StoreError> {
        Ok(self
            .conn
            .query_row(
                "SELECT id, source_text FROM code_test
                 WHERE name = ?1 AND file_path = ?2 AND IFNULL(test_class, '') = IFNULL(?3, '')",
                params![name, file_path, test_class],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?)
    }

    // ===== Linking =====

    /// Resolve test references by naming convention
    pub fn link_tests(&self, prefix: &str) -> Result<LinkStats, StoreError> {
        linker::link_tests(self, prefix)
    }

    /// Tests whose function reference is still unset
    pub fn unlinked_tests(&self) -> Result<Vec<TestEntity>, StoreError> {
        self.collect_tests(
            &format!(
                "SELECT {} FROM code_test WHERE function_id IS NULL ORDER BY id",
                TEST_COLUMNS
            ),
            [],
        )
    }

    /// Write a link resolution, filling only the fields that are still unset.
    /// Returns false when every field it could fill was already set.
    pub fn apply_link(&self, test_id: i64, link: &LinkResolution) -> Result<bool, StoreError> {
        let changed = self.conn.execute(
            "UPDATE code_test SET
                class_test = COALESCE(class_test, ?2),
                class_id = COALESCE(class_id, ?3),
                function_id = COALESCE(function_id, ?4)
             WHERE id = ?1
               AND ((class_test IS NULL AND ?2 IS NOT NULL)
                 OR (class_id IS NULL AND ?3 IS NOT NULL)
                 OR (function_id IS NULL AND ?4 IS NOT NULL))",
            params![test_id, link.class_test, link.class_id, link.function_id],
        )?;
        Ok(changed > 0)
    }

    // ===== Queries =====

    pub fn query_by_kind(&self, kind: EntityKind) -> Result<Vec<Entity>, StoreError> {
        Ok(match kind {
            EntityKind::Class => self.classes()?.into_iter().map(Entity::Class).collect(),
            EntityKind::Function => self
                .functions()?
                .into_iter()
                .map(Entity::Function)
                .collect(),
            EntityKind::Test => self.tests()?.into_iter().map(Entity::Test).collect(),
        })
    }

    /// Classes and functions whose last coverage run left lines unexecuted
    pub fn query_untested(&self) -> Result<Vec<Entity>, StoreError> {
        let status = CoverageStatus::Untested.as_str();
        let classes = self.collect_classes(
            &format!(
                "SELECT {} FROM code_class WHERE test_status = ?1 ORDER BY id",
                CLASS_COLUMNS
            ),
            [status],
        )?;
        let functions = self.collect_functions(
            &format!(
                "SELECT {} FROM code_function WHERE test_status = ?1 ORDER BY id",
                FUNCTION_COLUMNS
            ),
            [status],
        )?;

        Ok(classes
            .into_iter()
            .map(Entity::Class)
            .chain(functions.into_iter().map(Entity::Function))
            .collect())
    }

    pub fn classes(&self) -> Result<Vec<ClassEntity>, StoreError> {
        self.collect_classes(
            &format!("SELECT {} FROM code_class ORDER BY id", CLASS_COLUMNS),
            [],
        )
    }

    pub fn functions(&self) -> Result<Vec<FunctionEntity>, StoreError> {
        self.collect_functions(
            &format!("SELECT {} FROM code_function ORDER BY id", FUNCTION_COLUMNS),
            [],
        )
    }

    pub fn tests(&self) -> Result<Vec<TestEntity>, StoreError> {
        self.collect_tests(
            &format!("SELECT {} FROM code_test ORDER BY id", TEST_COLUMNS),
            [],
        )
    }

    pub fn class(&self, id: i64) -> Result<ClassEntity, StoreError> {
        self.collect_classes(
            &format!("SELECT {} FROM code_class WHERE id = ?1", CLASS_COLUMNS),
            [id],
        )?
        .pop()
        .ok_or_else(|| not_found(EntityKind::Class, id))
    }

    pub fn function(&self, id: i64) -> Result<FunctionEntity, StoreError> {
        self.collect_functions(
            &format!("SELECT {} FROM code_function WHERE id = ?1", FUNCTION_COLUMNS),
            [id],
        )?
        .pop()
        .ok_or_else(|| not_found(EntityKind::Function, id))
    }

    pub fn test(&self, id: i64) -> Result<TestEntity, StoreError> {
        self.collect_tests(
            &format!("SELECT {} FROM code_test WHERE id = ?1", TEST_COLUMNS),
            [id],
        )?
        .pop()
        .ok_or_else(|| not_found(EntityKind::Test, id))
    }

    /// Methods of a class in source order
    pub fn functions_of_class(&self, class_id: i64) -> Result<Vec<FunctionEntity>, StoreError> {
        self.collect_functions(
            &format!(
                "SELECT {} FROM code_function WHERE class_id = ?1 ORDER BY start_line, id",
                FUNCTION_COLUMNS
            ),
            [class_id],
        )
    }

    pub fn tests_for_function(&self, function_id: i64) -> Result<Vec<TestEntity>, StoreError> {
        self.collect_tests(
            &format!(
                "SELECT {} FROM code_test WHERE function_id = ?1 ORDER BY id",
                TEST_COLUMNS
            ),
            [function_id],
        )
    }

    /// Functions and methods that no test references
    pub fn functions_without_tests(&self) -> Result<Vec<FunctionEntity>, StoreError> {
        self.collect_functions(
            &format!(
                "SELECT {} FROM code_function f
                 WHERE NOT EXISTS (SELECT 1 FROM code_test t WHERE t.function_id = f.id)
                 ORDER BY id",
                FUNCTION_COLUMNS
            ),
            [],
        )
    }

    pub fn tests_with_outcome(&self, outcome: TestOutcome) -> Result<Vec<TestEntity>, StoreError> {
        self.collect_tests(
            &format!(
                "SELECT {} FROM code_test WHERE outcome = ?1 ORDER BY id",
                TEST_COLUMNS
            ),
            [outcome.as_str()],
        )
    }

    pub fn counts(&self) -> Result<EntityCounts, StoreError> {
        let count = |table: &str| -> Result<usize, StoreError> {
            let n: i64 = self.conn.query_row(
                &format!("SELECT COUNT(*) FROM {}", table),
                [],
                |row| row.get(0),
            )?;
            Ok(n as usize)
        };

        Ok(EntityCounts {
            classes: count("code_class")?,
            functions: count("code_function")?,
            tests: count("code_test")?,
        })
    }

    // ===== Writers used by the coverage mapper and the repair loop =====

    /// Replace the coverage status and missing lines of a class or function.
    ///
    /// Lines outside the entity's span are dropped; the rest are sorted and
    /// deduplicated.
    pub fn set_coverage(
        &self,
        kind: EntityKind,
        id: i64,
        status: CoverageStatus,
        missing_lines: &[u32],
    ) -> Result<(), StoreError> {
        let table = match kind {
            EntityKind::Class => "code_class",
            EntityKind::Function => "code_function",
            EntityKind::Test => {
                return Err(StoreError::UnsupportedKind {
                    operation: "set_coverage".to_string(),
                    kind: kind.to_string(),
                });
            }
        };

        let span: Option<(u32, u32)> = self
            .conn
            .query_row(
                &format!("SELECT start_line, end_line FROM {} WHERE id = ?1", table),
                [id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        let (start_line, end_line) = span.ok_or_else(|| not_found(kind, id))?;

        let mut lines: Vec<u32> = missing_lines
            .iter()
            .copied()
            .filter(|line| (start_line..=end_line).contains(line))
            .collect();
        lines.sort_unstable();
        lines.dedup();

        let encoded = serde_json::to_string(&lines).map_err(|e| StoreError::CorruptedColumn {
            column: "missing_lines".to_string(),
            reason: e.to_string(),
        })?;

        self.conn.execute(
            &format!(
                "UPDATE {} SET test_status = ?2, missing_lines = ?3 WHERE id = ?1",
                table
            ),
            params![id, status.as_str(), encoded],
        )?;
        Ok(())
    }

    pub fn record_test_outcome(&self, id: i64, outcome: TestOutcome) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE code_test SET outcome = ?2 WHERE id = ?1",
            params![id, outcome.as_str()],
        )?;
        if changed == 0 {
            return Err(not_found(EntityKind::Test, id));
        }
        Ok(())
    }

    /// Persist a revised test body together with its latest outcome
    pub fn record_test_revision(
        &self,
        id: i64,
        source_text: &str,
        outcome: TestOutcome,
    ) -> Result<(), StoreError> {
        let changed = self.conn.execute(
            "UPDATE code_test SET source_text = ?2, outcome = ?3 WHERE id = ?1",
            params![id, source_text, outcome.as_str()],
        )?;
        if changed == 0 {
            return Err(not_found(EntityKind::Test, id));
        }
        Ok(())
    }

    // ===== Row mapping =====

    fn collect_classes<P: Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<ClassEntity>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, class_from_row)?;

        let mut classes = Vec::new();
        for row in rows {
            let (mut class, raw_missing) = row?;
            class.missing_lines = decode_missing_lines(&raw_missing)?;
            classes.push(class);
        }
        Ok(classes)
    }

    fn collect_functions<P: Params>(
        &self,
        sql: &str,
        params: P,
    ) -> Result<Vec<FunctionEntity>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt.query_map(params, function_from_row)?;

        let mut functions = Vec::new();
        for row in rows {
            let (mut function, raw_missing) = row?;
            function.missing_lines = decode_missing_lines(&raw_missing)?;
            functions.push(function);
        }
        Ok(functions)
    }

    fn collect_tests<P: Params>(&self, sql: &str, params: P) -> Result<Vec<TestEntity>, StoreError> {
        let mut stmt = self.conn.prepare(sql)?;
        let tests = stmt
            .query_map(params, test_from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(tests)
    }
}

fn class_from_row(row: &Row<'_>) -> rusqlite::Result<(ClassEntity, String)> {
    let status: Option<String> = row.get(7)?;
    Ok((
        ClassEntity {
            id: row.get(0)?,
            name: row.get(1)?,
            source_text: row.get(2)?,
            file_path: row.get(3)?,
            docstring: row.get(4)?,
            start_line: row.get(5)?,
            end_line: row.get(6)?,
            test_status: CoverageStatus::from_db(status.as_deref()),
            missing_lines: Vec::new(),
        },
        row.get(8)?,
    ))
}

fn function_from_row(row: &Row<'_>) -> rusqlite::Result<(FunctionEntity, String)> {
    let status: Option<String> = row.get(7)?;
    Ok((
        FunctionEntity {
            id: row.get(0)?,
            name: row.get(1)?,
            source_text: row.get(2)?,
            file_path: row.get(3)?,
            docstring: row.get(4)?,
            start_line: row.get(5)?,
            end_line: row.get(6)?,
            test_status: CoverageStatus::from_db(status.as_deref()),
            missing_lines: Vec::new(),
            class_id: row.get(9)?,
            is_function: row.get(10)?,
        },
        row.get(8)?,
    ))
}

fn test_from_row(row: &Row<'_>) -> rusqlite::Result<TestEntity> {
    let outcome: Option<String> = row.get(10)?;
    Ok(TestEntity {
        id: row.get(0)?,
        name: row.get(1)?,
        source_text: row.get(2)?,
        file_path: row.get(3)?,
        docstring: row.get(4)?,
        start_line: row.get(5)?,
        end_line: row.get(6)?,
        function_id: row.get(7)?,
        class_id: row.get(8)?,
        class_test: row.get(9)?,
        outcome: TestOutcome::from_db(outcome.as_deref()),
        test_class: row.get(11)?,
    })
}

fn decode_missing_lines(raw: &str) -> Result<Vec<u32>, StoreError> {
    serde_json::from_str(raw).map_err(|e| StoreError::CorruptedColumn {
        column: "missing_lines".to_string(),
        reason: e.to_string(),
    })
}

/// Empty docstrings are stored as NULL
fn docstring_column(docstring: &str) -> Option<&str> {
    if docstring.is_empty() {
        None
    } else {
        Some(docstring)
    }
}

fn not_found(kind: EntityKind, id: i64) -> StoreError {
    StoreError::NotFound {
        kind: kind.to_string(),
        id,
    }
}

#[cfg(test)]
mod tests;
