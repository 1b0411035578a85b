use super::*;
use tempfile::TempDir;

fn unit(name: &str, start: u32, end: u32) -> CodeUnit {
    CodeUnit {
        name: name.to_string(),
        source_text: format!("def {}():\n    pass", name),
        docstring: String::new(),
        start_line: start,
        end_line: end,
    }
}

fn store() -> EntityStore {
    EntityStore::open_in_memory().unwrap()
}

#[test]
fn test_open_creates_file_and_parent_dirs() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("nested").join("dir").join("code.db");

    let store = EntityStore::open(&db_path).unwrap();
    assert!(db_path.exists());
    assert_eq!(store.path(), Some(db_path.as_path()));
    assert_eq!(store.counts().unwrap().total(), 0);
}

#[test]
fn test_reopen_keeps_data() {
    let temp_dir = TempDir::new().unwrap();
    let db_path = temp_dir.path().join("code.db");

    {
        let store = EntityStore::open(&db_path).unwrap();
        store.upsert_class(&unit("Calculator", 1, 10), "calc.py").unwrap();
    }

    let store = EntityStore::open(&db_path).unwrap();
    assert_eq!(store.counts().unwrap().classes, 1);
}

#[test]
fn test_upsert_class_is_idempotent() {
    let store = store();
    let first = store.upsert_class(&unit("Calculator", 1, 10), "calc.py").unwrap();
    let second = store.upsert_class(&unit("Calculator", 1, 10), "calc.py").unwrap();

    assert!(first.created);
    assert!(!second.created);
    assert!(!second.stale);
    assert_eq!(first.id, second.id);
    assert_eq!(store.counts().unwrap().classes, 1);
}

#[test]
fn test_upsert_same_name_different_file() {
    let store = store();
    let a = store.upsert_class(&unit("Config", 1, 3), "a.py").unwrap();
    let b = store.upsert_class(&unit("Config", 1, 3), "b.py").unwrap();
    assert_ne!(a.id, b.id);
    assert_eq!(store.counts().unwrap().classes, 2);
}

#[test]
fn test_upsert_flags_stale_source_without_updating() {
    let store = store();
    let original = unit("add", 1, 2);
    let id = store.upsert_function(&original, "calc.py", None).unwrap().id;

    let mut changed = original.clone();
    changed.source_text = "def add(a, b):\n    return a + b".to_string();
    let upsert = store.upsert_function(&changed, "calc.py", None).unwrap();

    assert!(!upsert.created);
    assert!(upsert.stale);
    assert_eq!(store.function(id).unwrap().source_text, original.source_text);
}

#[test]
fn test_functions_keyed_by_parent_class() {
    let store = store();
    let calc = store.upsert_class(&unit("Calculator", 1, 10), "calc.py").unwrap().id;
    let other = store.upsert_class(&unit("Other", 12, 20), "calc.py").unwrap().id;

    let top = store.upsert_function(&unit("add", 22, 23), "calc.py", None).unwrap();
    let method = store.upsert_function(&unit("add", 2, 3), "calc.py", Some(calc)).unwrap();
    let other_method = store.upsert_function(&unit("add", 13, 14), "calc.py", Some(other)).unwrap();
    let again = store.upsert_function(&unit("add", 2, 3), "calc.py", Some(calc)).unwrap();

    assert!(top.created && method.created && other_method.created);
    assert_eq!(again.id, method.id);
    assert!(!again.created);

    let stored = store.function(method.id).unwrap();
    assert_eq!(stored.class_id, Some(calc));
    assert!(!stored.is_function);
    assert!(store.function(top.id).unwrap().is_function);
}

#[test]
fn test_functions_of_class_in_source_order() {
    let store = store();
    let calc = store.upsert_class(&unit("Calculator", 1, 20), "calc.py").unwrap().id;
    store.upsert_function(&unit("sub", 10, 12), "calc.py", Some(calc)).unwrap();
    store.upsert_function(&unit("add", 2, 4), "calc.py", Some(calc)).unwrap();
    store.upsert_function(&unit("helper", 30, 31), "calc.py", None).unwrap();

    let names: Vec<String> = store
        .functions_of_class(calc)
        .unwrap()
        .into_iter()
        .map(|f| f.name)
        .collect();
    assert_eq!(names, vec!["add", "sub"]);
}

#[test]
fn test_docstring_empty_is_null() {
    let store = store();
    let mut documented = unit("add", 1, 3);
    documented.docstring = "Add two numbers.".to_string();
    let a = store.upsert_function(&documented, "calc.py", None).unwrap().id;
    let b = store.upsert_function(&unit("sub", 5, 6), "calc.py", None).unwrap().id;

    assert_eq!(
        store.function(a).unwrap().docstring.as_deref(),
        Some("Add two numbers.")
    );
    assert_eq!(store.function(b).unwrap().docstring, None);
}

#[test]
fn test_set_coverage_clamps_to_span() {
    let store = store();
    let id = store.upsert_function(&unit("add", 10, 20), "calc.py", None).unwrap().id;

    store
        .set_coverage(
            EntityKind::Function,
            id,
            CoverageStatus::Untested,
            &[16, 3, 15, 16, 42, 20],
        )
        .unwrap();

    let function = store.function(id).unwrap();
    assert_eq!(function.test_status, CoverageStatus::Untested);
    assert_eq!(function.missing_lines, vec![15, 16, 20]);
}

#[test]
fn test_set_coverage_replaces_previous_value() {
    let store = store();
    let id = store.upsert_class(&unit("Calculator", 1, 5), "calc.py").unwrap().id;
    store
        .set_coverage(EntityKind::Class, id, CoverageStatus::Untested, &[2, 3])
        .unwrap();
    store
        .set_coverage(EntityKind::Class, id, CoverageStatus::Tested, &[])
        .unwrap();

    let class = store.class(id).unwrap();
    assert_eq!(class.test_status, CoverageStatus::Tested);
    assert!(class.missing_lines.is_empty());
}

#[test]
fn test_set_coverage_rejects_tests_and_unknown_ids() {
    let store = store();
    let test_id = store
        .upsert_test(&unit("test_add", 1, 2), "tests/test_calc.py", None)
        .unwrap()
        .id;

    assert!(matches!(
        store.set_coverage(EntityKind::Test, test_id, CoverageStatus::Tested, &[]),
        Err(StoreError::UnsupportedKind { .. })
    ));
    assert!(matches!(
        store.set_coverage(EntityKind::Function, 99, CoverageStatus::Tested, &[]),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_query_untested() {
    let store = store();
    let class = store.upsert_class(&unit("Calculator", 1, 5), "calc.py").unwrap().id;
    let tested = store.upsert_function(&unit("add", 7, 8), "calc.py", None).unwrap().id;
    let untested = store.upsert_function(&unit("sub", 10, 12), "calc.py", None).unwrap().id;

    store
        .set_coverage(EntityKind::Class, class, CoverageStatus::Untested, &[3])
        .unwrap();
    store
        .set_coverage(EntityKind::Function, tested, CoverageStatus::Tested, &[])
        .unwrap();
    store
        .set_coverage(EntityKind::Function, untested, CoverageStatus::Untested, &[11])
        .unwrap();

    let entities = store.query_untested().unwrap();
    let keys: Vec<(EntityKind, i64)> = entities.iter().map(|e| (e.kind(), e.id())).collect();
    assert_eq!(
        keys,
        vec![(EntityKind::Class, class), (EntityKind::Function, untested)]
    );
}

#[test]
fn test_query_by_kind() {
    let store = store();
    store.upsert_class(&unit("Calculator", 1, 5), "calc.py").unwrap();
    store.upsert_function(&unit("add", 7, 8), "calc.py", None).unwrap();
    store
        .upsert_test(&unit("test_add", 1, 2), "tests/test_calc.py", None)
        .unwrap();

    for kind in [EntityKind::Class, EntityKind::Function, EntityKind::Test] {
        let entities = store.query_by_kind(kind).unwrap();
        assert_eq!(entities.len(), 1);
        assert_eq!(entities[0].kind(), kind);
    }
}

#[test]
fn test_same_test_name_in_two_classes() {
    let store = store();
    let file = "tests/test_shapes.py";
    let square = store
        .upsert_test(&unit("test_area", 2, 3), file, Some("TestSquare"))
        .unwrap();
    let circle = store
        .upsert_test(&unit("test_area", 6, 7), file, Some("TestCircle"))
        .unwrap();
    let again = store
        .upsert_test(&unit("test_area", 2, 3), file, Some("TestSquare"))
        .unwrap();

    assert!(square.created && circle.created);
    assert_ne!(square.id, circle.id);
    assert!(!again.created);
    assert_eq!(again.id, square.id);
    assert_eq!(
        store.test(circle.id).unwrap().identifier(),
        "tests/test_shapes.py::TestCircle::test_area"
    );
}

#[test]
fn test_outcome_recording() {
    let store = store();
    let id = store
        .upsert_test(&unit("test_add", 1, 2), "tests/test_calc.py", None)
        .unwrap()
        .id;
    assert_eq!(store.test(id).unwrap().outcome, TestOutcome::Unrun);

    store.record_test_outcome(id, TestOutcome::Fail).unwrap();
    let failing = store.tests_with_outcome(TestOutcome::Fail).unwrap();
    assert_eq!(failing.len(), 1);
    assert_eq!(failing[0].id, id);

    store
        .record_test_revision(id, "def test_add():\n    assert True", TestOutcome::Pass)
        .unwrap();
    let test = store.test(id).unwrap();
    assert_eq!(test.outcome, TestOutcome::Pass);
    assert_eq!(test.source_text, "def test_add():\n    assert True");
    assert!(store.tests_with_outcome(TestOutcome::Fail).unwrap().is_empty());
}

#[test]
fn test_outcome_recording_unknown_id() {
    let store = store();
    assert!(matches!(
        store.record_test_outcome(5, TestOutcome::Pass),
        Err(StoreError::NotFound { .. })
    ));
}

#[test]
fn test_insert_test_with_links() {
    let store = store();
    let function = store.upsert_function(&unit("add", 1, 2), "calc.py", None).unwrap().id;
    let upsert = store
        .insert_test(&NewTest {
            name: "test_add".to_string(),
            source_text: "def test_add():\n    assert add(1, 2) == 3".to_string(),
            file_path: "tests/test_calc.py".to_string(),
            start_line: 4,
            end_line: 5,
            function_id: Some(function),
            class_id: None,
            class_test: Some(false),
        })
        .unwrap();

    assert!(upsert.created);
    let tests = store.tests_for_function(function).unwrap();
    assert_eq!(tests.len(), 1);
    assert_eq!(tests[0].class_test, Some(false));
    assert!(store.functions_without_tests().unwrap().is_empty());
}

#[test]
fn test_functions_without_tests() {
    let store = store();
    let add = store.upsert_function(&unit("add", 1, 2), "calc.py", None).unwrap().id;
    let sub = store.upsert_function(&unit("sub", 4, 5), "calc.py", None).unwrap().id;
    let test = store
        .upsert_test(&unit("test_add", 1, 2), "tests/test_calc.py", None)
        .unwrap()
        .id;
    store
        .apply_link(
            test,
            &LinkResolution {
                class_test: Some(false),
                class_id: None,
                function_id: Some(add),
            },
        )
        .unwrap();

    let ids: Vec<i64> = store
        .functions_without_tests()
        .unwrap()
        .into_iter()
        .map(|f| f.id)
        .collect();
    assert_eq!(ids, vec![sub]);
}

#[test]
fn test_apply_link_only_fills_unset_fields() {
    let store = store();
    let test = store
        .upsert_test(&unit("test_add", 1, 2), "tests/test_calc.py", None)
        .unwrap()
        .id;

    let class_only = LinkResolution {
        class_test: Some(true),
        class_id: Some(3),
        function_id: None,
    };
    assert!(store.apply_link(test, &class_only).unwrap());
    assert!(!store.apply_link(test, &class_only).unwrap());
    assert!(
        store
            .apply_link(
                test,
                &LinkResolution {
                    class_test: Some(false),
                    class_id: Some(9),
                    function_id: Some(4),
                },
            )
            .unwrap()
    );

    let stored = store.test(test).unwrap();
    assert_eq!(stored.class_test, Some(true));
    assert_eq!(stored.class_id, Some(3));
    assert_eq!(stored.function_id, Some(4));
}

#[test]
fn test_transaction_rolls_back_on_drop() {
    let store = store();
    {
        let _tx = store.begin().unwrap();
        store.upsert_class(&unit("Calculator", 1, 5), "calc.py").unwrap();
    }
    assert_eq!(store.counts().unwrap().classes, 0);

    let tx = store.begin().unwrap();
    store.upsert_class(&unit("Calculator", 1, 5), "calc.py").unwrap();
    tx.commit().unwrap();
    assert_eq!(store.counts().unwrap().classes, 1);
}

#[test]
fn test_reset_empties_all_tables() {
    let store = store();
    store.upsert_class(&unit("Calculator", 1, 5), "calc.py").unwrap();
    store.upsert_function(&unit("add", 7, 8), "calc.py", None).unwrap();
    store
        .upsert_test(&unit("test_add", 1, 2), "tests/test_calc.py", None)
        .unwrap();

    store.reset().unwrap();
    assert_eq!(store.counts().unwrap(), EntityCounts::default());

    // Schema is usable after a reset
    store.upsert_class(&unit("Calculator", 1, 5), "calc.py").unwrap();
    assert_eq!(store.counts().unwrap().classes, 1);
}

#[test]
fn test_lookup_missing_ids() {
    let store = store();
    assert!(matches!(store.class(1), Err(StoreError::NotFound { .. })));
    assert!(matches!(store.function(1), Err(StoreError::NotFound { .. })));
    assert!(matches!(store.test(1), Err(StoreError::NotFound { .. })));
}
