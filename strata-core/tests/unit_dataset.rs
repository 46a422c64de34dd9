//! Unit tests for datasets, class tables and wrappers

use serde_json::json;
use std::sync::Arc;
use strata_core::dataset::ClassesSpec;
use strata_core::pipeline::{from_fn, StageSpec};
use strata_core::source::MemorySource;
use strata_core::wrappers::{ConcatDataset, RepeatDataset};
use strata_core::{
    ClassTable, Dataset, DatasetOptions, IndexedDataset, Record, StrataError, Tensor,
    TransformRegistry,
};

fn source() -> MemorySource {
    let records = (0..4i64)
        .map(|i| {
            Record::new()
                .with("img", Tensor::from_u8(vec![1, 1], vec![i as u8]).unwrap())
                .with("gt_label", i % 2)
        })
        .collect();
    MemorySource::new("toy", vec!["even".into(), "odd".into()], records)
}

fn build(options: DatasetOptions) -> strata_core::Result<Dataset> {
    Dataset::new(&source(), options, &TransformRegistry::with_builtins().unwrap())
}

#[test]
fn test_default_and_overridden_classes() {
    let dataset = build(DatasetOptions::default()).unwrap();
    assert_eq!(dataset.classes().names(), &["even", "odd"]);
    assert_eq!(dataset.class_to_index().get("odd"), Some(&1));

    let options = DatasetOptions {
        classes: ClassesSpec::from_value(&json!(["a", "b", "c"])).unwrap(),
        ..Default::default()
    };
    let dataset = build(options).unwrap();
    assert_eq!(dataset.classes().len(), 3);
    assert_eq!(dataset.classes().index_of("c"), Some(2));
}

#[test]
fn test_classes_from_file() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("classes.txt");
    std::fs::write(&path, "cat\r\ndog\n\nbird\n").unwrap();

    let options = DatasetOptions {
        classes: Some(ClassesSpec::File(path)),
        ..Default::default()
    };
    let dataset = build(options).unwrap();
    assert_eq!(dataset.classes().names(), &["cat", "dog", "bird"]);
}

#[test]
fn test_invalid_classes() {
    let err = ClassesSpec::from_value(&json!(42)).unwrap_err();
    assert!(matches!(err, StrataError::InvalidClasses { .. }));

    let err = ClassTable::new(vec!["a".into(), "a".into()]).unwrap_err();
    assert!(matches!(err, StrataError::InvalidClasses { .. }));
}

#[test]
fn test_get_returns_independent_copies() {
    let options = DatasetOptions {
        pipeline: vec![StageSpec::from(from_fn("Tag", |mut r: Record| {
            r.insert("seen", 1i64);
            Some(r)
        }))],
        ..Default::default()
    };
    let dataset = build(options).unwrap();

    let first = dataset.get(2).unwrap().unwrap();
    let second = dataset.get(2).unwrap().unwrap();
    assert_eq!(first, second);
    assert_eq!(first.int("seen"), Some(1));
    assert!(!dataset.raw(2).unwrap().contains_key("seen"));
}

#[test]
fn test_out_of_range_get() {
    let dataset = build(DatasetOptions::default()).unwrap();
    let err = dataset.get(4).unwrap_err();
    assert!(matches!(err, StrataError::IndexOutOfBounds { index: 4, len: 4 }));
}

#[test]
fn test_labels_and_category_ids() {
    let dataset = build(DatasetOptions::default()).unwrap();
    assert_eq!(dataset.labels().unwrap(), vec![0, 1, 0, 1]);
    assert_eq!(dataset.category_ids(3).unwrap(), vec![1]);
}

#[test]
fn test_bad_pipeline_rejected_before_load() {
    let options = DatasetOptions {
        pipeline: vec![StageSpec::from(json!({"type": "Nope"}))],
        ..Default::default()
    };
    assert!(matches!(build(options), Err(StrataError::UnknownKind { .. })));
}

#[test]
fn test_concat_and_repeat() {
    let a: Arc<dyn IndexedDataset> = Arc::new(build(DatasetOptions::default()).unwrap());
    let b: Arc<dyn IndexedDataset> = Arc::new(build(DatasetOptions::default()).unwrap());

    let concat = ConcatDataset::new(vec![a.clone(), b]).unwrap();
    assert_eq!(concat.len(), 8);
    assert_eq!(concat.labels().unwrap(), vec![0, 1, 0, 1, 0, 1, 0, 1]);
    assert!(concat.get(5).unwrap().is_some());

    let repeat = RepeatDataset::new(a, 3);
    assert_eq!(repeat.len(), 12);
    assert_eq!(repeat.get(9).unwrap(), repeat.get(1).unwrap());
}

#[test]
fn test_collect_veto_surfaces_as_none() {
    let options = DatasetOptions {
        pipeline: vec![StageSpec::from(json!({"type": "Collect", "keys": ["img", "bbox"]}))],
        ..Default::default()
    };
    let dataset = build(options).unwrap();
    assert_eq!(dataset.get(0).unwrap(), None);
}
