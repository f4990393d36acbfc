use chrono::{TimeZone, Utc};
use serde_json::Value;

use dataset_sync::data::{Datatype, EntryPath, Frequency, Hierarchy};
use dataset_sync::store::{LeafOrder, RemoteStore};
use dataset_sync::StoreError;

mod util;
use util::MockBackend;

fn scrambled_dataset() -> MockBackend {
    let backend = MockBackend::new();
    backend.add("arcana", None);
    backend.add("arcana/proj", None);
    backend.add("arcana/proj/S2", None);
    backend.add("arcana/proj/S2/T1", None);
    backend.add("arcana/proj/S1", None);
    backend.add("arcana/proj/S1/T2", None);
    backend.add("arcana/proj/S1/T1", None);
    backend.add("arcana/proj/S1/T3", None);
    backend
}

#[test]
fn leaves_follow_labels_not_listing_order() {
    let backend = scrambled_dataset();
    assert_eq!(backend.listed_labels("arcana/proj"), vec!["S2", "S1"]);
    assert_eq!(backend.listed_labels("arcana/proj/S1"), vec!["T2", "T1", "T3"]);
    let store = RemoteStore::new(backend, "arcana").with_leaf_order(LeafOrder::Label);

    let tree = store.populate_tree("proj").unwrap();
    assert_eq!(
        tree.leaf_ids(),
        vec![
            vec!["S1".to_string(), "T1".to_string()],
            vec!["S1".to_string(), "T2".to_string()],
            vec!["S1".to_string(), "T3".to_string()],
            vec!["S2".to_string(), "T1".to_string()],
        ]
    );
    let subjects: Vec<_> = tree.rows(Frequency::Subject).map(|r| r.ids().to_vec()).collect();
    assert_eq!(subjects, vec![vec!["S1".to_string()], vec!["S2".to_string()]]);

    let again = store.populate_tree("proj").unwrap();
    assert_eq!(again.leaf_ids(), tree.leaf_ids());
    assert_eq!(store.backend().open_sessions(), 0);
    assert_eq!(store.backend().connects.get(), 2);
}

#[test]
fn untimed_chronological_leaves_fall_back_to_labels() {
    let store = RemoteStore::new(scrambled_dataset(), "arcana");
    let tree = store.populate_tree("proj").unwrap();
    let order: Vec<_> = tree.leaves().map(|r| r.ids().join("/")).collect();
    assert_eq!(order, vec!["S1/T1", "S1/T2", "S1/T3", "S2/T1"]);
}

#[test]
fn chronological_leaves_put_untimed_last() {
    let backend = MockBackend::new();
    backend.add("arcana/proj", None);
    backend.add("arcana/proj/S1", None);
    backend.add("arcana/proj/S1/late", Some(Utc.with_ymd_and_hms(2023, 6, 1, 8, 0, 0).unwrap()));
    backend.add("arcana/proj/S1/none", None);
    backend.add("arcana/proj/S1/early", Some(Utc.with_ymd_and_hms(2021, 2, 3, 8, 0, 0).unwrap()));
    let store = RemoteStore::new(backend, "arcana");

    let tree = store.populate_tree("proj").unwrap();
    let order: Vec<_> = tree.leaves().map(|r| r.label().unwrap().to_string()).collect();
    assert_eq!(order, vec!["early", "late", "none"]);

    let first = tree.leaves().next().unwrap();
    assert_eq!(first.metadata()["date"], Value::from("20210203"));
    let last = tree.leaves().last().unwrap();
    assert_eq!(last.metadata()["date"], Value::Null);
    assert_eq!(last.metadata()["age"], Value::from(-1.0));
}

#[test]
fn missing_dataset_aborts_and_releases_session() {
    let store = RemoteStore::new(MockBackend::new(), "arcana");
    let err = store.populate_tree("nope").unwrap_err();
    assert!(err.is_not_found());
    assert_eq!(store.backend().connects.get(), 1);
    assert_eq!(store.backend().open_sessions(), 0);
}

#[test]
fn single_level_hierarchy() {
    let backend = MockBackend::new();
    backend.add("proj", None);
    backend.add("proj/b", None);
    backend.add("proj/c", None);
    backend.add("proj/a", None);
    assert_eq!(backend.listed_labels("proj"), vec!["b", "c", "a"]);
    let store = RemoteStore::new(backend, "")
        .with_hierarchy(Hierarchy::new(vec![Frequency::Subject]).unwrap())
        .with_leaf_order(LeafOrder::Label);
    let tree = store.populate_tree("proj").unwrap();
    assert_eq!(
        tree.leaf_ids(),
        vec![vec!["a".to_string()], vec!["b".to_string()], vec!["c".to_string()]]
    );
}

#[test]
fn populate_row_sees_primary_and_derivative_with_same_base() {
    let backend = scrambled_dataset();
    backend.add_analysis("arcana/proj", "segmentation_v1");
    backend.add_entry("arcana/proj/S1/T1", "brain_mask", Datatype::FileSet);
    backend.add_entry("arcana/proj/S1/T1", "brain_mask@segmentation_v1", Datatype::FileSet);
    backend.add_entry("arcana/proj/S1/T1", "volume@segmentation_v1", Datatype::Field);
    let store = RemoteStore::new(backend, "arcana");

    let mut tree = store.populate_tree("proj").unwrap();
    let row = tree.row_by_ids(&["S1", "T1"]).unwrap().id();
    assert_eq!(store.populate_row(&mut tree, row).unwrap(), 3);

    let primary = EntryPath::parse("brain_mask").unwrap();
    let derived = EntryPath::parse("brain_mask@segmentation_v1").unwrap();
    assert_ne!(primary, derived);
    assert!(!tree.find_entry(row, &primary).unwrap().is_derivative());
    assert!(tree.find_entry(row, &derived).unwrap().is_derivative());
    assert_eq!(tree.row(row).entry_count(), 3);

    // A second pass is a no-op.
    assert_eq!(store.populate_row(&mut tree, row).unwrap(), 0);
    assert_eq!(store.backend().open_sessions(), 0);
}

#[test]
fn failed_lookup_during_population_releases_session() {
    let backend = scrambled_dataset();
    let store = RemoteStore::new(backend, "arcana");
    let mut tree = store.populate_tree("proj").unwrap();
    let row = tree.row_by_ids(&["S2", "T1"]).unwrap().id();

    store.backend().fail_lookup_of("arcana/proj/S2/T1");
    let err = store.populate_row(&mut tree, row).unwrap_err();
    assert!(matches!(err, StoreError::NotFound(_)));
    assert!(!tree.row(row).is_populated());
    assert_eq!(store.backend().open_sessions(), 0);
}

#[test]
fn create_data_tree_reuses_existing_containers() {
    let store = RemoteStore::new(MockBackend::new(), "arcana");
    let leaves = vec![vec!["S1", "T1"], vec!["S1", "T2"]];
    store.create_data_tree("proj", &leaves).unwrap();
    store.create_data_tree("proj", &leaves).unwrap();

    let tree = store.populate_tree("proj").unwrap();
    assert_eq!(tree.leaves().count(), 2);
    assert_eq!(tree.rows(Frequency::Subject).count(), 1);
}

#[test]
fn create_data_tree_rejects_wrong_depth() {
    let store = RemoteStore::new(MockBackend::new(), "arcana");
    let err = store.create_data_tree("proj", &[vec!["S1"]]).unwrap_err();
    assert!(matches!(err, StoreError::InvalidHierarchy(_)));
    assert_eq!(store.backend().open_sessions(), 0);
}

#[test]
fn failed_disconnect_surfaces_from_writes_only() {
    let store = RemoteStore::new(scrambled_dataset(), "arcana");
    store.backend().fail_disconnects();

    assert_eq!(store.populate_tree("proj").unwrap().leaves().count(), 4);
    let err = store.create_data_tree("proj", &[vec!["S3", "T1"]]).unwrap_err();
    assert!(matches!(err, StoreError::ConnectionFailure(_)));
    assert_eq!(store.backend().open_sessions(), 0);
}
