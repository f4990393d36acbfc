use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use predicates::str::contains;
use serde_json::Value;
use tempfile::TempDir;

use dataset_sync::data::{Datatype, EntryPath};

mod util;
use util::{fs_store, write_files};

fn seeded_repo() -> TempDir {
    let tmp = TempDir::new().unwrap();
    let store = fs_store(&tmp);
    store
        .create_data_tree("proj", &[vec!["S2", "T1"], vec!["S1", "T1"]])
        .unwrap();
    let mut tree = store.populate_tree("proj").unwrap();
    let row = tree.row_by_ids(&["S1", "T1"]).unwrap().id();
    let entry = store
        .create_entry(&mut tree, row, EntryPath::primary("t1w").unwrap(), Datatype::FileSet, &[])
        .unwrap();
    let staged = tmp.path().join("staged");
    write_files(&staged, &[("t1w.nii", "voxels")]);
    store.put_fileset(&tree, entry, &staged).unwrap();
    tmp
}

#[test]
fn tree_json_lists_leaves_in_order() {
    let repo = seeded_repo();
    let output = cargo_bin_cmd!("dsync")
        .args(["--root", repo.path().to_str().unwrap(), "tree", "proj", "--json"])
        .output()
        .unwrap();
    assert!(output.status.success());
    let json: Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["dataset"], "proj");
    assert_eq!(json["leaves"][0]["ids"], serde_json::json!(["S1", "T1"]));
    assert_eq!(json["leaves"][1]["ids"], serde_json::json!(["S2", "T1"]));
    assert_eq!(json["rows"]["subject"].as_array().unwrap().len(), 2);
}

#[test]
fn entries_lists_uploaded_fileset() {
    let repo = seeded_repo();
    cargo_bin_cmd!("dsync")
        .args(["--root", repo.path().to_str().unwrap(), "entries", "proj", "S1", "T1"])
        .assert()
        .success()
        .stdout(contains("t1w\tfile_set\t"));
}

#[test]
fn get_downloads_into_dest() {
    let repo = seeded_repo();
    let dest = repo.path().join("dest");
    cargo_bin_cmd!("dsync")
        .args(["--root", repo.path().to_str().unwrap(), "get", "proj", "t1w", "--row", "S1", "T1", "--dest"])
        .arg(&dest)
        .assert()
        .success()
        .stdout(contains("dest"));
    let fetched: Vec<_> = std::fs::read_dir(&dest).unwrap().collect();
    assert_eq!(fetched.len(), 1);
}

#[test]
fn checksum_prints_digests() {
    let tmp = TempDir::new().unwrap();
    write_files(tmp.path(), &[("hello.txt", "hello world")]);
    cargo_bin_cmd!("dsync")
        .args(["checksum", tmp.path().to_str().unwrap()])
        .assert()
        .success()
        .stdout(contains(
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9  hello.txt",
        ));
}

#[test]
fn missing_dataset_exits_nonzero() {
    let repo = seeded_repo();
    cargo_bin_cmd!("dsync")
        .args(["--root", repo.path().to_str().unwrap(), "tree", "nope"])
        .assert()
        .failure()
        .code(1)
        .stderr(contains("not found"));
}

#[test]
fn unknown_digest_is_rejected() {
    let tmp = TempDir::new().unwrap();
    cargo_bin_cmd!("dsync")
        .args(["checksum", tmp.path().to_str().unwrap(), "--digest", "md5"])
        .assert()
        .failure()
        .stderr(contains("md5").and(contains("digest")));
}
