use std::path::Path;

use assert_cmd::Command;
use predicates::prelude::*;
use tempfile::tempdir;

// A declares a.txt (10 bytes), B declares sub/b.txt (20 bytes)
const TORRENT_A: &[u8] = b"d4:infod5:filesld6:lengthi10e4:pathl5:a.txteee4:name1:Aee";
const TORRENT_B: &[u8] = b"d4:infod5:filesld6:lengthi20e4:pathl3:sub5:b.txteee4:name1:Bee";

fn write(path: &Path, contents: &[u8]) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

/// Source tree with torrents A and B, lookup tree holding A in dir1 and B in dir2.
fn setup(root: &Path) -> (std::path::PathBuf, std::path::PathBuf) {
    let source = root.join("torrents");
    let lookup = root.join("lookup");
    write(&source.join("A.torrent"), TORRENT_A);
    write(&source.join("nested").join("B.torrent"), TORRENT_B);
    write(&source.join("readme.txt"), b"not a torrent");
    write(&lookup.join("dir1").join("a.txt"), &[b'a'; 10]);
    write(&lookup.join("dir2").join("sub").join("b.txt"), &[b'b'; 20]);
    (source, lookup)
}

#[test]
fn check_tormatch_help() {
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("folders"))
        .stdout(predicate::str::contains("match"))
        .stdout(predicate::str::contains("copy"));
}

#[test]
fn check_tormatch_version() {
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("--version")
        .assert()
        .success();
}

#[test]
fn missing_subcommand_is_rejected() {
    Command::cargo_bin("tormatch")
        .unwrap()
        .assert()
        .failure();
}

#[test]
fn match_reports_every_torrent() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("match")
        .arg(&source)
        .arg(&lookup)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("matched: 2"))
        .stdout(predicate::str::contains(format!(
            "{} -> {}",
            source.join("A.torrent").display(),
            lookup.join("dir1").display()
        )))
        .stdout(predicate::str::contains(format!(
            "{} -> {}",
            source.join("nested").join("B.torrent").display(),
            lookup.join("dir2").display()
        )))
        .stdout(predicate::str::contains("unmatched: 0"));
}

#[test]
fn unmatched_torrent_exits_with_one() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    std::fs::remove_file(lookup.join("dir2").join("sub").join("b.txt")).unwrap();
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("match")
        .arg(&source)
        .arg(&lookup)
        .assert()
        .code(1)
        .stdout(predicate::str::contains("matched: 1"))
        .stdout(predicate::str::contains(format!(
            "unmatched: 1\n  {}",
            source.join("nested").join("B.torrent").display()
        )))
        .stdout(predicate::str::contains("errors: 0"));
}

#[test]
fn quiet_suppresses_the_report() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("--quiet")
        .arg("match")
        .arg(&source)
        .arg(&lookup)
        .assert()
        .code(0)
        .stdout(predicate::str::is_empty());
}

#[test]
fn corrupt_torrent_is_fatal() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    write(&source.join("broken.torrent"), b"d4:info");
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("match")
        .arg(&source)
        .arg(&lookup)
        .assert()
        .code(2)
        .stderr(predicate::str::contains("broken.torrent"));
}

#[test]
fn missing_lookup_is_fatal() {
    let dir = tempdir().unwrap();
    let (source, _) = setup(dir.path());
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("match")
        .arg(&source)
        .arg(dir.path().join("nope"))
        .assert()
        .code(2);
}

#[test]
fn folders_creates_one_directory_per_torrent() {
    let dir = tempdir().unwrap();
    let (source, _) = setup(dir.path());
    let dest = dir.path().join("dest");
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("folders")
        .arg(&source)
        .arg(&dest)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("directories created: 2"));
    assert!(dest.join("A").is_dir());
    assert!(dest.join("B").is_dir());
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("folders")
        .arg(&source)
        .arg(&dest)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("directories already present: 2"));
}

#[test]
fn copy_relocates_matched_content() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    let dest = dir.path().join("dest");
    Command::cargo_bin("tormatch")
        .unwrap()
        .args(["copy", "--summary"])
        .arg(&source)
        .arg(&lookup)
        .arg(&dest)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("torrents copied: 2"))
        .stdout(predicate::str::contains("files copied: 2"));
    assert_eq!(std::fs::read(dest.join("A").join("a.txt")).unwrap().len(), 10);
    assert_eq!(
        std::fs::read(dest.join("B").join("sub").join("b.txt"))
            .unwrap()
            .len(),
        20
    );
}

#[test]
fn duplicate_torrents_copy_cleanly() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    write(&source.join("again").join("A.torrent"), TORRENT_A);
    let dest = dir.path().join("dest");
    Command::cargo_bin("tormatch")
        .unwrap()
        .args(["copy", "--summary"])
        .arg(&source)
        .arg(&lookup)
        .arg(&dest)
        .assert()
        .code(0)
        .stdout(predicate::str::contains("torrents copied: 3"))
        .stdout(predicate::str::contains("torrents failed: 0"))
        .stdout(predicate::str::contains(format!(
            "{} -> {}",
            source.join("again").join("A.torrent").display(),
            lookup.join("dir1").display()
        )));
    assert_eq!(std::fs::read(dest.join("A").join("a.txt")).unwrap().len(), 10);
}

#[test]
fn copy_by_dir_name_uses_matched_directory_names() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    let dest = dir.path().join("dest");
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("copy")
        .arg(&source)
        .arg(&lookup)
        .arg(&dest)
        .arg("--by-dir-name")
        .assert()
        .code(0);
    assert!(dest.join("dir1").join("a.txt").is_file());
    assert!(dest.join("dir2").join("sub").join("b.txt").is_file());
    assert!(!dest.join("A").exists());
}

#[test]
fn copy_skips_unmatched_torrents() {
    let dir = tempdir().unwrap();
    let (source, lookup) = setup(dir.path());
    std::fs::remove_dir_all(lookup.join("dir1")).unwrap();
    let dest = dir.path().join("dest");
    Command::cargo_bin("tormatch")
        .unwrap()
        .arg("copy")
        .arg(&source)
        .arg(&lookup)
        .arg(&dest)
        .assert()
        .code(1)
        .stdout(predicate::str::contains(format!(
            "unmatched: 1\n  {}",
            source.join("A.torrent").display()
        )));
    assert!(!dest.join("A").exists());
    assert!(dest.join("B").join("sub").join("b.txt").is_file());
}
