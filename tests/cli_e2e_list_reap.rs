//! End-to-end tests for the `list` and `reap` commands.

mod common;
use common::prelude::*;

fn fixture_with_backups() -> TestFixture {
    TestFixture::new()
        .with_file("backups/github/acme/app_20240101_100000.bundle", "a")
        .with_file("backups/github/acme/app_20240301_080000.bundle", "bb")
        .with_file("backups/gitlab/group/lib_20231231_235959.tar.gz", "c")
        .with_file("backups/github/acme/notes.txt", "not an artifact")
}

#[test]
fn test_list_local_backups() {
    let fixture = fixture_with_backups();
    fixture
        .command()
        .arg("list")
        .arg("--local-path")
        .arg(fixture.backup_root())
        .assert()
        .success()
        .stdout(predicate::str::contains("(3 artifacts)"))
        .stdout(predicate::str::contains("20240301_080000"))
        .stdout(predicate::str::contains("lib"))
        .stdout(predicate::str::contains("notes").not());
}

#[test]
fn test_list_platform_filter() {
    let fixture = fixture_with_backups();
    fixture
        .command()
        .args(["list", "--platform", "gitlab", "--local-path"])
        .arg(fixture.backup_root())
        .assert()
        .success()
        .stdout(predicate::str::contains("(1 artifacts)"))
        .stdout(predicate::str::contains("group"));
}

#[test]
fn test_list_json() {
    let fixture = fixture_with_backups();
    let output = fixture
        .command()
        .args(["list", "--json", "--local-path"])
        .arg(fixture.backup_root())
        .output()
        .unwrap();
    assert!(output.status.success());
    let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    let items = parsed.as_array().unwrap();
    assert_eq!(items.len(), 3);
    assert_eq!(items[0]["fingerprint"], "20240301_080000");
    assert_eq!(items[0]["kind"], "bundle");
}

#[test]
fn test_list_from_config_file() {
    let fixture = fixture_with_backups();
    let config = format!("local:\n  path: {}\n", fixture.backup_root().display());
    let fixture = fixture.with_config(&config);
    fixture
        .command()
        .args(["list", "--config"])
        .arg(fixture.config_path())
        .assert()
        .success()
        .stdout(predicate::str::contains("(3 artifacts)"));
}

#[test]
fn test_list_without_destination_fails() {
    let fixture = TestFixture::new();
    fixture
        .command()
        .arg("list")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("no backup destination configured"));
}

#[test]
fn test_reap_removes_stale_workspaces() {
    let fixture = TestFixture::new()
        .with_file("backups/tmp/repo-backup/app_0123abcd_clone/HEAD", "x")
        .with_file("backups/tmp/repo-backup/lib_89abcdef_clone/objects/pack/p", "x")
        .with_file("backups/tmp/repo-backup/keep/me.txt", "x");
    fixture
        .command()
        .args(["reap", "--local-path"])
        .arg(fixture.backup_root())
        .assert()
        .success()
        .stdout(predicate::str::contains("Reaped 2 stale workspaces"));

    fixture
        .child("backups/tmp/repo-backup/app_0123abcd_clone")
        .assert(predicate::path::missing());
    fixture
        .child("backups/tmp/repo-backup/lib_89abcdef_clone")
        .assert(predicate::path::missing());
    fixture
        .child("backups/tmp/repo-backup/keep/me.txt")
        .assert(predicate::path::exists());
}

#[test]
fn test_reap_removes_empty_default_work_dir() {
    let fixture = TestFixture::new()
        .with_file("backups/github/acme/app_20240101_100000.bundle", "a")
        .with_file("backups/tmp/repo-backup/app_0123abcd_clone/HEAD", "x");
    fixture
        .command()
        .args(["reap", "--local-path"])
        .arg(fixture.backup_root())
        .assert()
        .success();
    fixture.child("backups/tmp").assert(predicate::path::missing());
    fixture
        .child("backups/github/acme/app_20240101_100000.bundle")
        .assert(predicate::path::exists());
}

#[test]
fn test_reap_with_explicit_work_dir() {
    let fixture = TestFixture::new().with_file("work/repo-backup/app_0123abcd_clone/HEAD", "x");
    fixture
        .command()
        .args(["reap", "--work-dir"])
        .arg(fixture.path().join("work"))
        .assert()
        .success();
    fixture
        .child("work/repo-backup")
        .assert(predicate::path::missing());
    fixture.child("work").assert(predicate::path::is_dir());
}

#[test]
fn test_reap_nothing_to_do() {
    let fixture = TestFixture::new();
    fixture
        .command()
        .args(["reap", "--local-path"])
        .arg(fixture.backup_root())
        .assert()
        .success()
        .stdout(predicate::str::contains("Nothing to reap"));
}
