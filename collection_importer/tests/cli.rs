//! CLI surface tests.

use assert_cmd::Command;
use predicates::prelude::*;

#[test]
fn test_help_lists_all_blocks() {
    Command::cargo_bin("collection_importer")
        .unwrap()
        .arg("--help")
        .assert()
        .success()
        .stdout(
            predicate::str::contains("--catalog-dsn")
                .and(predicate::str::contains("--drive-folder-id"))
                .and(predicate::str::contains("--api-url"))
                .and(predicate::str::contains("--download-workers"))
                .and(predicate::str::contains("--update-existing-collections"))
                .and(predicate::str::contains("--run-once")),
        );
}

#[test]
fn test_missing_required_args_fail_fast() {
    Command::cargo_bin("collection_importer")
        .unwrap()
        .env_clear()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--drive-folder-id"));
}
