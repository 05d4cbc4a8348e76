//! End-to-end CLI integration tests
//!
//! These tests use assert_cmd to run the people-tables binary. The memory
//! backend keeps them independent of any storage account.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs::write;
use tempfile::TempDir;

/// Binary launched in an empty directory with a clean configuration environment
fn people_tables(dir: &TempDir) -> Command {
    let mut cmd = Command::cargo_bin("people-tables").unwrap();
    cmd.current_dir(dir.path())
        .env_remove("AzureWebJobsStorage")
        .env_remove("RUST_LOG")
        .env_remove("PEOPLE_TABLES__STORAGE__BACKEND")
        .env_remove("PEOPLE_TABLES__STORAGE__CONNECTION_STRING");
    cmd
}

#[test]
fn memory_backend_runs_the_whole_tutorial() {
    let dir = TempDir::new().unwrap();

    people_tables(&dir)
        .env("PEOPLE_TABLES__STORAGE__BACKEND", "memory")
        .assert()
        .success()
        .stdout(predicate::str::contains(
            "My_Peoples_Partition; Walter; Walter@contoso.com; 425-555-0101",
        ))
        .stdout(predicate::str::contains("Ben's phone number: 425-555-0102"))
        .stdout(predicate::str::contains("Ben's phone number updated."))
        .stdout(predicate::str::contains("Walter's entity deleted."))
        .stdout(predicate::str::contains(
            "My_Peoples_Partition; Ben; Ben@contoso.com; 425-555-0105",
        ))
        .stdout(predicate::str::ends_with("Ben's phone number: 425-555-0105\n"))
        .stdout(predicate::str::contains("oops").not());
}

#[test]
fn missing_connection_string_prints_oops_and_exits_cleanly() {
    let dir = TempDir::new().unwrap();

    people_tables(&dir)
        .assert()
        .success()
        .stdout(predicate::str::starts_with("oops..."))
        .stdout(predicate::str::contains("AzureWebJobsStorage"));
}

#[test]
fn malformed_connection_string_prints_oops() {
    let dir = TempDir::new().unwrap();

    people_tables(&dir)
        .env("AzureWebJobsStorage", "AccountName=contoso")
        .assert()
        .success()
        .stdout(predicate::str::contains("oops...Invalid storage connection string"));
}

#[test]
fn config_file_selects_table_and_partition() {
    let dir = TempDir::new().unwrap();
    write(
        dir.path().join("people-tables.toml"),
        "[storage]\nbackend = \"memory\"\n\n[table]\nname = \"customers\"\npartition = \"West\"\n",
    )
    .unwrap();

    people_tables(&dir)
        .assert()
        .success()
        .stdout(predicate::str::contains("West; Jeff; Jeff@contoso.com; 425-555-0104"))
        .stdout(predicate::str::contains("My_Peoples_Partition").not());
}

#[test]
fn logs_stay_off_stdout() {
    let dir = TempDir::new().unwrap();

    people_tables(&dir)
        .env("PEOPLE_TABLES__STORAGE__BACKEND", "memory")
        .env("RUST_LOG", "people_tables=debug")
        .assert()
        .success()
        .stdout(predicate::str::contains("Tutorial finished").not())
        .stderr(predicate::str::contains("Tutorial finished"));
}
