//! CLI Integration Tests
//!
//! Tests the command-line interface end-to-end. Every test points
//! `CLOUDCTL_HOME` at its own temporary directory.

mod common;

use assert_cmd::Command;
use assert_fs::prelude::*;
use common::{listing, sha1_hex, this_platform, Response, TestServer, ECHO_PLUGIN};
use predicates::prelude::*;

/// Get the binary to test, isolated in `home`.
fn cloudctl(home: &assert_fs::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("cloudctl").unwrap();
    cmd.env("CLOUDCTL_HOME", home.path())
        .env_remove("RUST_LOG")
        .env_remove("ECHO_PLUGIN_NAME")
        .env_remove("ECHO_PLUGIN_MIN_CLI_VERSION");
    cmd
}

fn install_echo(home: &assert_fs::TempDir) {
    cloudctl(home).args(["install-plugin", ECHO_PLUGIN]).assert().success();
}

// ============================================================================
// Help & Version Tests
// ============================================================================

#[test]
fn test_help_flag() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("install-plugin"))
        .stdout(predicate::str::contains("list-plugin-repos"));
}

#[test]
fn test_version_flag() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains(env!("CARGO_PKG_VERSION")));
}

#[test]
fn test_completions_bash() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("cloudctl"));
}

#[test]
fn test_config_path_uses_home() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .args(["config", "--path"])
        .assert()
        .success()
        .stdout(predicate::str::contains(home.path().to_string_lossy().as_ref()));
}

// ============================================================================
// Repository Command Tests
// ============================================================================

#[test]
fn test_list_plugin_repos_default() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .arg("list-plugin-repos")
        .assert()
        .success()
        .stdout(predicate::str::contains("community"));
}

#[test]
fn test_add_and_remove_plugin_repo() {
    let home = assert_fs::TempDir::new().unwrap();
    let server = TestServer::start();
    server.route("/list", Response::json(&serde_json::json!({"plugins": []})));

    cloudctl(&home)
        .args(["add-plugin-repo", "local", &server.url("/")])
        .assert()
        .success()
        .stdout(predicate::str::contains("added as 'local'"));

    home.child("config.toml").assert(predicate::str::contains("local"));

    cloudctl(&home)
        .args(["add-plugin-repo", "LOCAL", "http://elsewhere.example"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already exists"));

    cloudctl(&home)
        .args(["remove-plugin-repo", "Local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("local has been removed"));

    cloudctl(&home)
        .arg("list-plugin-repos")
        .assert()
        .success()
        .stdout(predicate::str::contains("local").not());
}

#[test]
fn test_add_unreachable_repo_fails() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .args(["add-plugin-repo", "down", "http://127.0.0.1:1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Could not add repository 'down'"));

    home.child("config.toml").assert(predicate::path::missing());
}

#[test]
fn test_remove_unknown_repo_fails() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .args(["remove-plugin-repo", "nowhere"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("does not exist"));
}

#[test]
fn test_repo_plugins_lists_repository() {
    let home = assert_fs::TempDir::new().unwrap();
    let server = TestServer::start();
    server.route(
        "/list",
        Response::json(&listing("echo", this_platform(), &server.url("/bin/echo"), &"d".repeat(40))),
    );

    cloudctl(&home).args(["add-plugin-repo", "local", &server.url("")]).assert().success();

    cloudctl(&home)
        .args(["repo-plugins", "-r", "local"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Repository: local"))
        .stdout(predicate::str::contains("1.2.3"));
}

// ============================================================================
// Plugin Install Tests
// ============================================================================

#[test]
fn test_plugins_empty() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .arg("plugins")
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins installed."));
}

#[test]
fn test_install_missing_file_fails() {
    let home = assert_fs::TempDir::new().unwrap();
    let missing = home.child("missing-plugin");

    cloudctl(&home)
        .args(["install-plugin", missing.path().to_str().unwrap()])
        .assert()
        .failure()
        .stderr(predicate::str::contains("FAILED"))
        .stderr(predicate::str::contains("File not found locally"));
}

#[test]
fn test_install_from_path_and_run() {
    let home = assert_fs::TempDir::new().unwrap();

    cloudctl(&home)
        .args(["install-plugin", ECHO_PLUGIN])
        .assert()
        .success()
        .stdout(predicate::str::contains("Plugin echo"))
        .stdout(predicate::str::contains("successfully installed."));

    cloudctl(&home)
        .args(["echo", "hello", "world"])
        .assert()
        .success()
        .stdout(predicate::str::contains("hello world"));

    cloudctl(&home)
        .args(["EC", "via", "alias"])
        .assert()
        .success()
        .stdout(predicate::str::contains("via alias"));

    cloudctl(&home)
        .arg("plugins")
        .assert()
        .success()
        .stdout(predicate::str::contains("echo, ec"))
        .stdout(predicate::str::contains("whoami-org"));
}

#[test]
fn test_install_twice_needs_force() {
    let home = assert_fs::TempDir::new().unwrap();
    install_echo(&home);

    cloudctl(&home)
        .args(["install-plugin", ECHO_PLUGIN])
        .assert()
        .failure()
        .stderr(predicate::str::contains("already installed"));

    cloudctl(&home).args(["install-plugin", ECHO_PLUGIN, "--force"]).assert().success();
}

#[test]
fn test_install_from_repository() {
    let home = assert_fs::TempDir::new().unwrap();
    let binary = std::fs::read(ECHO_PLUGIN).unwrap();

    let server = TestServer::start();
    server.route("/bin/echo-plugin", Response::bytes(binary.clone()));
    server.route(
        "/list",
        Response::json(&listing(
            "echo",
            this_platform(),
            &server.url("/bin/echo-plugin"),
            &sha1_hex(&binary),
        )),
    );

    cloudctl(&home).args(["add-plugin-repo", "local", &server.url("")]).assert().success();

    cloudctl(&home)
        .args(["install-plugin", "Echo", "-r", "LOCAL"])
        .assert()
        .success()
        .stdout(predicate::str::contains("successfully installed."));

    cloudctl(&home)
        .args(["plugins", "--checksum"])
        .assert()
        .success()
        .stdout(predicate::str::contains(sha1_hex(&binary)));
}

#[test]
fn test_install_from_repository_bad_checksum() {
    let home = assert_fs::TempDir::new().unwrap();
    let server = TestServer::start();
    server.route("/bin/echo-plugin", Response::bytes(b"not the plugin".to_vec()));
    server.route(
        "/list",
        Response::json(&listing("echo", this_platform(), &server.url("/bin/echo-plugin"), &"e".repeat(40))),
    );

    cloudctl(&home).args(["add-plugin-repo", "local", &server.url("")]).assert().success();

    cloudctl(&home)
        .args(["install-plugin", "echo", "-r", "local"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("checksum does not match"));

    cloudctl(&home)
        .arg("plugins")
        .assert()
        .success()
        .stdout(predicate::str::contains("No plugins installed."));
}

// ============================================================================
// Plugin Command Tests
// ============================================================================

#[test]
fn test_unknown_command_fails() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .arg("frobnicate")
        .assert()
        .failure()
        .stderr(predicate::str::contains("'frobnicate' is not a registered command"));
}

#[test]
fn test_plugin_reads_session() {
    let home = assert_fs::TempDir::new().unwrap();
    install_echo(&home);

    home.child("config.toml")
        .write_str("[session.org]\nguid = \"org-1\"\nname = \"acme\"\n")
        .unwrap();

    cloudctl(&home)
        .arg("whoami-org")
        .assert()
        .success()
        .stdout(predicate::str::contains("acme"));
}

#[test]
fn test_plugin_failure_exit_code() {
    let home = assert_fs::TempDir::new().unwrap();
    install_echo(&home);

    cloudctl(&home)
        .arg("echo-fail")
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed on purpose"));
}

#[test]
fn test_uninstall_plugin() {
    let home = assert_fs::TempDir::new().unwrap();
    install_echo(&home);

    cloudctl(&home)
        .args(["uninstall-plugin", "ECHO"])
        .assert()
        .success()
        .stdout(predicate::str::contains("echo plugin uninstalled, bye"))
        .stdout(predicate::str::contains("Plugin echo successfully uninstalled."));

    cloudctl(&home)
        .arg("echo")
        .assert()
        .failure()
        .stderr(predicate::str::contains("not a registered command"));
}

#[test]
fn test_uninstall_unknown_plugin() {
    let home = assert_fs::TempDir::new().unwrap();
    cloudctl(&home)
        .args(["uninstall-plugin", "ghost"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Plugin 'ghost' is not installed"));
}
