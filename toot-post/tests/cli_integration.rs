//! CLI integration tests for toot-post
//!
//! None of these reach a server: every run stops at configuration, the post
//! file or the token file.

use assert_cmd::Command;
use predicates::prelude::*;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

/// Helper to escape path for TOML on Windows
fn escape_path_for_toml(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "\\\\")
}

/// Temp dir holding a config, a token file path and a valid post file
struct TestEnv {
    dir: TempDir,
}

impl TestEnv {
    fn new(write_token: bool) -> Self {
        let dir = TempDir::new().unwrap();
        let token_path = dir.path().join("mastodon.token");
        if write_token {
            fs::write(&token_path, "abcdef123456xyz\n").unwrap();
        }

        let config = format!(
            r#"
[mastodon]
instance = "127.0.0.1:9"
token_file = "{}"

[posting]
minimum_interval_hours = 20.0
timezone = "America/Toronto"
confirmation = "never"

[audit]
directory = "{}"
"#,
            escape_path_for_toml(&token_path),
            escape_path_for_toml(&dir.path().join("logs"))
        );
        fs::write(dir.path().join("config.toml"), config).unwrap();

        fs::write(
            dir.path().join("post.toml"),
            r#"
month = 12
day = 28
tags = "OTD, Toronto"
post_text = "A turbine pump"
url = "https://example.com/otd?month=12&day=28"
"#,
        )
        .unwrap();

        Self { dir }
    }

    fn path(&self, name: &str) -> String {
        self.dir.path().join(name).to_string_lossy().to_string()
    }

    fn write(&self, name: &str, content: &str) -> String {
        fs::write(self.dir.path().join(name), content).unwrap();
        self.path(name)
    }
}

fn toot_post() -> Command {
    let mut cmd = Command::cargo_bin("toot-post").unwrap();
    cmd.env_remove("TOOTGATE_CONFIG").env_remove("RUST_LOG");
    cmd
}

#[test]
fn test_help_flag_output() {
    toot_post()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("Publish one candidate post to Mastodon"))
        .stdout(predicate::str::contains("--post"))
        .stdout(predicate::str::contains("--policy"))
        .stdout(predicate::str::contains("--format"))
        .stdout(predicate::str::contains("--log-dir"))
        .stdout(predicate::str::contains("EXIT CODES"));
}

#[test]
fn test_version_flag_output() {
    toot_post()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::contains("toot-post"));
}

#[test]
fn test_post_file_is_required() {
    toot_post()
        .assert()
        .failure()
        .stderr(predicate::str::contains("--post"));
}

#[test]
fn test_invalid_policy_rejected_by_parser() {
    let env = TestEnv::new(true);
    toot_post()
        .args(["--config", &env.path("config.toml")])
        .args(["--post", &env.path("post.toml")])
        .args(["--policy", "sometimes"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Invalid confirmation policy"));
}

#[test]
fn test_missing_config_exits_1() {
    let env = TestEnv::new(true);
    toot_post()
        .args(["--config", &env.path("nope.toml")])
        .args(["--post", &env.path("post.toml")])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Failed to read config file"));
}

#[test]
fn test_unknown_timezone_exits_1() {
    let env = TestEnv::new(true);
    let config = env.write(
        "bad.toml",
        "[mastodon]\ninstance = \"m.example\"\ntoken_file = \"/x\"\n[posting]\ntimezone = \"Mars/Olympus\"\n",
    );
    toot_post()
        .args(["--config", &config])
        .args(["--post", &env.path("post.toml")])
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("Unknown timezone: Mars/Olympus"));
}

#[test]
fn test_missing_post_file_exits_3() {
    let env = TestEnv::new(true);
    toot_post()
        .args(["--config", &env.path("config.toml")])
        .args(["--post", &env.path("missing.toml")])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Failed to read post file"));
}

#[test]
fn test_malformed_post_file_exits_3() {
    let env = TestEnv::new(true);
    let post = env.write("broken.toml", "month = \"December\"\n");
    toot_post()
        .args(["--config", &env.path("config.toml")])
        .args(["--post", &post])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("Invalid post file"));
}

#[test]
fn test_empty_post_text_exits_3() {
    let env = TestEnv::new(true);
    let post = env.write("empty.toml", "month = 1\nday = 2\npost_text = \"   \"\n");
    toot_post()
        .args(["--config", &env.path("config.toml")])
        .args(["--post", &post])
        .assert()
        .failure()
        .code(3)
        .stderr(predicate::str::contains("post_text cannot be empty"));
}

#[test]
fn test_missing_token_file_exits_2() {
    let env = TestEnv::new(false);
    toot_post()
        .args(["--config", &env.path("config.toml")])
        .args(["--post", &env.path("post.toml")])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Failed to read Mastodon token file"));
}

#[test]
fn test_config_from_env_var() {
    let env = TestEnv::new(false);
    toot_post()
        .env("TOOTGATE_CONFIG", env.path("config.toml"))
        .args(["--post", &env.path("post.toml")])
        .assert()
        .failure()
        .code(2);
}

#[test]
fn test_stdout_stays_empty_on_error() {
    let env = TestEnv::new(true);
    toot_post()
        .args(["--config", &env.path("config.toml")])
        .args(["--post", &env.path("missing.toml")])
        .args(["--format", "json"])
        .assert()
        .failure()
        .stdout(predicate::str::is_empty());
}
