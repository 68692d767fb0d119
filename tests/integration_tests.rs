//! Integration tests for the shadow-pm binary.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use std::fs;
use tempfile::TempDir;

/// Helper to create a shadow-pm Command isolated from the caller's environment
fn shadow_pm(dir: &TempDir) -> Command {
    let mut cmd = cargo_bin_cmd!("shadow-pm");
    cmd.current_dir(dir.path())
        .env_remove("GOOGLE_GEMINI_API_KEY")
        .env_remove("SHADOW_PM_PROJECT")
        .env("RUST_LOG", "warn");
    cmd
}

mod cli_basics {
    use super::*;

    #[test]
    fn test_help_lists_commands() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("serve"))
            .stdout(predicate::str::contains("ingest"))
            .stdout(predicate::str::contains("audit"));
    }

    #[test]
    fn test_version() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("shadow-pm"));
    }

    #[test]
    fn test_invalid_log_format_is_rejected() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .args(["--log-format", "xml", "state"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid log format"));
    }
}

mod init {
    use super::*;

    #[test]
    fn test_init_writes_config_and_database() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("Wrote shadow-pm.toml"));

        let config = fs::read_to_string(dir.path().join("shadow-pm.toml")).unwrap();
        assert!(config.contains("[server]"));
        assert!(config.contains("port = 3141"));
        assert!(dir.path().join(".shadow-pm").join("state.db").exists());
    }

    #[test]
    fn test_init_keeps_existing_config() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("shadow-pm.toml"),
            "[project]\ndefault_id = \"apollo\"\n",
        )
        .unwrap();

        shadow_pm(&dir)
            .arg("init")
            .assert()
            .success()
            .stdout(predicate::str::contains("already exists"));

        let config = fs::read_to_string(dir.path().join("shadow-pm.toml")).unwrap();
        assert_eq!(config, "[project]\ndefault_id = \"apollo\"\n");
    }

    #[test]
    fn test_init_does_not_persist_environment_values() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .env("SLACK_WEBHOOK_URL", "https://hooks.slack.com/services/T1/B1/secret")
            .env("JIRA_DOMAIN", "acme.atlassian.net")
            .env("JIRA_USER_EMAIL", "bot@acme.test")
            .arg("init")
            .assert()
            .success();

        let config = fs::read_to_string(dir.path().join("shadow-pm.toml")).unwrap();
        assert!(!config.contains("hooks.slack.com"));
        assert!(!config.contains("acme.atlassian.net"));
        assert!(!config.contains("bot@acme.test"));
    }
}

mod state {
    use super::*;

    #[test]
    fn test_state_on_empty_database() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .args(["state", "apollo"])
            .assert()
            .success()
            .stdout(predicate::str::contains("No strategic state recorded for project 'apollo'"));
    }

    #[test]
    fn test_state_uses_configured_default_project() {
        let dir = TempDir::new().unwrap();
        fs::write(
            dir.path().join("custom.toml"),
            "[project]\ndefault_id = \"gemini\"\n\n[server]\ndb_path = \"data/state.db\"\n",
        )
        .unwrap();

        shadow_pm(&dir)
            .args(["--config", "custom.toml", "state"])
            .assert()
            .success()
            .stdout(predicate::str::contains("'gemini'"));
        assert!(dir.path().join("data").join("state.db").exists());
    }
}

mod pipelines {
    use super::*;

    #[test]
    fn test_ingest_requires_input() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .arg("ingest")
            .assert()
            .failure()
            .stderr(predicate::str::contains("Nothing to ingest"));
    }

    #[test]
    fn test_ingest_without_api_key_fails_cleanly() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .args(["ingest", "--text", "We decided to ship SSO"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("GOOGLE_GEMINI_API_KEY"));
    }

    #[test]
    fn test_audit_missing_diff_file() {
        let dir = TempDir::new().unwrap();
        shadow_pm(&dir)
            .args(["audit", "--diff-file", "nope.diff", "--repo", "acme/shop", "--change", "4"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Failed to read diff file"));
    }
}
