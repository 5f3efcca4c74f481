//! Integration tests for lifecycle-cache

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::fs;
    use std::path::Path;
    use tempfile::TempDir;

    const CACHE_METADATA: &str = r#"{
        "buildpacks": [
            {"key": "example/node", "version": "1.0.0",
             "layers": {"deps": {"sha": "sha256:dd", "build": true, "cache": true}}},
            {"key": "other/bp", "version": "1.0.0",
             "layers": {"stale": {"sha": "sha256:ee", "cache": true}}}
        ]
    }"#;

    const GROUP: &str = r#"
[[group]]
id = "example/node"
version = "1.0.0"
api = "0.9"
"#;

    /// Run the binary with a config file that does not exist, so the
    /// user's own config never leaks into a test
    fn lifecycle_cache(config_dir: &TempDir) -> Command {
        let mut cmd = cargo_bin_cmd!("lifecycle-cache");
        cmd.env("LIFECYCLE_CACHE_CONFIG", config_dir.path().join("config.toml"));
        cmd
    }

    fn committed_cache(root: &Path, metadata: &str, blobs: &[(&str, &[u8])]) {
        let committed = root.join("committed");
        fs::create_dir_all(&committed).unwrap();
        fs::write(
            committed.join("io.buildpacks.lifecycle.cache.metadata"),
            metadata,
        )
        .unwrap();
        for (digest, content) in blobs {
            fs::write(committed.join(format!("{digest}.tar")), content).unwrap();
        }
    }

    #[test]
    fn help_displays() {
        let config = TempDir::new().unwrap();
        lifecycle_cache(&config)
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("Buildpacks build cache tooling"));
    }

    #[test]
    fn version_displays() {
        let config = TempDir::new().unwrap();
        lifecycle_cache(&config)
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("lifecycle-cache"));
    }

    #[test]
    fn config_path() {
        let config = TempDir::new().unwrap();
        lifecycle_cache(&config)
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let config = TempDir::new().unwrap();
        lifecycle_cache(&config)
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[restore]"));
    }

    #[test]
    fn config_init_writes_file() {
        let config = TempDir::new().unwrap();
        lifecycle_cache(&config)
            .args(["config", "init"])
            .assert()
            .success();
        assert!(config.path().join("config.toml").is_file());

        lifecycle_cache(&config)
            .args(["config", "init"])
            .assert()
            .success()
            .stdout(predicate::str::contains("--force"));
    }

    #[test]
    fn inspect_missing_cache() {
        let config = TempDir::new().unwrap();
        lifecycle_cache(&config)
            .args(["inspect", "/nonexistent/lifecycle-cache"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Cache directory not found"));
    }

    #[test]
    fn inspect_lists_layers() {
        let config = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        committed_cache(cache.path(), CACHE_METADATA, &[("sha256:dd", b"deps")]);

        lifecycle_cache(&config)
            .arg("inspect")
            .arg(cache.path())
            .args(["--format", "plain"])
            .assert()
            .success()
            .stdout(predicate::str::contains("example/node:deps sha256:dd"));
    }

    #[test]
    fn inspect_json() {
        let config = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        committed_cache(cache.path(), CACHE_METADATA, &[]);

        lifecycle_cache(&config)
            .arg("inspect")
            .arg(cache.path())
            .args(["--format", "json"])
            .assert()
            .success()
            .stdout(predicate::str::contains("\"present\": false"));
    }

    #[test]
    fn verify_reports_corrupt_blob() {
        let config = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        committed_cache(
            cache.path(),
            "{}",
            &[(
                "sha256:0000000000000000000000000000000000000000000000000000000000000000",
                b"not what the digest says",
            )],
        );

        lifecycle_cache(&config)
            .arg("verify")
            .arg(cache.path())
            .assert()
            .failure()
            .stderr(predicate::str::contains("failed verification"));
    }

    #[test]
    fn restore_from_volume_cache() {
        let config = TempDir::new().unwrap();
        let cache = TempDir::new().unwrap();
        let layers = TempDir::new().unwrap();
        committed_cache(cache.path(), CACHE_METADATA, &[]);
        let group = layers.path().join("group.toml");
        fs::write(&group, GROUP).unwrap();

        lifecycle_cache(&config)
            .arg("restore")
            .arg("--layers")
            .arg(layers.path())
            .arg("--group")
            .arg(&group)
            .arg("--cache-dir")
            .arg(cache.path())
            .assert()
            .success()
            .stdout(predicate::str::contains("Restored 1 layer(s)"));

        assert!(layers.path().join("example_node/deps.toml").is_file());
        assert_eq!(
            fs::read_to_string(layers.path().join("example_node/deps.sha")).unwrap(),
            "sha256:dd"
        );
        assert!(!layers.path().join("other_bp").exists());
    }

    #[test]
    fn restore_rejects_bad_platform_api() {
        let config = TempDir::new().unwrap();
        let layers = TempDir::new().unwrap();
        let group = layers.path().join("group.toml");
        fs::write(&group, GROUP).unwrap();

        lifecycle_cache(&config)
            .arg("restore")
            .arg("--layers")
            .arg(layers.path())
            .arg("--group")
            .arg(&group)
            .args(["--platform-api", "latest"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid API version"));
    }
}
