//! Integration tests for attachd

mod cli_tests {
    use assert_cmd::{cargo::cargo_bin_cmd, Command};
    use predicates::prelude::*;
    use std::path::{Path, PathBuf};
    use tempfile::TempDir;

    const TOPOLOGY: &str = r#"
[[nodes]]
name = "node-1"

[[pods]]
name = "db-0"
node = "node-1"
volume = "vol-wanted"

[[attached]]
volume = "vol-released"
node = "node-1"
safe_to_detach = true

[[attached]]
volume = "vol-stuck"
node = "node-1"
"#;

    const CONFIG: &str = r#"
[general]
audit_log = false

[reconciler]
loop_period_ms = 20
max_safe_to_detach_secs = 600

[simulation]
attach_latency_ms = 5
detach_latency_ms = 5
"#;

    struct Workspace {
        dir: TempDir,
    }

    impl Workspace {
        fn new() -> Self {
            let dir = TempDir::new().unwrap();
            std::fs::write(dir.path().join("config.toml"), CONFIG).unwrap();
            std::fs::write(dir.path().join("topology.toml"), TOPOLOGY).unwrap();
            Self { dir }
        }

        fn path(&self, name: &str) -> PathBuf {
            self.dir.path().join(name)
        }

        fn cmd(&self) -> Command {
            attachd_with_config(&self.path("config.toml"))
        }
    }

    fn attachd_with_config(config: &Path) -> Command {
        let mut cmd = cargo_bin_cmd!("attachd");
        cmd.env("ATTACHD_CONFIG", config).env_remove("RUST_LOG");
        cmd
    }

    #[test]
    fn help_displays() {
        cargo_bin_cmd!("attachd")
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains("attach/detach reconciler"));
    }

    #[test]
    fn version_displays() {
        cargo_bin_cmd!("attachd")
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("attachd"));
    }

    #[test]
    fn config_path_honors_env() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "path"])
            .assert()
            .success()
            .stdout(predicate::str::contains("config.toml"));
    }

    #[test]
    fn config_show() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "show"])
            .assert()
            .success()
            .stdout(predicate::str::contains("[reconciler]"))
            .stdout(predicate::str::contains("loop_period_ms = 20"));
    }

    #[test]
    fn config_set_persists() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "set", "reconciler.max_safe_to_detach_secs", "42"])
            .assert()
            .success();

        let saved = std::fs::read_to_string(ws.path("config.toml")).unwrap();
        assert!(saved.contains("max_safe_to_detach_secs = 42"));
    }

    #[test]
    fn config_commands_repair_invalid_file() {
        let ws = Workspace::new();
        std::fs::write(ws.path("config.toml"), "[executor]\nmax_concurrent_operations = 0\n").unwrap();

        ws.cmd()
            .args(["plan", "--topology"])
            .arg(ws.path("topology.toml"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Invalid configuration"));

        ws.cmd()
            .args(["config", "set", "executor.max_concurrent_operations", "4"])
            .assert()
            .success();
        let saved = std::fs::read_to_string(ws.path("config.toml")).unwrap();
        assert!(saved.contains("max_concurrent_operations = 4"));

        std::fs::write(ws.path("config.toml"), "not = [valid").unwrap();
        ws.cmd()
            .args(["config", "init", "--force"])
            .assert()
            .success();
        ws.cmd()
            .args(["plan", "--topology"])
            .arg(ws.path("topology.toml"))
            .assert()
            .success();
    }

    #[test]
    fn config_set_unknown_key() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["config", "set", "vm.name", "x"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("Unknown config key"));
    }

    #[test]
    fn plan_lists_decisions() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["plan", "--topology"])
            .arg(ws.path("topology.toml"))
            .assert()
            .success()
            .stdout(predicate::str::contains("vol-wanted"))
            .stdout(predicate::str::contains("vol-released"))
            .stdout(predicate::str::contains("1 waiting for grace period"));
    }

    #[test]
    fn plan_json_output() {
        let ws = Workspace::new();
        let output = ws
            .cmd()
            .args(["plan", "--format", "json", "--topology"])
            .arg(ws.path("topology.toml"))
            .output()
            .unwrap();
        assert!(output.status.success());

        let parsed: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
        assert_eq!(parsed["summary"]["attach_requested"], 1);
        assert_eq!(parsed["summary"]["detach_requested"], 1);
        assert_eq!(parsed["actions"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn run_converges_within_duration() {
        let ws = Workspace::new();
        let output = ws
            .cmd()
            .args(["run", "--format", "json", "--duration", "1", "--topology"])
            .arg(ws.path("topology.toml"))
            .output()
            .unwrap();
        assert!(output.status.success());

        let stdout = String::from_utf8(output.stdout).unwrap();
        let json_start = stdout.find('[').unwrap();
        let attached: serde_json::Value = serde_json::from_str(&stdout[json_start..]).unwrap();
        let mut volumes: Vec<&str> = attached
            .as_array()
            .unwrap()
            .iter()
            .map(|a| a["volume"].as_str().unwrap())
            .collect();
        volumes.sort();

        // vol-stuck is inside its grace period and stays attached
        assert_eq!(volumes, vec!["vol-stuck", "vol-wanted"]);
    }

    #[test]
    fn run_missing_topology() {
        let ws = Workspace::new();
        ws.cmd()
            .args(["run", "--duration", "1", "--topology"])
            .arg(ws.path("missing.toml"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("reading topology"));
    }

    #[test]
    fn plan_missing_explicit_config() {
        let ws = Workspace::new();
        attachd_with_config(&ws.path("nope.toml"))
            .args(["plan", "--topology"])
            .arg(ws.path("topology.toml"))
            .assert()
            .failure()
            .stderr(predicate::str::contains("Configuration file not found"));
    }
}

mod scenario_tests {
    use attachd::cache::{
        ActualStateOfWorld, EdgeKey, InMemoryActualState, InMemoryDesiredState, NodeName, PodName,
        VolumeName, VolumeSpec,
    };
    use attachd::operation::{DetachReason, RecordingExecutor};
    use attachd::reconciler::Reconciler;
    use std::sync::Arc;
    use std::time::Duration;

    struct World {
        desired: Arc<InMemoryDesiredState>,
        actual: Arc<InMemoryActualState>,
        executor: Arc<RecordingExecutor>,
        reconciler: Reconciler,
    }

    fn world() -> World {
        let desired = Arc::new(InMemoryDesiredState::new());
        let actual = Arc::new(InMemoryActualState::new());
        let executor = Arc::new(RecordingExecutor::new());
        let reconciler = Reconciler::new(
            Duration::from_secs(1),
            Duration::from_secs(5),
            desired.clone(),
            actual.clone(),
            executor.clone(),
        );
        World {
            desired,
            actual,
            executor,
            reconciler,
        }
    }

    fn vol_a_node_1() -> EdgeKey {
        EdgeKey::new(VolumeName::from("volA"), NodeName::from("node1"))
    }

    fn attached(w: &World, safe: bool) {
        let node = NodeName::from("node1");
        w.actual.add_volume_node(&VolumeSpec::new("volA"), &node).unwrap();
        w.actual
            .set_safe_to_detach(&VolumeName::from("volA"), &node, safe)
            .unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn grace_period_then_forced_detach() {
        let w = world();
        attached(&w, false);

        for _ in 0..5 {
            w.reconciler.reconcile();
            assert!(w.executor.detaches().is_empty());
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        w.reconciler.reconcile();
        assert_eq!(
            w.executor.detaches(),
            vec![(vol_a_node_1(), DetachReason::GraceExpired)]
        );
    }

    #[test]
    fn desired_only_edge_attached_every_pass() {
        let w = world();
        let node = NodeName::from("node1");
        w.desired.add_node(node.clone());
        w.desired
            .add_pod(PodName::from("pod"), VolumeSpec::new("volA"), &node)
            .unwrap();

        w.reconciler.reconcile();
        w.reconciler.reconcile();
        assert_eq!(w.executor.attaches(), vec![vol_a_node_1(), vol_a_node_1()]);
    }

    #[test]
    fn safe_actual_only_edge_detached_first_pass() {
        let w = world();
        attached(&w, true);

        w.reconciler.reconcile();
        assert_eq!(
            w.executor.detaches(),
            vec![(vol_a_node_1(), DetachReason::Safe)]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn redesire_cancels_pending_detach() {
        let w = world();
        attached(&w, false);
        w.reconciler.reconcile();
        tokio::time::advance(Duration::from_secs(3)).await;
        w.reconciler.reconcile();

        let node = NodeName::from("node1");
        w.desired.add_node(node.clone());
        w.desired
            .add_pod(PodName::from("pod"), VolumeSpec::new("volA"), &node)
            .unwrap();

        for _ in 0..10 {
            let summary = w.reconciler.reconcile();
            assert_eq!(summary.touched, 1);
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        assert!(w.executor.detaches().is_empty());
    }
}
