use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::thread;
use std::time::{Duration, Instant};

use stunnel::launcher::{self, HelperLauncher, HelperSettings, TunnelHelper, TunnelRequest};
use stunnel::{
    Established, HookContext, HookError, JobRecord, LaunchError, Plugin, PluginConfig,
    ResolveError, Scheduler, TunnelState, parse_tunnel_option,
};

const RECORD_ARGS: &str = r#"dir=$(dirname "$0")
prev=
for a in "$@"; do
  if [ "$prev" = "-i" ]; then id=$a; fi
  prev=$a
done
printf '%s\n' "$@" > "$dir/calls-$id.tmp"
mv "$dir/calls-$id.tmp" "$dir/calls-$id"
"#;

/// Stub helpers are written once, before any test spawns a process, so no
/// child inherits a script still open for writing.
fn stubs() -> &'static Path {
    static DIR: OnceLock<tempfile::TempDir> = OnceLock::new();
    DIR.get_or_init(|| {
        let dir = tempfile::tempdir().unwrap();
        write_stub(dir.path(), "reports-port", &format!("{RECORD_ARGS}echo 54321\n"));
        write_stub(dir.path(), "keeps-running", "echo 4000\nexec sleep 5\n");
        write_stub(dir.path(), "silent", "exit 0\n");
        write_stub(dir.path(), "stalls", "exec sleep 5\n");
        write_stub(dir.path(), "garbage", "echo not-a-port\n");
        write_stub(dir.path(), "records", RECORD_ARGS);
        write_stub(
            dir.path(),
            "reports-late",
            "trap '' PIPE\nsleep 1\nif echo 5555; then touch \"$(dirname \"$0\")/late-write-delivered\"; fi\n",
        );
        dir
    })
    .path()
}

fn write_stub(dir: &Path, name: &str, body: &str) {
    let path = dir.join(name);
    fs::write(&path, format!("#!/bin/sh\n{body}")).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn helper(name: &str, timeout: Duration) -> HelperLauncher {
    HelperLauncher::new(HelperSettings {
        program: stubs().join(name),
        read_timeout: timeout,
    })
}

fn wait_for_calls(job_ref: &str) -> Vec<String> {
    let path: PathBuf = stubs().join(format!("calls-{job_ref}"));
    let deadline = Instant::now() + Duration::from_secs(5);
    while Instant::now() < deadline {
        if let Ok(contents) = fs::read_to_string(&path) {
            return contents.lines().map(str::to_string).collect();
        }
        thread::sleep(Duration::from_millis(20));
    }
    panic!("helper was never called for {job_ref}");
}

struct Ctx {
    job_id: u32,
    remote: bool,
}

impl HookContext for Ctx {
    fn job_and_step(&self) -> Result<(u32, u32), HookError> {
        Ok((self.job_id, 0))
    }

    fn is_remote(&self) -> bool {
        self.remote
    }
}

struct TwoNodes;

impl Scheduler for TwoNodes {
    fn job_records(&self, job_id: u32) -> Result<Vec<JobRecord>, ResolveError> {
        Ok(vec![JobRecord {
            job_id,
            node_list: Some("nodeA,nodeB".to_string()),
            user_id: 1000,
        }])
    }
}

fn tunnel_plugin() -> Plugin {
    let mut plugin = Plugin::init(PluginConfig::load(["ssh_args=-v|-4"]));
    plugin.process_tunnel_option(Some("8080:80")).unwrap();
    plugin
}

#[test]
fn end_to_end_reports_helper_port() {
    let helper = helper("reports-port", Duration::from_secs(5));
    let ctx = Ctx {
        job_id: 100,
        remote: false,
    };

    let established = tunnel_plugin().local_user_init(&ctx, &TwoNodes, &helper);
    assert_eq!(
        established,
        vec![Established {
            node: "nodeA".to_string(),
            port: 54321
        }]
    );

    let args = wait_for_calls("100.0");
    assert_eq!(
        args,
        vec!["-t", "nodeA", "-i", "100.0", "-L", "8080:80", "-s", "ssh", "-o", "-v -4"]
    );
}

#[test]
fn silent_helper_is_no_port_reported() {
    let spec = parse_tunnel_option(Some("8080:80")).unwrap();
    let result = launcher::launch(
        &helper("silent", Duration::from_secs(5)),
        "nodeA",
        100,
        0,
        &spec,
        &PluginConfig::default(),
    );
    assert!(matches!(result, Err(LaunchError::NoPortReported)));
}

#[test]
fn silent_helper_does_not_fail_local_setup() {
    let ctx = Ctx {
        job_id: 101,
        remote: false,
    };
    let established =
        tunnel_plugin().local_user_init(&ctx, &TwoNodes, &helper("silent", Duration::from_secs(5)));
    assert!(established.is_empty());
}

#[test]
fn unparseable_output_is_no_port_reported() {
    let spec = parse_tunnel_option(Some("1:1")).unwrap();
    let result = launcher::launch(
        &helper("garbage", Duration::from_secs(5)),
        "n1",
        1,
        0,
        &spec,
        &PluginConfig::default(),
    );
    assert!(matches!(result, Err(LaunchError::NoPortReported)));
}

#[test]
fn stalled_helper_times_out() {
    let spec = parse_tunnel_option(Some("8080:80")).unwrap();
    let started = Instant::now();
    let result = launcher::launch(
        &helper("stalls", Duration::from_millis(200)),
        "nodeA",
        102,
        0,
        &spec,
        &PluginConfig::default(),
    );
    assert!(matches!(result, Err(LaunchError::NoPortReported)));
    assert!(started.elapsed() < Duration::from_secs(4));
}

#[test]
fn pipe_is_closed_when_read_times_out() {
    let spec = parse_tunnel_option(Some("8080:80")).unwrap();
    let result = launcher::launch(
        &helper("reports-late", Duration::from_millis(200)),
        "nodeA",
        104,
        0,
        &spec,
        &PluginConfig::default(),
    );
    assert!(matches!(result, Err(LaunchError::NoPortReported)));

    thread::sleep(Duration::from_secs(2));
    assert!(!stubs().join("late-write-delivered").exists());
}

#[test]
fn helper_keeps_running_after_reporting() {
    let spec = parse_tunnel_option(Some("8080:80")).unwrap();
    let request = TunnelRequest {
        node: "nodeA",
        job_id: 103,
        step_id: 0,
        ports: &spec,
    };
    let process = helper("keeps-running", Duration::from_secs(5))
        .connect(&request, &PluginConfig::default())
        .unwrap();

    assert_eq!(process.captured_port, Some(4000));
    assert_eq!(process.state, TunnelState::Running);
    assert!(process.command.contains("-i 103.0"));
}

#[test]
fn missing_helper_is_spawn_failed() {
    let spec = parse_tunnel_option(Some("8080:80")).unwrap();
    let launcher = HelperLauncher::new(HelperSettings {
        program: stubs().join("does-not-exist"),
        read_timeout: Duration::from_secs(1),
    });
    let result = launcher::launch(&launcher, "nodeA", 1, 0, &spec, &PluginConfig::default());
    assert!(matches!(result, Err(LaunchError::SpawnFailed(_))));
}

#[test]
fn remote_exit_runs_teardown() {
    let ctx = Ctx {
        job_id: 200,
        remote: true,
    };
    Plugin::default()
        .exit(&ctx, &helper("records", Duration::from_secs(1)))
        .unwrap();
    assert_eq!(wait_for_calls("200.0"), vec!["-i", "200.0", "-r"]);
}

#[test]
fn local_exit_runs_nothing() {
    let ctx = Ctx {
        job_id: 201,
        remote: false,
    };
    Plugin::default()
        .exit(&ctx, &helper("records", Duration::from_secs(1)))
        .unwrap();
    thread::sleep(Duration::from_millis(200));
    assert!(!stubs().join("calls-201.0").exists());
}
