use std::{
    env, fs,
    process::{self, Command, Output},
};

use libqio::{ControlPlane, SoftDriver};

const CHILD_ENV: &str = "LIBQIO_FATAL_CONFIG_CHILD";

/// Runs inside the re-executed test binary, where the bad config has to take the process down.
#[test]
fn fatal_config_child() {
    let Ok(path) = env::var(CHILD_ENV) else {
        return;
    };
    let _ = ControlPlane::new(path, SoftDriver::new());
    unreachable!("control plane construction must exit on a bad config");
}

/// Writes `doc` to a scratch file and runs [fatal_config_child] on it in a fresh process.
fn run_child(name: &str, doc: &str) -> Output {
    let dir = env::temp_dir().join(format!("libqio-fatal-{}", process::id()));
    fs::create_dir_all(&dir).unwrap();
    let path = dir.join(name);
    fs::write(&path, doc).unwrap();

    Command::new(env::current_exe().unwrap())
        .args(["fatal_config_child", "--exact", "--nocapture", "--test-threads=1"])
        .env(CHILD_ENV, &path)
        .output()
        .unwrap()
}

fn assert_fatal(output: &Output) {
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to parse config"), "stderr: {stderr}");
}

#[test]
fn bad_config_exits_with_status_one() {
    let output = run_child(
        "no-device.yaml",
        "service_units:\n  - - type: NETWORK_Q\nlog_dir: logs\n",
    );
    assert_fatal(&output);
}

#[test]
fn missing_service_units_exits_with_status_one() {
    let output = run_child("no-units.yaml", "log_dir: logs\n");
    assert_fatal(&output);
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("service_units"), "stderr: {stderr}");
}
