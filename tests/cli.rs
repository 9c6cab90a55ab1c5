use nix::sys::resource::{setrlimit, Resource};
use nix::sys::signal::{kill, Signal};
use nix::unistd::Pid;
use std::io::{BufRead, BufReader};
use std::os::unix::fs::PermissionsExt;
use std::os::unix::process::{CommandExt, ExitStatusExt};
use std::process::{Command, Output, Stdio};

fn sigbridge(dir: &tempfile::TempDir) -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sigbridge"));
    cmd.arg("--config")
        .arg(dir.path().join("sigbridge.toml"))
        .env_remove("SIGNAL_SHOW_INFO")
        .env_remove("GDBSERVER_PORT")
        .env_remove("RUST_LOG");
    // SAFETY: setrlimit is async-signal-safe.
    unsafe {
        cmd.pre_exec(|| {
            setrlimit(Resource::RLIMIT_CORE, 0, 0)?;
            Ok(())
        });
    }
    cmd
}

fn crash(kind: &str, envs: &[(&str, &str)]) -> Output {
    let dir = tempfile::tempdir().unwrap();
    sigbridge(&dir)
        .args(["crash", "--kind", kind])
        .envs(envs.iter().copied())
        .output()
        .unwrap()
}

fn assert_full_report(stderr: &str, signo: i32) {
    assert!(stderr.starts_with("PROCESS: "), "stderr: {stderr}");
    assert!(
        stderr.contains(&format!("\nSIGNAL: {signo}, ADDR ")),
        "stderr: {stderr}"
    );
    for marker in [
        "\nLEGATO VERSION\n",
        "\nPROCESS COMMAND LINE\n",
        "\nPROCESS MAP\n",
        "\nBACKTRACE\n",
    ] {
        assert!(stderr.contains(marker), "missing {marker:?} in: {stderr}");
    }
    assert!(stderr.trim_end().ends_with("DONE"), "stderr: {stderr}");
}

#[test]
fn test_null_deref_produces_report_and_dies_by_segv() {
    let out = crash("null-deref", &[]);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_full_report(&stderr, libc::SIGSEGV);
    assert!(stderr.contains("ILLEGAL ADDRESS 0x10\n"), "stderr: {stderr}");
    assert!(stderr.contains("crash --kind null-deref"), "stderr: {stderr}");
    assert_eq!(out.status.signal(), Some(libc::SIGSEGV));
}

#[test]
fn test_raised_segv_dies_by_segv() {
    let out = crash("segv", &[]);
    assert_full_report(&String::from_utf8_lossy(&out.stderr), libc::SIGSEGV);
    assert_eq!(out.status.signal(), Some(libc::SIGSEGV));
}

#[test]
fn test_abort_report_has_zero_address() {
    let out = crash("abort", &[]);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert_full_report(&stderr, libc::SIGABRT);
    assert!(stderr.contains("SIGNAL: 6, ADDR 0x0, AT "), "stderr: {stderr}");
    assert!(stderr.contains("\nABORT\n"), "stderr: {stderr}");
    assert_eq!(out.status.signal(), Some(libc::SIGABRT));
}

#[test]
fn test_each_fatal_signal_is_reported_then_reraised() {
    for (kind, signo) in [
        ("bus", libc::SIGBUS),
        ("ill", libc::SIGILL),
        ("fpe", libc::SIGFPE),
        ("trap", libc::SIGTRAP),
    ] {
        let out = crash(kind, &[]);
        assert_full_report(&String::from_utf8_lossy(&out.stderr), signo);
        assert_eq!(out.status.signal(), Some(signo), "kind {kind}");
    }
}

#[test]
fn test_disabled_diagnostics_print_no_report() {
    for (kind, signo) in [("null-deref", libc::SIGSEGV), ("bus", libc::SIGBUS)] {
        let out = crash(kind, &[("SIGNAL_SHOW_INFO", "disable")]);
        let stderr = String::from_utf8_lossy(&out.stderr);
        assert!(!stderr.contains("PROCESS:"), "stderr: {stderr}");
        assert_eq!(out.status.signal(), Some(signo), "kind {kind}");
    }
}

#[test]
fn test_gdbserver_is_attached_and_awaited_before_reraise() {
    let dir = tempfile::tempdir().unwrap();
    let bin = dir.path().join("bin");
    std::fs::create_dir(&bin).unwrap();
    let record = dir.path().join("gdbserver.args");
    let script = bin.join("gdbserver");
    std::fs::write(
        &script,
        format!(
            "#!/bin/sh\necho \"$@\" > '{0}'\nsleep 1\necho waited >> '{0}'\n",
            record.display()
        ),
    )
    .unwrap();
    std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

    let path = match std::env::var_os("PATH") {
        Some(path) => format!("{}:{}", bin.display(), path.to_string_lossy()),
        None => bin.display().to_string(),
    };
    let child = sigbridge(&dir)
        .env("PATH", path)
        .env("GDBSERVER_PORT", "2345")
        .args(["crash", "--kind", "null-deref"])
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    let pid = child.id();
    let out = child.wait_with_output().unwrap();

    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("\nDONE\n"), "stderr: {stderr}");
    assert_eq!(
        std::fs::read_to_string(&record).unwrap(),
        format!(":2345 --attach {pid}\nwaited\n")
    );
    assert_eq!(out.status.signal(), Some(libc::SIGSEGV));
}

#[test]
fn test_bad_port_in_config_only_disables_gdbserver() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("sigbridge.toml"),
        "[diagnostics]\ngdbserver_port = -1\n",
    )
    .unwrap();
    let out = sigbridge(&dir)
        .args(["register", "--signal", "USR1"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stderr).contains("GDBSERVER_PORT=-1"));
    assert_eq!(String::from_utf8_lossy(&out.stdout), "registered SIGUSR1\n");
}

#[test]
fn test_invalid_gdbserver_port_is_discarded() {
    let out = crash("segv", &[("GDBSERVER_PORT", "nope")]);
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("GDBSERVER_PORT=nope"), "stderr: {stderr}");
    assert!(stderr.trim_end().ends_with("DONE"), "stderr: {stderr}");
    assert_eq!(out.status.signal(), Some(libc::SIGSEGV));
}

#[test]
fn test_register_reserved_signal_aborts() {
    let dir = tempfile::tempdir().unwrap();
    let out = sigbridge(&dir)
        .env("SIGNAL_SHOW_INFO", "no")
        .args(["register", "--signal", "SIGKILL"])
        .output()
        .unwrap();
    let stderr = String::from_utf8_lossy(&out.stderr);
    assert!(stderr.contains("SIGKILL"), "stderr: {stderr}");
    assert!(stderr.contains("not allowed"), "stderr: {stderr}");
    assert_eq!(out.status.signal(), Some(libc::SIGABRT));
}

#[test]
fn test_register_ordinary_signal() {
    let dir = tempfile::tempdir().unwrap();
    let out = sigbridge(&dir)
        .args(["register", "--signal", "USR2"])
        .output()
        .unwrap();
    assert!(out.status.success());
    assert_eq!(String::from_utf8_lossy(&out.stdout), "registered SIGUSR2\n");
}

#[test]
fn test_check_config_reads_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(
        dir.path().join("sigbridge.toml"),
        "[diagnostics]\ngdbserver_port = 4321\n",
    )
    .unwrap();
    let out = sigbridge(&dir).arg("check-config").output().unwrap();
    assert!(out.status.success());
    assert!(String::from_utf8_lossy(&out.stdout).contains("4321"));
}

#[test]
fn test_bad_config_exits_with_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("sigbridge.toml"), "[diagnostics\n").unwrap();
    let out = sigbridge(&dir).arg("check-config").output().unwrap();
    assert_eq!(out.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&out.stderr).contains("failed to parse config"));
}

#[test]
fn test_run_dispatches_signals_and_exits_on_term() {
    let dir = tempfile::tempdir().unwrap();
    let mut child = sigbridge(&dir)
        .args(["run", "--log-signal", "USR1"])
        .stdout(Stdio::piped())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();
    let pid = Pid::from_raw(child.id() as i32);
    let mut lines = BufReader::new(child.stdout.take().unwrap()).lines();

    assert_eq!(lines.next().unwrap().unwrap(), "ready");

    kill(pid, Signal::SIGUSR1).unwrap();
    assert_eq!(lines.next().unwrap().unwrap(), "received SIGUSR1");

    kill(pid, Signal::SIGUSR1).unwrap();
    assert_eq!(lines.next().unwrap().unwrap(), "received SIGUSR1");

    kill(pid, Signal::SIGTERM).unwrap();
    let status = child.wait().unwrap();
    assert_eq!(status.code(), Some(0));
}
