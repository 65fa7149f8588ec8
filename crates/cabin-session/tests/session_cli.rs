use std::process::Command;

fn session() -> Command {
    Command::new(env!("CARGO_BIN_EXE_cabin-session"))
}

#[test]
fn help_lists_both_roles() {
    let output = session().arg("--help").output().unwrap();
    assert!(output.status.success());
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("keep-alive"));
    assert!(stdout.contains("exec"));
}

#[test]
fn exec_requires_a_command() {
    let output = session()
        .args(["exec", "--user", "root", "--cwd", "/"])
        .output()
        .unwrap();
    assert!(!output.status.success());
}

#[test]
fn exec_rejects_unknown_user() {
    let output = session()
        .args(["exec", "--user", "cabin-no-such-user", "--cwd", "/", "--", "true"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cabin-no-such-user"));
}

#[test]
fn exec_rejects_missing_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("gone");
    let output = session()
        .args(["exec", "--user", "root", "--cwd"])
        .arg(&missing)
        .args(["--", "true"])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("cannot change directory"));
}

#[test]
fn unstartable_command_uses_shell_exit_codes() {
    let output = session()
        .args([
            "exec",
            "--user",
            "root",
            "--cwd",
            "/",
            "--",
            "/cabin/no/such/program",
        ])
        .output()
        .unwrap();
    let code = output.status.code().unwrap();
    assert!(code == 126 || code == 127, "unexpected exit code {code}");
}

#[test]
fn malformed_env_assignment_is_rejected() {
    let output = session()
        .args([
            "exec", "--user", "root", "--cwd", "/", "--env", "NOEQUALS", "--", "true",
        ])
        .output()
        .unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("NAME=VALUE"));
}

fn id_output(args: &[&str]) -> Option<String> {
    let out = Command::new("id").args(args).output().ok()?;
    out.status
        .success()
        .then(|| String::from_utf8_lossy(&out.stdout).trim().to_owned())
}

/// A user listed as a member in /etc/group, so it has a supplementary group.
fn user_with_supplementary_group() -> Option<String> {
    let passwd = std::fs::read_to_string("/etc/passwd").ok()?;
    let in_passwd = |user: &str| passwd.lines().any(|l| l.split(':').next() == Some(user));
    let groups = std::fs::read_to_string("/etc/group").ok()?;
    groups
        .lines()
        .filter_map(|line| line.split(':').nth(3))
        .flat_map(|members| members.split(','))
        .map(str::trim)
        .find(|user| !user.is_empty() && *user != "root" && in_passwd(user))
        .map(str::to_owned)
}

fn sorted_groups(list: &str) -> Vec<u32> {
    let mut groups: Vec<u32> = list.split_whitespace().filter_map(|g| g.parse().ok()).collect();
    groups.sort_unstable();
    groups.dedup();
    groups
}

#[test]
fn exec_keeps_supplementary_groups_of_the_user() {
    // Switching users needs root.
    if id_output(&["-u"]).as_deref() != Some("0") {
        return;
    }
    let Some(user) = user_with_supplementary_group() else {
        return;
    };
    let expected = id_output(&["-G", &user]).unwrap();

    let output = session()
        .args(["exec", "--user", &user, "--cwd", "/", "--", "id", "-G"])
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    assert_eq!(
        sorted_groups(&String::from_utf8_lossy(&output.stdout)),
        sorted_groups(&expected)
    );
}
