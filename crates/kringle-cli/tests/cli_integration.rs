use std::ffi::OsStr;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};
use std::time::{SystemTime, UNIX_EPOCH};

use serde_json::Value;

const PAIR_ROSTER: &str = r#"{
    "active_members": [
        {"name": "Alice", "exclude_group_1": "1"},
        {"name": "Bob", "exclude_group_1": "2"}
    ]
}"#;

const FAMILY_ROSTER: &str = r##"{
    "active_members": [
        {"name": "Alice", "exclude_group_1": "1"},
        {"name": "Bob", "exclude_group_1": "1"},
        {"name": "Carol", "exclude_group_1": "2"},
        {"name": "Dan", "exclude_group_1": "2"},
        {"name": "Erin", "exclude_group_1": "3"},
        {"name": "Fay", "exclude_group_1": "3"},
        {"name": "#Gus", "exclude_group_1": "4"}
    ],
    "preferred_assign": [
        {"giver": "Erin", "receiver": "Alice"},
        {"giver": "Erin", "receiver": "Alice"}
    ],
    "past_assignments": [
        {"giver": "Alice", "receivers": ["Carol"]}
    ]
}"##;

const BLOCKED_ROSTER: &str = r#"{
    "active_members": [
        {"name": "Alice", "exclude_group_1": "X"},
        {"name": "Bob", "exclude_group_1": "X"},
        {"name": "Carol", "exclude_group_1": "Y"}
    ]
}"#;

fn unique_temp_dir(prefix: &str) -> PathBuf {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_else(|err| panic!("clock should be >= UNIX_EPOCH: {err}"))
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("{prefix}-{now}"));
    fs::create_dir_all(&dir)
        .unwrap_or_else(|err| panic!("failed to create temp dir {}: {err}", dir.display()));
    dir
}

fn write_roster(dir: &Path, body: &str) -> PathBuf {
    let path = dir.join("roster.json");
    fs::write(&path, body)
        .unwrap_or_else(|err| panic!("failed to write roster {}: {err}", path.display()));
    path
}

fn path_str(path: &Path) -> &str {
    path.to_str().unwrap_or_else(|| panic!("path should be valid UTF-8: {}", path.display()))
}

fn run_kk<I, S>(args: I) -> Output
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    Command::new(env!("CARGO_BIN_EXE_kk"))
        .args(args)
        .output()
        .unwrap_or_else(|err| panic!("failed to execute kk binary: {err}"))
}

fn stdout_json(output: &Output) -> Value {
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    serde_json::from_str(&stdout)
        .unwrap_or_else(|err| panic!("stdout is not valid JSON: {err}\nstdout:\n{stdout}"))
}

fn run_json<I, S>(args: I) -> Value
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let output = run_kk(args);
    if !output.status.success() {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        panic!(
            "kk command failed (status={}):\nstdout:\n{}\nstderr:\n{}",
            output.status, stdout, stderr
        );
    }
    stdout_json(&output)
}

fn as_str<'a>(value: &'a Value, key: &str) -> &'a str {
    value
        .get(key)
        .and_then(Value::as_str)
        .unwrap_or_else(|| panic!("missing string field `{key}` in payload: {value}"))
}

fn as_u64(value: &Value, key: &str) -> u64 {
    value
        .get(key)
        .and_then(Value::as_u64)
        .unwrap_or_else(|| panic!("missing integer field `{key}` in payload: {value}"))
}

fn read(path: &Path) -> String {
    fs::read_to_string(path)
        .unwrap_or_else(|err| panic!("failed to read {}: {err}", path.display()))
}

#[test]
fn headless_run_writes_tables_and_reports_json() {
    let dir = unique_temp_dir("kk-headless");
    let roster = write_roster(&dir, PAIR_ROSTER);
    let out = dir.join("out");

    let payload = run_json([
        "--file",
        path_str(&roster),
        "--dir",
        path_str(&out),
        "--out",
        "kk_test",
        "--seed",
        "7",
    ]);

    assert_eq!(as_str(&payload, "contract_version"), "cli.v1");
    assert_eq!(as_str(&payload, "status"), "ok");
    assert_eq!(as_u64(&payload, "seed"), 7);
    assert_eq!(as_u64(&payload, "assigned"), 2);

    let result = read(&out.join("kk_test.txt"));
    assert!(result.starts_with("KK Giver KK Receiver\n"));
    let mut pairs: Vec<&str> = result.lines().skip(1).collect();
    pairs.sort_unstable();
    assert_eq!(pairs, vec!["Alice    Bob", "Bob      Alice"]);

    let debug = read(&out.join("kk_test.debug.txt"));
    assert!(debug.starts_with("Name  Phase   Except Possible\n"));
    assert_eq!(debug.lines().count(), 3);
    assert!(!out.join("kk_test.err.txt").exists());
}

#[test]
fn same_seed_reproduces_assignments() {
    let dir = unique_temp_dir("kk-seed");
    let roster = write_roster(&dir, FAMILY_ROSTER);

    let run = |prefix: &str| {
        let output = run_kk([
            "-f",
            path_str(&roster),
            "-d",
            path_str(&dir),
            "-o",
            prefix,
            "-s",
            "20241225",
        ]);
        let payload = stdout_json(&output);
        (output.status.code(), payload)
    };

    let (first_code, first) = run("first");
    let (second_code, second) = run("second");
    assert_eq!(first_code, second_code);
    assert_eq!(first.get("assignments"), second.get("assignments"));
    assert_eq!(
        first.pointer("/error/sender_name"),
        second.pointer("/error/sender_name")
    );

    if first_code == Some(0) {
        assert_eq!(read(&dir.join("first.txt")), read(&dir.join("second.txt")));
        let assignments = first
            .get("assignments")
            .and_then(Value::as_array)
            .unwrap_or_else(|| panic!("assignments should be an array: {first}"));
        assert_eq!(assignments.len(), 6);
        assert!(assignments
            .iter()
            .any(|pair| as_str(pair, "giver") == "Erin" && as_str(pair, "receiver") == "Alice"));
    }
}

#[test]
fn negative_seed_is_accepted_and_replayable() {
    let dir = unique_temp_dir("kk-negative-seed");
    let roster = write_roster(&dir, PAIR_ROSTER);

    let first =
        run_json(["-f", path_str(&roster), "-d", path_str(&dir), "-o", "negative", "-s", "-1"]);
    assert_eq!(as_u64(&first, "seed"), u64::MAX);

    let replay = run_json([
        "-f",
        path_str(&roster),
        "-d",
        path_str(&dir),
        "-o",
        "replay",
        "--seed",
        "18446744073709551615",
    ]);
    assert_eq!(first.get("assignments"), replay.get("assignments"));
    assert_eq!(read(&dir.join("negative.txt")), read(&dir.join("replay.txt")));
}

#[cfg(target_os = "linux")]
#[test]
fn non_utf8_output_dir_is_reported_lossily() {
    use std::ffi::OsString;
    use std::os::unix::ffi::OsStringExt;

    let dir = unique_temp_dir("kk-non-utf8");
    let roster = write_roster(&dir, PAIR_ROSTER);
    let mut out = dir.clone().into_os_string().into_vec();
    out.extend_from_slice(b"/out-\xff");
    let out = PathBuf::from(OsString::from_vec(out));

    let mut args = vec![
        OsString::from("--file"),
        roster.clone().into_os_string(),
        OsString::from("--out"),
        OsString::from("kk_bytes"),
        OsString::from("--seed"),
        OsString::from("4"),
        OsString::from("--dir"),
    ];
    args.push(out.clone().into_os_string());

    let payload = run_json(args);
    assert_eq!(as_str(&payload, "status"), "ok");
    assert!(as_str(&payload, "result_path").contains('\u{FFFD}'), "payload: {payload}");
    assert!(out.join("kk_bytes.txt").exists());
}

#[test]
fn hard_failure_exits_non_zero_and_persists_partial_table() {
    let dir = unique_temp_dir("kk-failure");
    let roster = write_roster(&dir, BLOCKED_ROSTER);

    let output = run_kk([
        "--file",
        path_str(&roster),
        "--dir",
        path_str(&dir),
        "--out",
        "kk_blocked",
        "--seed",
        "3",
    ]);
    assert_eq!(output.status.code(), Some(1));

    let payload = stdout_json(&output);
    assert_eq!(as_str(&payload, "status"), "failed");
    let error = payload.get("error").unwrap_or_else(|| panic!("missing error: {payload}"));
    assert_eq!(as_str(error, "kind"), "zero_possibilities");
    assert_eq!(as_u64(error, "possible"), 0);
    assert_eq!(as_u64(error, "total"), 3);

    let artifact = read(&dir.join("kk_blocked.err.txt"));
    let assigned = usize::try_from(as_u64(error, "assigned")).unwrap_or(usize::MAX);
    assert_eq!(artifact.lines().count(), assigned + 1);
    assert!(!dir.join("kk_blocked.txt").exists());
}

#[test]
fn unreadable_input_fails_before_assignment() {
    let dir = unique_temp_dir("kk-missing");
    let output = run_kk([
        "--file",
        path_str(&dir.join("missing.xlsx")),
        "--dir",
        path_str(&dir),
        "--out",
        "kk_missing",
    ]);

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("failed to generate assignments"), "stderr:\n{stderr}");
    assert!(!dir.join("kk_missing.err.txt").exists());
    assert!(!dir.join("kk_missing.txt").exists());
}

#[test]
fn interactive_mode_prompts_and_prints_table() {
    let dir = unique_temp_dir("kk-interactive");
    let roster = write_roster(&dir, PAIR_ROSTER);
    let answers = format!("{}\n{}\nkk_prompted\n", path_str(&roster), path_str(&dir));

    let mut child = Command::new(env!("CARGO_BIN_EXE_kk"))
        .args(["--gui", "--seed", "1"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|err| panic!("failed to spawn kk binary: {err}"));
    child
        .stdin
        .take()
        .unwrap_or_else(|| panic!("child stdin should be piped"))
        .write_all(answers.as_bytes())
        .unwrap_or_else(|err| panic!("failed to write answers: {err}"));
    let output =
        child.wait_with_output().unwrap_or_else(|err| panic!("failed to wait for kk: {err}"));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(output.status.success(), "stdout:\n{stdout}");
    assert!(stdout.contains("Input file ["), "stdout:\n{stdout}");
    assert!(stdout.contains("Finished generating assignments for \"kk_prompted\""));
    assert!(stdout.contains("KK Giver KK Receiver"));
    assert!(dir.join("kk_prompted.txt").exists());
}

#[test]
fn interactive_mode_stops_after_declined_retry() {
    let dir = unique_temp_dir("kk-interactive-fail");
    let roster = write_roster(&dir, BLOCKED_ROSTER);
    let answers = format!("{}\n{}\nkk_retry\nn\n", path_str(&roster), path_str(&dir));

    let mut child = Command::new(env!("CARGO_BIN_EXE_kk"))
        .args(["-g"])
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap_or_else(|err| panic!("failed to spawn kk binary: {err}"));
    child
        .stdin
        .take()
        .unwrap_or_else(|| panic!("child stdin should be piped"))
        .write_all(answers.as_bytes())
        .unwrap_or_else(|err| panic!("failed to write answers: {err}"));
    let output =
        child.wait_with_output().unwrap_or_else(|err| panic!("failed to wait for kk: {err}"));

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert_eq!(output.status.code(), Some(1), "stdout:\n{stdout}");
    assert!(stdout.contains("Please try again."), "stdout:\n{stdout}");
    assert!(dir.join("kk_retry.err.txt").exists());
}
