use std::fs;
use std::process::Command;

fn spikebatch() -> Command {
    Command::new(env!("CARGO_BIN_EXE_spikebatch"))
}

#[test]
fn test_stdout_carries_only_digests() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("abc.txt"), b"abc").unwrap();
    let report = tmp.path().join("report.csv");

    let output = spikebatch()
        .args(["checksum", "--no-progress", "--report"])
        .arg(&report)
        .arg(&data)
        .output()
        .unwrap();
    assert!(
        output.status.success(),
        "stderr={}",
        String::from_utf8_lossy(&output.stderr)
    );

    let stdout = String::from_utf8_lossy(&output.stdout);
    let lines: Vec<&str> = stdout.lines().collect();
    assert_eq!(lines.len(), 1, "stdout={stdout}");
    assert!(lines[0].starts_with(
        "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad  "
    ));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Report written to"));
    assert!(report.exists());
}

#[test]
fn test_status_messages_go_to_stderr() {
    let tmp = tempfile::tempdir().unwrap();
    let data = tmp.path().join("data");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("a.txt"), b"a").unwrap();
    let digests = tmp.path().join("sums.txt");
    let out_dir = tmp.path().join("packs");

    let output = spikebatch()
        .args(["checksum", "--no-progress", "-o"])
        .arg(&digests)
        .arg(&data)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty(), "stdout={}", String::from_utf8_lossy(&output.stdout));
    assert!(String::from_utf8_lossy(&output.stderr).contains("checksum(s) written to"));

    let output = spikebatch()
        .args(["pack", "--no-progress", "--out-dir"])
        .arg(&out_dir)
        .arg(&data)
        .output()
        .unwrap();
    assert!(output.status.success());
    assert!(output.stdout.is_empty(), "stdout={}", String::from_utf8_lossy(&output.stdout));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Packed 1 file(s)"));
}
