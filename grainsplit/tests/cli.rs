use assert_cmd::Command;
use tempfile::TempDir;

fn grainsplit() -> Command {
    Command::cargo_bin("grainsplit").expect("binary builds")
}

#[test]
fn help_lists_subcommands() {
    let output = grainsplit().arg("--help").output().expect("run --help");
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    for subcommand in ["split", "verify", "generate", "scale", "completions"] {
        assert!(stdout.contains(subcommand), "help is missing {subcommand}");
    }
}

#[test]
fn split_requires_arguments() {
    grainsplit().arg("split").assert().failure();
}

#[test]
fn scale_rejects_missing_input() {
    let dir = TempDir::new().expect("tempdir");
    grainsplit()
        .current_dir(dir.path())
        .args(["scale", "missing.table", "out.table"])
        .assert()
        .failure();
}

#[test]
fn scale_rewrites_a_table() {
    let dir = TempDir::new().expect("tempdir");
    std::fs::write(dir.path().join("00000.table"), "filmgrn1\n\tcY 10 20 30\n")
        .expect("write table");

    grainsplit()
        .current_dir(dir.path())
        .args(["scale", "00000.table", "00000_scaled.table", "--scale", "0.8"])
        .assert()
        .success();

    let scaled =
        std::fs::read_to_string(dir.path().join("00000_scaled.table")).expect("read output");
    assert_eq!(scaled, "filmgrn1\n\tcY 8 16 24\n");
}

#[test]
fn completions_write_a_script_without_logging() {
    let dir = TempDir::new().expect("tempdir");
    let output = grainsplit()
        .current_dir(dir.path())
        .args(["completions", "bash"])
        .output()
        .expect("run completions");

    assert!(output.status.success());
    assert!(!output.stdout.is_empty());
    assert!(!dir.path().join("grainsplit.log").exists());
}
