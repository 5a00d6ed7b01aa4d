use std::io::Write as _;
use std::process::{Command, Stdio};

fn stm32sim() -> Command {
    Command::new(env!("CARGO_BIN_EXE_stm32sim"))
}

#[test]
fn help_prints_usage_and_exits_zero() {
    let output = stm32sim().arg("--help").output().unwrap();
    assert!(output.status.success());
    let text = String::from_utf8_lossy(&output.stdout);
    assert!(text.contains("Usage"));
    assert!(text.contains("--gdb"));
}

#[test]
fn unknown_flags_exit_one() {
    let output = stm32sim().arg("--bogus").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
    assert!(String::from_utf8_lossy(&output.stderr).contains("Usage"));
}

#[test]
fn missing_firmware_file_exits_one() {
    let output = stm32sim().arg("/nonexistent/firmware.bin").output().unwrap();
    assert_eq!(output.status.code(), Some(1));
}

#[test]
fn quit_leaves_cleanly() {
    let mut child = stm32sim()
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    child
        .stdin
        .as_mut()
        .unwrap()
        .write_all(b"help\nbogus\nquit\n")
        .unwrap();
    let output = child.wait_with_output().unwrap();
    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("stm32> "));
    assert!(stdout.contains("commands:"));
    assert!(String::from_utf8_lossy(&output.stderr).contains("unknown command"));
}

#[test]
fn end_of_input_exits_zero() {
    let output = stm32sim()
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .output()
        .unwrap();
    assert!(output.status.success());
}
