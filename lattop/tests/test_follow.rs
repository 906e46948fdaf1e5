use std::io::Write;
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// `--duration` must end a follow session even when the input stays silent.
#[test]
fn test_follow_duration_ends_idle_session() {
    let mut child = Command::new(env!("CARGO_BIN_EXE_lattop"))
        .args(["-", "--follow", "--duration", "1", "--interval", "30", "--quiet"])
        .stdin(Stdio::piped())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()
        .unwrap();

    // Keep stdin open so end of input can't be what stops it
    let mut stdin = child.stdin.take().unwrap();
    stdin
        .write_all(b"{\"event\":\"sleep\",\"tid\":5,\"ts\":0,\"stack\":[16]}\n")
        .unwrap();
    stdin.flush().unwrap();

    let started = Instant::now();
    let status = loop {
        if let Some(status) = child.try_wait().unwrap() {
            break Some(status);
        }
        if started.elapsed() > Duration::from_secs(10) {
            break None;
        }
        std::thread::sleep(Duration::from_millis(50));
    };

    let Some(status) = status else {
        child.kill().unwrap();
        panic!("follow session outlived its duration");
    };
    assert!(status.success());
    drop(stdin);
}
