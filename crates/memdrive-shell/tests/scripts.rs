//! Whole-script runs through the shell.

use std::io::{Cursor, Write};

use memdrive_kernel::{DriveConfig, MemoryDrive};
use memdrive_shell::Shell;

fn run(shell: &Shell, script: &str) -> (String, String, usize) {
    let mut out = Vec::new();
    let mut err = Vec::new();
    let failures = shell
        .run(Cursor::new(script.as_bytes()), &mut out, &mut err)
        .unwrap();
    (
        String::from_utf8(out).unwrap(),
        String::from_utf8(err).unwrap(),
        failures,
    )
}

fn shell() -> Shell {
    Shell::new(MemoryDrive::new(DriveConfig {
        case_sensitive: true,
        ..DriveConfig::default()
    }))
}

#[test]
fn docs_walkthrough() {
    let shell = shell();
    let (out, err, failures) = run(
        &shell,
        "\
# set up
mkdir /docs
write /docs/readme.txt Hello, world!
cat /docs/readme.txt
mv /docs/readme.txt /docs/notes.txt
ls /docs
",
    );
    assert_eq!(failures, 0, "{err}");
    assert!(out.contains("13 bytes"));
    assert!(out.contains("Hello, world!\n"));
    assert!(out.contains("notes.txt"));
    assert!(!out.contains("readme.txt"));
}

#[test]
fn errors_are_reported_and_script_continues() {
    let shell = shell();
    let (_, err, failures) = run(
        &shell,
        "\
mkdir /d
touch /d/f
rmdir /d
bogus
mkdir /e
",
    );
    assert_eq!(failures, 2);
    assert!(err.contains("line 3: directory not empty"), "{err}");
    assert!(err.contains("line 4: unknown command: bogus"), "{err}");
    assert!(shell.drive().exists("/e"));
}

#[test]
fn mv_without_replace_keeps_target() {
    let shell = shell();
    let (out, err, failures) = run(
        &shell,
        "\
write /a first
write /b second
mv /a /b
cat /b
mv /a /b --replace
cat /b
",
    );
    assert_eq!(failures, 1, "{err}");
    assert!(err.contains("already exists"));
    let cats: Vec<&str> = out.lines().filter(|l| !l.ends_with("bytes")).collect();
    assert_eq!(cats, ["second", "first"]);
}

#[test]
fn ls_with_mask_and_truncate() {
    let shell = shell();
    let (out, err, failures) = run(
        &shell,
        "\
write /a.txt aaaa
write /b.rs bbbb
truncate /a.txt 2
ls / *.txt
",
    );
    assert_eq!(failures, 0, "{err}");
    let listing: Vec<&str> = out.lines().filter(|l| l.starts_with('-')).collect();
    assert_eq!(listing.len(), 1);
    assert!(listing[0].ends_with(" 2 a.txt"), "{}", listing[0]);
}

#[test]
fn config_file_drives_shell() {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    writeln!(file, "(case_sensitive: false, cache: Some((block_size: 4)))").unwrap();
    let config = DriveConfig::load(file.path()).unwrap();
    let shell = Shell::new(MemoryDrive::from_config(config));

    let (out, err, failures) = run(
        &shell,
        "\
MKDIR /Docs
Write /docs/README hello block cache
cat /DOCS/readme
stat /docs/readme
df
",
    );
    assert_eq!(failures, 0, "{err}");
    assert!(out.contains("hello block cache\n"));
    assert!(out.contains("size: 17"));
    assert!(out.contains("sector: 512"));
}
