//! Tests for settings-file reconciliation.

use std::collections::BTreeMap;
use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::Path;

use hardshell::error::Error;
use hardshell::reconcile::SettingsReconciler;
use pretty_assertions::assert_eq;
use proptest::prelude::*;

const TARGET: &str = "60-hardshell-network.conf";
const DESIRED: &str = "net.ipv4.ip_forward=0";

fn snapshot(dir: &Path) -> BTreeMap<String, String> {
    fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .map(|p| {
            (
                p.file_name().unwrap().to_string_lossy().into_owned(),
                fs::read_to_string(&p).unwrap(),
            )
        })
        .collect()
}

fn uncommented(content: &str) -> Vec<&str> {
    content
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty() && !l.starts_with('#') && !l.starts_with(';'))
        .collect()
}

#[test]
fn test_creates_missing_target() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = SettingsReconciler::new(dir.path());

    let path = reconciler.reconcile(TARGET, DESIRED).unwrap();

    assert_eq!(path, dir.path().join(TARGET));
    assert_eq!(fs::read_to_string(&path).unwrap(), "net.ipv4.ip_forward=0\n");
    let mode = fs::metadata(&path).unwrap().permissions().mode() & 0o777;
    assert_eq!(mode, 0o644);
}

#[test]
fn test_comments_conflicts_across_files() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(
        dir.path().join("10-network-security.conf"),
        "# defaults\nnet.ipv4.ip_forward = 1\nnet.ipv4.tcp_syncookies=1\n",
    )
    .unwrap();
    fs::write(dir.path().join("99-sysctl.conf"), "net.ipv4.ip_forward=0\n").unwrap();
    fs::write(
        dir.path().join(TARGET),
        "net.ipv4.ip_forward=1\nkernel.dmesg_restrict=1",
    )
    .unwrap();
    fs::write(dir.path().join("notes.txt"), "net.ipv4.ip_forward=1\n").unwrap();

    SettingsReconciler::new(dir.path()).reconcile(TARGET, DESIRED).unwrap();
    let files = snapshot(dir.path());

    assert_eq!(
        files["10-network-security.conf"],
        "# defaults\n#net.ipv4.ip_forward = 1\nnet.ipv4.tcp_syncookies=1\n"
    );
    assert_eq!(files["99-sysctl.conf"], "#net.ipv4.ip_forward=0\n");
    assert_eq!(
        files[TARGET],
        "#net.ipv4.ip_forward=1\nkernel.dmesg_restrict=1\nnet.ipv4.ip_forward=0\n"
    );
    // Only files with the configured extension are touched.
    assert_eq!(files["notes.txt"], "net.ipv4.ip_forward=1\n");
}

#[test]
fn test_second_run_is_byte_identical() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("50-default.conf"), "net.ipv4.ip_forward=1\nvm.swappiness=10\n").unwrap();
    let reconciler = SettingsReconciler::new(dir.path());

    reconciler.reconcile(TARGET, DESIRED).unwrap();
    let first = snapshot(dir.path());
    reconciler.reconcile(TARGET, DESIRED).unwrap();
    let second = snapshot(dir.path());

    assert_eq!(first, second);
}

#[test]
fn test_existing_desired_line_kept_in_place() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join(TARGET), "net.ipv4.ip_forward=0\nvm.swappiness=10\n").unwrap();

    SettingsReconciler::new(dir.path()).reconcile(TARGET, DESIRED).unwrap();

    assert_eq!(
        fs::read_to_string(dir.path().join(TARGET)).unwrap(),
        "net.ipv4.ip_forward=0\nvm.swappiness=10\n"
    );
}

#[test]
fn test_preserves_file_mode() {
    let dir = tempfile::tempdir().unwrap();
    let other = dir.path().join("10-other.conf");
    fs::write(&other, "net.ipv4.ip_forward=1\n").unwrap();
    fs::set_permissions(&other, fs::Permissions::from_mode(0o600)).unwrap();

    SettingsReconciler::new(dir.path()).reconcile(TARGET, DESIRED).unwrap();

    assert_eq!(fs::read_to_string(&other).unwrap(), "#net.ipv4.ip_forward=1\n");
    assert_eq!(fs::metadata(&other).unwrap().permissions().mode() & 0o777, 0o600);
}

#[test]
fn test_malformed_desired_line() {
    let dir = tempfile::tempdir().unwrap();
    let reconciler = SettingsReconciler::new(dir.path());

    for bad in ["net.ipv4.ip_forward", "a=b=c", "=0"] {
        assert!(matches!(
            reconciler.reconcile(TARGET, bad),
            Err(Error::MalformedSetting(_))
        ));
    }
    assert!(snapshot(dir.path()).is_empty());
}

#[test]
fn test_custom_extension() {
    let dir = tempfile::tempdir().unwrap();
    fs::write(dir.path().join("a.conf"), "k=1\n").unwrap();
    fs::write(dir.path().join("b.cfg"), "k=1\n").unwrap();

    SettingsReconciler::new(dir.path())
        .with_extension(".cfg")
        .reconcile("hardshell.cfg", "k=2")
        .unwrap();

    let files = snapshot(dir.path());
    assert_eq!(files["a.conf"], "k=1\n");
    assert_eq!(files["b.cfg"], "#k=1\n");
    assert_eq!(files["hardshell.cfg"], "k=2\n");
}

fn setting_line() -> impl Strategy<Value = String> {
    prop_oneof![
        Just("net.ipv4.ip_forward=1".to_string()),
        Just("net.ipv4.ip_forward = 0".to_string()),
        Just("net.ipv4.ip_forward=0".to_string()),
        Just("# net.ipv4.ip_forward=1".to_string()),
        Just("; comment".to_string()),
        Just(String::new()),
        "[a-z]{1,6}\\.[a-z_]{1,8} ?= ?[0-9]{1,3}",
    ]
}

fn file_content() -> impl Strategy<Value = String> {
    (prop::collection::vec(setting_line(), 0..6), any::<bool>()).prop_map(|(lines, newline)| {
        let mut content = lines.join("\n");
        if newline && !content.is_empty() {
            content.push('\n');
        }
        content
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_reconcile_invariants(
        files in prop::collection::btree_map("[a-z]{1,5}", file_content(), 0..4),
        target_content in prop::option::of(file_content()),
    ) {
        let dir = tempfile::tempdir().unwrap();
        for (name, content) in &files {
            fs::write(dir.path().join(format!("{}.conf", name)), content).unwrap();
        }
        if let Some(content) = &target_content {
            fs::write(dir.path().join(TARGET), content).unwrap();
        }
        let before = snapshot(dir.path());
        let reconciler = SettingsReconciler::new(dir.path());

        reconciler.reconcile(TARGET, DESIRED).unwrap();
        let first = snapshot(dir.path());
        reconciler.reconcile(TARGET, DESIRED).unwrap();
        let second = snapshot(dir.path());

        // Idempotent.
        prop_assert_eq!(&first, &second);

        // The desired line is in the target exactly once.
        let target = &first[TARGET];
        prop_assert_eq!(target.lines().filter(|l| l.trim() == DESIRED).count(), 1);

        for (name, after) in &first {
            if name == TARGET {
                continue;
            }
            let original = &before[name];

            // No other file gains uncommented content.
            let now = uncommented(after);
            let was = uncommented(original);
            prop_assert!(now.iter().all(|line| was.contains(line)));

            // Uncommenting restores the original.
            let restored: Vec<String> = after
                .split_inclusive('\n')
                .zip(original.split_inclusive('\n'))
                .map(|(new, old)| if new != old { new[1..].to_string() } else { new.to_string() })
                .collect();
            prop_assert_eq!(restored.concat(), original.clone());
        }
    }
}
