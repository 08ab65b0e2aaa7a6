use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use base64::Engine as _;
use git_junction::config::SizeRange;
use git_junction::identity::Identity;
use git_junction::keys::{self, Algorithm, KeyError, KeyManager, KeyPolicy, KeyTools};

const SHA256: &str = "SHA256:KlCtE6AkJFbMBuEYsqxKYxxp4+O99seWfJLYUvbQolY";
const MD5: &str = "MD5:6e:7c:19:86:95:eb:5e:95:54:28:be:87:77:27:b3:5e";

/// Stands in for `ssh-keygen -l -E <algo> -f <path>`.
fn fake_keygen(dir: &Path, bits: u32) -> PathBuf {
    let script = format!(
        r#"#!/bin/sh
[ "$1" = -l ] && [ "$2" = -E ] && [ "$4" = -f ] || exit 64
read -r kind data comment < "$5" || exit 65
[ "$kind" = ssh-rsa ] || exit 66
case "$3" in
  sha256) echo "{bits} {SHA256} $comment (RSA)" ;;
  md5) echo "{bits} {MD5} $comment (RSA)" ;;
  *) exit 67 ;;
esac
"#
    );
    let path = dir.join(format!("keygen-{bits}"));
    fs::write(&path, script).unwrap();
    fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
    path
}

struct Fixture {
    _root: tempfile::TempDir,
    keys: PathBuf,
    tools: KeyTools,
}

impl Fixture {
    fn new() -> Self {
        let root = tempfile::tempdir().unwrap();
        let keys = root.path().join("keys/alice");
        let tools = KeyTools {
            shell: PathBuf::from("/bin/sh"),
            keygen: fake_keygen(root.path(), 2048).display().to_string(),
            install_keys: None,
        };
        Self {
            _root: root,
            keys,
            tools,
        }
    }

    fn open(&self) -> KeyManager {
        KeyManager::open(&self.keys, alice(), policy(), self.tools.clone()).unwrap()
    }

    fn filenames(&self) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(&self.keys)
            .unwrap()
            .map(|e| e.unwrap().file_name().into_string().unwrap())
            .filter(|n| !n.starts_with('.'))
            .collect();
        names.sort();
        names
    }
}

fn alice() -> Identity {
    Identity::bind("alice", SizeRange::new(3, 32)).unwrap()
}

fn policy() -> KeyPolicy {
    KeyPolicy {
        label_max: 30,
        data_sizes: vec![372, 544, 716],
        bits: SizeRange::new(2048, 16384),
    }
}

fn key_data(seed: u8) -> String {
    base64::engine::general_purpose::STANDARD.encode([seed; 279])
}

#[test]
fn enrolled_key_is_fingerprinted_before_and_after_writing() {
    let fx = Fixture::new();
    let mut manager = fx.open();

    let key = manager.add("laptop", &key_data(1)).unwrap().clone();
    let [sha, md5] = manager.fingerprints(&key).unwrap();
    assert_eq!(sha.algorithm, Algorithm::Sha256);
    assert_eq!(sha.digest, SHA256);
    assert_eq!(md5.digest, MD5);
    assert_eq!(md5.bits, 2048);

    let report = manager.finalize();
    assert!(report.is_clean());

    let manager = fx.open();
    let stored = &manager.keys()[0];
    assert_eq!(stored.storage_filename(), Some(report.written[0].as_str()));
    assert_eq!(manager.fingerprint(stored, Algorithm::Md5).unwrap().digest, MD5);
}

#[test]
fn removal_and_addition_in_one_session() {
    let fx = Fixture::new();
    let mut manager = fx.open();
    for (label, seed) in [("a", 1), ("b", 2), ("c", 3)] {
        manager.add(label, &key_data(seed)).unwrap();
    }
    assert!(manager.finalize().is_clean());

    let mut manager = fx.open();
    manager.remove(1).unwrap();
    manager.add("d", &key_data(4)).unwrap();
    let report = manager.finalize();
    assert!(report.is_clean(), "{:?}", report.failures);
    assert_eq!(report.renamed.len(), 2);

    let names = fx.filenames();
    let prefixes: Vec<_> = names.iter().map(|n| &n[..5]).collect();
    assert_eq!(prefixes, ["01_b_", "02_c_", "03_d_"]);

    let labels: Vec<_> = fx.open().keys().iter().map(|k| k.label.clone()).collect();
    assert_eq!(labels, ["b", "c", "d"]);
}

#[test]
fn tampered_key_is_excluded_and_left_on_disk() {
    let fx = Fixture::new();
    let mut manager = fx.open();
    manager.add("a", &key_data(1)).unwrap();
    manager.add("b", &key_data(2)).unwrap();
    let report = manager.finalize();

    let first = fx.keys.join(&report.written[0]);
    let body = fs::read_to_string(&first).unwrap();
    fs::write(&first, body.replace("alice@a/", "alice@x/")).unwrap();

    let manager = fx.open();
    assert_eq!(manager.keys().len(), 1);
    assert_eq!(manager.keys()[0].label, "b");
    assert_eq!(manager.keys()[0].index, 0);
    assert_eq!(manager.corrupt().len(), 1);
    assert!(matches!(manager.corrupt()[0].error, KeyError::Corrupt { .. }));

    // Finalizing does not rename over or repair the corrupt file.
    let report = manager.finalize();
    assert!(report.failures.is_empty(), "{:?}", report.failures);
    assert_eq!(report.renamed.len(), 1);
    assert!(first.exists());
    assert!(fs::read_to_string(&first).unwrap().contains("alice@x/"));
}

#[test]
fn out_of_range_bits_are_not_trusted() {
    let fx = Fixture::new();
    fs::create_dir_all(&fx.keys).unwrap();
    let tools = KeyTools {
        keygen: fake_keygen(fx.keys.parent().unwrap(), 1024).display().to_string(),
        ..fx.tools.clone()
    };
    let mut manager = KeyManager::open(&fx.keys, alice(), policy(), tools).unwrap();
    let key = manager.add("laptop", &key_data(1)).unwrap().clone();

    for algorithm in Algorithm::ALL {
        assert!(matches!(
            manager.fingerprint(&key, algorithm),
            Err(KeyError::FingerprintUnavailable { .. })
        ));
    }
}

#[test]
fn install_step_gets_identity_and_pid() {
    let fx = Fixture::new();
    let record = fx.keys.parent().unwrap().join("installed");
    let script = fx.keys.parent().unwrap().join("install.sh");
    fs::create_dir_all(&fx.keys).unwrap();
    fs::write(&script, format!("printf '%s\\n' \"$@\" > '{}'\n", record.display())).unwrap();

    let tools = KeyTools {
        install_keys: Some(format!("/bin/sh {}", script.display())),
        ..fx.tools.clone()
    };
    let mut manager = KeyManager::open(&fx.keys, alice(), policy(), tools).unwrap();
    manager.add("laptop", &key_data(1)).unwrap();
    let report = manager.finalize();

    assert!(report.install.is_ok());
    assert_eq!(
        fs::read_to_string(&record).unwrap(),
        format!("alice\n{}\n", std::process::id())
    );
}

#[test]
fn failed_install_still_keeps_written_keys() {
    let fx = Fixture::new();
    let tools = KeyTools {
        install_keys: Some("false".to_string()),
        ..fx.tools.clone()
    };
    let mut manager = KeyManager::open(&fx.keys, alice(), policy(), tools).unwrap();
    manager.add("laptop", &key_data(1)).unwrap();

    let report = manager.finalize();
    assert!(matches!(report.install, Err(KeyError::Install(_))));
    assert!(!report.is_clean());
    assert_eq!(keys::list(&fx.keys, &alice(), &policy()).unwrap().keys.len(), 1);
}

#[test]
fn persisted_key_gets_a_derived_filename_and_can_be_removed() {
    let fx = Fixture::new();
    let mut manager = fx.open();
    manager.add("laptop-1", &key_data(9)).unwrap();

    let written = manager.persist().unwrap();
    assert_eq!(written.len(), 1);
    let name = &written[0];
    assert!(name.starts_with("01_laptop-1_"), "{name}");
    assert!(name.ends_with(".key"), "{name}");
    let stamp = &name["01_laptop-1_".len()..name.len() - ".key".len()];
    let (date, time) = stamp.split_once('_').unwrap();
    assert_eq!(date.split('-').count(), 3);
    assert_eq!(time.split('-').count(), 3);
    assert_eq!(fx.filenames(), written);

    manager.remove(1).unwrap();
    assert!(manager.keys().is_empty());
    assert!(manager.finalize().is_clean());
    assert!(keys::list(&fx.keys, &alice(), &policy()).unwrap().keys.is_empty());
}

#[test]
fn relabelled_filename_is_corrupt() {
    let fx = Fixture::new();
    let mut manager = fx.open();
    manager.add("work", &key_data(1)).unwrap();
    manager.add("home", &key_data(2)).unwrap();
    let written = manager.persist().unwrap();
    drop(manager);

    let edited = written[0].replacen("_work_", "_play_", 1);
    fs::rename(fx.keys.join(&written[0]), fx.keys.join(&edited)).unwrap();

    let listing = keys::list(&fx.keys, &alice(), &policy()).unwrap();
    assert_eq!(listing.keys.len(), 1);
    assert_eq!(listing.keys[0].label, "home");
    assert_eq!(listing.corrupt.len(), 1);
    assert_eq!(listing.corrupt[0].filename, edited);
}
