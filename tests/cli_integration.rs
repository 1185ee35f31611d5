//! CLI integration tests for berth.
//!
//! These drive the binary the way a package manager would: a dependency
//! manifest on disk, a scratch source tree and an install prefix.

use std::fs;
use std::path::Path;
use std::process::Command;

use assert_cmd::prelude::*;
use predicates::prelude::*;
use tempfile::TempDir;

/// Get the berth binary command, isolated from the user's config.
fn berth(home: &Path) -> Command {
    let mut cmd = Command::cargo_bin("berth").unwrap();
    cmd.env("HOME", home)
        .env_remove("SSL_CERT_FILE")
        .env_remove("BERTH_BASERUBY")
        .env_remove("HOMEBREW_BASERUBY");
    cmd
}

fn temp_dir() -> TempDir {
    TempDir::new().unwrap()
}

/// Write a manifest listing every dependency a Linux runtime build needs.
fn write_linux_ruby_manifest(root: &Path) -> std::path::PathBuf {
    let deps = root.join("deps");
    let mut toml = String::new();
    for (name, version) in [
        ("glibc@2.17", "2.17"),
        ("linux-headers@4.4", "4.4.80"),
        ("portable-libyaml", "0.2.5"),
        ("portable-openssl", "3.5.1"),
        ("pkgconf", "2.5.1"),
        ("portable-libffi", "3.5.1"),
        ("portable-libxcrypt", "4.4.38"),
        ("portable-zlib", "1.3.1"),
    ] {
        let prefix = deps.join(name).join(version);
        fs::create_dir_all(&prefix).unwrap();
        toml.push_str(&format!(
            "[[dependency]]\nname = \"{}\"\nversion = \"{}\"\nprefix = \"{}\"\n\n",
            name,
            version,
            prefix.display()
        ));
    }
    for (gem, version) in [("msgpack", "1.8.0"), ("bootsnap", "1.18.6")] {
        let path = root.join(format!("cache/{}-{}.gem", gem, version));
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, b"gem").unwrap();
        toml.push_str(&format!(
            "[[resource]]\nname = \"{}\"\nurl = \"https://rubygems.org/downloads/{}-{}.gem\"\npath = \"{}\"\n\n",
            gem,
            gem,
            version,
            path.display()
        ));
    }

    let manifest = root.join("deps.toml");
    fs::write(&manifest, toml).unwrap();
    manifest
}

// ============================================================================
// berth build --plan
// ============================================================================

#[test]
fn test_build_plan_linux_without_jit_uses_conservative_baseline() {
    let tmp = temp_dir();
    let manifest = write_linux_ruby_manifest(tmp.path());
    let source = tmp.path().join("ruby-3.4.5");
    fs::create_dir_all(&source).unwrap();

    berth(tmp.path())
        .args(["build", "ruby", "--plan", "--no-jit", "--os", "linux", "--arch", "x86_64"])
        .arg("--deps")
        .arg(&manifest)
        .arg("--source")
        .arg(&source)
        .arg("--prefix")
        .arg(tmp.path().join("out/3.4.5"))
        .env("BERTH_BASERUBY", "/usr/bin/ruby")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"conservative\""))
        .stdout(predicate::str::contains("--with-baseruby=/usr/bin/ruby"))
        .stdout(predicate::str::contains("ac_cv_lib_z_uncompress=no"))
        .stdout(predicate::str::contains("--enable-yjit").not());

    // Planning never touches the prefix.
    assert!(!tmp.path().join("out").exists());
}

#[test]
fn test_build_plan_zlib_is_static() {
    let tmp = temp_dir();
    let manifest = write_linux_ruby_manifest(tmp.path());
    let source = tmp.path().join("zlib-1.3.1");
    fs::create_dir_all(&source).unwrap();

    berth(tmp.path())
        .args(["build", "zlib", "--plan", "--os", "linux", "--arch", "x86_64", "-j", "4"])
        .arg("--deps")
        .arg(&manifest)
        .arg("--source")
        .arg(&source)
        .arg("--prefix")
        .arg(tmp.path().join("out"))
        .assert()
        .success()
        .stdout(predicate::str::contains("--static"))
        .stdout(predicate::str::contains("-j4"));
}

#[test]
fn test_build_missing_dependency_fails() {
    let tmp = temp_dir();
    let manifest = tmp.path().join("deps.toml");
    fs::write(&manifest, "").unwrap();
    let source = tmp.path().join("src");
    fs::create_dir_all(&source).unwrap();

    berth(tmp.path())
        .args(["build", "ruby", "--plan", "--os", "linux", "--arch", "x86_64"])
        .arg("--deps")
        .arg(&manifest)
        .arg("--source")
        .arg(&source)
        .arg("--prefix")
        .arg(tmp.path().join("out"))
        .env("BERTH_BASERUBY", "/usr/bin/ruby")
        .assert()
        .failure()
        .stderr(predicate::str::contains("requires `portable-libyaml`"));
}

#[test]
fn test_build_unknown_package_fails() {
    let tmp = temp_dir();

    berth(tmp.path())
        .args(["build", "python", "--plan", "--source", "src", "--prefix", "out"])
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("python"));
}

#[test]
fn test_build_unsupported_platform_fails() {
    let tmp = temp_dir();
    let manifest = write_linux_ruby_manifest(tmp.path());

    berth(tmp.path())
        .args(["build", "zlib", "--plan", "--os", "windows", "--arch", "x86_64"])
        .arg("--deps")
        .arg(&manifest)
        .args(["--source", "src", "--prefix", "out"])
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("cannot build portable packages"));
}

// ============================================================================
// berth platform
// ============================================================================

#[test]
fn test_platform_linux_arm64() {
    let tmp = temp_dir();

    berth(tmp.path())
        .args(["platform", "--os", "linux", "--arch", "aarch64"])
        .assert()
        .success()
        .stdout(predicate::str::contains("linux-aarch64"))
        .stdout(predicate::str::contains("glibc"));
}

#[test]
fn test_platform_json() {
    let tmp = temp_dir();

    let output = berth(tmp.path())
        .args(["platform", "--json", "--os", "darwin", "--arch", "arm64"])
        .output()
        .unwrap();
    assert!(output.status.success());

    let json: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(json["word_size"], 64);
    assert_eq!(json["minimum_os"]["kind"], "macos");
}

// ============================================================================
// berth patch / export
// ============================================================================

#[test]
fn test_patch_relocates_descriptor_and_is_idempotent() {
    let tmp = temp_dir();
    let prefix = tmp.path().join("zlib/1.3.1");
    fs::create_dir_all(prefix.join("lib/pkgconfig")).unwrap();
    fs::write(
        prefix.join("lib/pkgconfig/zlib.pc"),
        format!(
            "prefix={}\nlibdir=${{prefix}}/lib\n\nName: zlib\nLibs: -L${{libdir}} -lz\n",
            prefix.display()
        ),
    )
    .unwrap();

    berth(tmp.path())
        .args(["patch", "zlib", "--os", "linux", "--arch", "x86_64"])
        .arg("--prefix")
        .arg(&prefix)
        .current_dir(tmp.path())
        .assert()
        .success();

    let pc = fs::read_to_string(prefix.join("lib/pkgconfig/zlib.pc")).unwrap();
    assert!(pc.starts_with("prefix=${pcfiledir}/../.."));

    berth(tmp.path())
        .args(["patch", "zlib", "--os", "linux", "--arch", "x86_64"])
        .arg("--prefix")
        .arg(&prefix)
        .current_dir(tmp.path())
        .assert()
        .success()
        .stderr(predicate::str::contains("already relocated"));
}

#[test]
fn test_export_requires_manifest() {
    let tmp = temp_dir();

    berth(tmp.path())
        .args(["export", "ruby", "--prefix", "out", "--deps", "missing.toml"])
        .current_dir(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("missing.toml"));
}

// ============================================================================
// berth pack / trust / completions
// ============================================================================

#[test]
fn test_pack_prints_checksum() {
    let tmp = temp_dir();
    let prefix = tmp.path().join("zlib");
    fs::create_dir_all(prefix.join("lib")).unwrap();
    fs::write(prefix.join("lib/libz.a"), b"!<arch>\n").unwrap();

    berth(tmp.path())
        .args(["pack", "zlib", "--os", "linux", "--arch", "x86_64"])
        .arg("--prefix")
        .arg(&prefix)
        .arg("--output")
        .arg(tmp.path().join("dist"))
        .assert()
        .success()
        .stdout(predicate::str::is_match("^[0-9a-f]{64}  ").unwrap());

    assert!(tmp
        .path()
        .join("dist/portable-zlib-1.3.1.x86_64-linux.tar.gz")
        .is_file());
}

#[test]
fn test_trust_honours_override() {
    let tmp = temp_dir();

    berth(tmp.path())
        .arg("trust")
        .env("SSL_CERT_FILE", "/custom/cert.pem")
        .assert()
        .success()
        .stdout(predicate::str::contains("override /custom/cert.pem"));
}

#[test]
fn test_completions_bash() {
    let tmp = temp_dir();

    berth(tmp.path())
        .args(["completions", "bash"])
        .assert()
        .success()
        .stdout(predicate::str::contains("berth"));
}

#[test]
fn test_invalid_color_choice() {
    let tmp = temp_dir();

    berth(tmp.path())
        .args(["--color", "sometimes", "platform"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid color choice"));
}
