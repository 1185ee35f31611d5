//! The versioned rule tables.
//!
//! Every table carries [`RULESET_VERSION`]; bump it whenever a rule's pattern
//! or replacement changes so reports from different runs can be told apart.

use std::path::Path;

use crate::core::features::FeatureFlags;
use crate::core::platform::PlatformProfile;
use crate::relocate::pkgconfig;
use crate::relocate::polyglot;
use crate::relocate::rule::{PatchRule, PatchStage, RuleTable, Selector};
use crate::relocate::trust;

pub const RULESET_VERSION: u32 = 2;

const X509_DEF: &str = "crypto/x509/x509_def.c";

const E_OS_INCLUDE: &str = "#include \"internal/e_os.h\"";

const CERT_FILE_ORIGINAL: &str = r#"const char *X509_get_default_cert_file(void)
{
#if defined (_WIN32)
    RUN_ONCE(&openssldir_setup_init, do_openssldir_setup);
    return x509_cert_fileptr;
#else
    return X509_CERT_FILE;
#endif
}"#;

const CERT_FILE_PATCHED: &str = r#"const char *X509_get_default_cert_file(void)
{
#if defined (_WIN32)
    RUN_ONCE(&openssldir_setup_init, do_openssldir_setup);
    return x509_cert_fileptr;
#else
    if (access(X509_CERT_FILE, R_OK) == 0)
        return X509_CERT_FILE;
    /* Auto-detect system certificate bundles */
    static const char *system_cert_files[] = {
        "/etc/ssl/certs/ca-certificates.crt", /* Debian/Ubuntu */
        "/etc/pki/tls/certs/ca-bundle.crt",   /* RHEL/CentOS/Fedora */
        "/etc/ssl/ca-bundle.pem",              /* SUSE */
        "/etc/ssl/cert.pem",                   /* macOS/Alpine */
        NULL
    };
    for (int i = 0; system_cert_files[i] != NULL; i++) {
        if (access(system_cert_files[i], R_OK) == 0)
            return system_cert_files[i];
    }
    return X509_CERT_FILE;
#endif
}"#;

const CERT_DIR_ORIGINAL: &str = r#"const char *X509_get_default_cert_dir(void)
{
#if defined (_WIN32)
    RUN_ONCE(&openssldir_setup_init, do_openssldir_setup);
    return x509_cert_dirptr;
#else
    return X509_CERT_DIR;
#endif
}"#;

const CERT_DIR_PATCHED: &str = r#"const char *X509_get_default_cert_dir(void)
{
#if defined (_WIN32)
    RUN_ONCE(&openssldir_setup_init, do_openssldir_setup);
    return x509_cert_dirptr;
#else
    if (access(X509_CERT_DIR, R_OK) == 0)
        return X509_CERT_DIR;
    /* Auto-detect system certificate directories */
    static const char *system_cert_dirs[] = {
        "/etc/ssl/certs",          /* Debian/Ubuntu/Alpine/SUSE */
        "/etc/pki/tls/certs",      /* RHEL/CentOS/Fedora */
        NULL
    };
    for (int i = 0; system_cert_dirs[i] != NULL; i++) {
        if (access(system_cert_dirs[i], R_OK) == 0)
            return system_cert_dirs[i];
    }
    return X509_CERT_DIR;
#endif
}"#;

/// Crypto library sources: compiled-in trust paths become runtime probes.
pub fn openssl_source() -> RuleTable {
    let unistd = format!("{}\n#include <unistd.h>", E_OS_INCLUDE);
    RuleTable::new("openssl-source", RULESET_VERSION, PatchStage::Source)
        .rule(
            PatchRule::literal("openssl-include-unistd", Selector::glob(X509_DEF), E_OS_INCLUDE, unistd.clone())
                .guarded_by(unistd),
        )
        .rule(
            PatchRule::literal(
                "openssl-probe-cert-file",
                Selector::glob(X509_DEF),
                CERT_FILE_ORIGINAL,
                CERT_FILE_PATCHED,
            )
            .guarded_by("system_cert_files[]"),
        )
        .rule(
            PatchRule::literal(
                "openssl-probe-cert-dir",
                Selector::glob(X509_DEF),
                CERT_DIR_ORIGINAL,
                CERT_DIR_PATCHED,
            )
            .guarded_by("system_cert_dirs[]"),
        )
}

/// Crypto library install tree.
pub fn openssl_artifact(prefix: &Path) -> RuleTable {
    // The runtime's build cannot pass `--static` to pkg-config.
    RuleTable::new("openssl-artifact", RULESET_VERSION, PatchStage::Artifact)
        .rule(
            PatchRule::literal(
                "openssl-join-libs-private",
                Selector::glob("lib/pkgconfig/libcrypto.pc"),
                "\nLibs.private:",
                "",
            )
            .conditional(),
        )
        .extend(pkgconfig::relocation_rules(
            Selector::glob(pkgconfig::DESCRIPTOR_GLOB),
            Some(prefix),
        ))
}

/// Compression library install tree.
pub fn zlib_artifact(prefix: &Path) -> RuleTable {
    RuleTable::new("zlib-artifact", RULESET_VERSION, PatchStage::Artifact).extend(
        pkgconfig::relocation_rules(Selector::glob(pkgconfig::DESCRIPTOR_GLOB), Some(prefix)),
    )
}

/// Compiler names recorded in the runtime's generated configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerNames {
    pub cc: String,
    pub cxx: String,
}

impl Default for CompilerNames {
    fn default() -> Self {
        CompilerNames {
            cc: "gcc".to_string(),
            cxx: "g++".to_string(),
        }
    }
}

impl CompilerNames {
    /// Names from `CC`/`CXX`, keeping only the program's file name.
    pub fn from_env(env: &crate::builder::env::Environment) -> Self {
        let base = |v: &str| {
            let program = v.split_whitespace().next().unwrap_or(v);
            Path::new(program)
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| program.to_string())
        };
        let defaults = CompilerNames::default();
        CompilerNames {
            cc: env.get_non_empty("CC").map(base).unwrap_or(defaults.cc),
            cxx: env.get_non_empty("CXX").map(base).unwrap_or(defaults.cxx),
        }
    }
}

fn compiler_rule(id: &str, from: &str, to: &str) -> Option<PatchRule> {
    if from == to || from.is_empty() {
        return None;
    }
    // Whole words inside quoted config values only, so `gcc` never eats
    // `gcc-ar`. A leading directory goes with the name.
    let pattern = format!(r#"(^|[\s"])(?:/[^\s"]*/)?{}([\s"]|$)"#, regex::escape(from));
    Some(
        PatchRule::regex(id, Selector::glob("lib/ruby/*/*/rbconfig.rb"), format!("(?m){}", pattern), format!("${{1}}{}${{2}}", to))
            .conditional(),
    )
}

/// Runtime install tree.
pub fn ruby_artifact(
    profile: &PlatformProfile,
    features: &FeatureFlags,
    prefix: &Path,
    compilers: &CompilerNames,
) -> RuleTable {
    let mut table = RuleTable::new("ruby-artifact", RULESET_VERSION, PatchStage::Artifact)
        .rule(polyglot::marker_rule());

    if profile.is_linux() {
        let rbconfig = Selector::glob("lib/ruby/*/*/rbconfig.rb");
        // `CONFIG["AR"] = "gcc-ar-11"` becomes `CONFIG["AR"] = "ar"`.
        table = table.rule(
            PatchRule::regex(
                "rbconfig-unversioned-tools",
                rbconfig.clone(),
                r#"(CONFIG\[".+"\] = )"gcc-(.*)-\d+""#,
                r#"${1}"${2}""#,
            )
            .conditional(),
        );
        table = table.extend(compiler_rule("rbconfig-generic-cxx", &compilers.cxx, "c++"));
        table = table.extend(compiler_rule("rbconfig-generic-cc", &compilers.cc, "cc"));
        if !features.jit {
            // The conservative baseline disables the C++ compiler at configure time.
            table = table.rule(
                PatchRule::regex(
                    "rbconfig-restore-cxx",
                    rbconfig,
                    r#"(CONFIG\["CXX"\] = )"false""#,
                    r#"${1}"c++""#,
                )
                .first_only()
                .conditional(),
            );
        }
    }

    let require = "require 'openssl.so'";
    table
        .rule(
            PatchRule::literal(
                "ruby-openssl-trust-fallback",
                Selector::glob("lib/ruby/*/openssl.rb"),
                require,
                format!("{}{}", trust::runtime_fallback_snippet(), require),
            )
            .guarded_by(trust::RUNTIME_FALLBACK_GUARD),
        )
        .extend(pkgconfig::relocation_rules(
            Selector::glob(pkgconfig::DESCRIPTOR_GLOB),
            Some(prefix),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::platform::HostFacts;
    use crate::relocate::rule::RuleOutcome;

    fn linux() -> PlatformProfile {
        PlatformProfile::resolve(&HostFacts::new("linux", "x86_64")).unwrap()
    }

    #[test]
    fn test_all_tables_validate() {
        let prefix = Path::new("/opt/berth/ruby");
        let tables = [
            openssl_source(),
            openssl_artifact(prefix),
            zlib_artifact(prefix),
            ruby_artifact(&linux(), &FeatureFlags::default().without_jit(), prefix, &CompilerNames::default()),
        ];
        for table in &tables {
            assert_eq!(table.version, RULESET_VERSION);
            table.validate().unwrap();
        }
    }

    #[test]
    fn test_x509_rules_are_idempotent() {
        let source = format!(
            "#include \"internal/cryptlib.h\"\n{}\n\n{}\n\n{}\n",
            E_OS_INCLUDE, CERT_FILE_ORIGINAL, CERT_DIR_ORIGINAL
        );
        let table = openssl_source();
        let mut text = source.clone();
        for rule in &table.rules {
            let (patched, outcome) = rule.apply_to_str(&text).unwrap();
            assert!(matches!(outcome, RuleOutcome::Applied { .. }), "{}", rule.id);
            text = patched;
        }
        assert!(text.contains("#include <unistd.h>"));
        assert!(text.contains("/etc/pki/tls/certs/ca-bundle.crt"));

        for rule in &table.rules {
            let (again, outcome) = rule.apply_to_str(&text).unwrap();
            assert_eq!(outcome, RuleOutcome::AlreadyApplied);
            assert_eq!(again, text);
        }
    }

    #[test]
    fn test_rbconfig_generalisation() {
        let table = ruby_artifact(
            &linux(),
            &FeatureFlags::default().without_jit(),
            Path::new("/opt/ruby"),
            &CompilerNames {
                cc: "gcc-11".to_string(),
                cxx: "g++-11".to_string(),
            },
        );
        let mut text = String::from(
            "  CONFIG[\"CC\"] = \"gcc-11\"\n  CONFIG[\"AR\"] = \"gcc-ar-11\"\n  CONFIG[\"CXX\"] = \"false\"\n  CONFIG[\"LDSHARED\"] = \"gcc-11 -shared\"\n",
        );
        for rule in table.rules.iter().filter(|r| r.id.starts_with("rbconfig")) {
            text = rule.apply_to_str(&text).unwrap().0;
        }
        assert!(text.contains("CONFIG[\"CC\"] = \"cc\""));
        assert!(text.contains("CONFIG[\"AR\"] = \"ar\""));
        assert!(text.contains("CONFIG[\"CXX\"] = \"c++\""));
        assert!(text.contains("CONFIG[\"LDSHARED\"] = \"cc -shared\""));
    }

    #[test]
    fn test_rbconfig_absolute_compiler_paths() {
        let table = ruby_artifact(
            &linux(),
            &FeatureFlags::default(),
            Path::new("/opt/ruby"),
            &CompilerNames {
                cc: "gcc-11".to_string(),
                cxx: "g++-11".to_string(),
            },
        );
        let mut text = String::from(
            "  CONFIG[\"CC\"] = \"/usr/bin/gcc-11\"\n  CONFIG[\"CXX\"] = \"/usr/lib/ccache/g++-11\"\n  CONFIG[\"LDSHARED\"] = \"/usr/bin/gcc-11 -shared\"\n  CONFIG[\"CPP\"] = \"/usr/bin/gcc-11-wrapper -E\"\n",
        );
        for rule in table.rules.iter().filter(|r| r.id.starts_with("rbconfig")) {
            text = rule.apply_to_str(&text).unwrap().0;
        }
        assert!(text.contains("CONFIG[\"CC\"] = \"cc\""), "{}", text);
        assert!(text.contains("CONFIG[\"CXX\"] = \"c++\""), "{}", text);
        assert!(text.contains("CONFIG[\"LDSHARED\"] = \"cc -shared\""), "{}", text);
        assert!(text.contains("CONFIG[\"CPP\"] = \"/usr/bin/gcc-11-wrapper -E\""), "{}", text);
    }

    #[test]
    fn test_ruby_artifact_second_pass_is_byte_identical() {
        use crate::relocate::RelocationPatcher;
        use tempfile::TempDir;

        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        let write = |rel: &str, contents: &str| {
            let path = root.join(rel);
            std::fs::create_dir_all(path.parent().unwrap()).unwrap();
            std::fs::write(path, contents).unwrap();
        };
        write(
            "lib/ruby/3.4.0/x86_64-linux/rbconfig.rb",
            "module RbConfig\n  CONFIG = {}\n  CONFIG[\"CC\"] = \"gcc-11\"\n  CONFIG[\"CXX\"] = \"false\"\n  CONFIG[\"AR\"] = \"gcc-ar-11\"\n  CONFIG[\"LDSHARED\"] = \"/usr/bin/gcc-11 -shared\"\nend\n",
        );
        write(
            "lib/ruby/3.4.0/openssl.rb",
            "# frozen_string_literal: true\n\nrequire 'openssl.so'\n\nrequire_relative 'openssl/bn'\n",
        );
        write(
            "bin/gem",
            "#!/bin/sh\n# -*- ruby -*-\n_=_\\\n=begin\nbindir=\"${0%/*}\"\nexec \"$bindir/ruby\" \"-x\" \"$0\" \"$@\"\n=end\n#!/usr/bin/env ruby\n\nrequire 'rubygems'\nGem::GemRunner.new.run ARGV.clone\n",
        );
        let pc = format!(
            "prefix={}\nlibdir=${{prefix}}/lib\nLibs: -L{}/lib -lruby\n",
            root.display(),
            root.display()
        );
        write("lib/pkgconfig/ruby-3.4.pc", &pc);

        let patcher = RelocationPatcher::new().with_table(ruby_artifact(
            &linux(),
            &FeatureFlags::default().without_jit(),
            root,
            &CompilerNames {
                cc: "gcc-11".to_string(),
                cxx: "g++-11".to_string(),
            },
        ));

        let first = patcher.patch(root).unwrap();
        let fired = first.fired();
        for id in [
            "ruby-polyglot-marker",
            "rbconfig-unversioned-tools",
            "rbconfig-generic-cc",
            "rbconfig-restore-cxx",
            "ruby-openssl-trust-fallback",
            "pkgconfig-relative-prefix",
            "pkgconfig-absolute-prefix",
        ] {
            assert!(fired.contains(&id), "{} did not fire: {:?}", id, fired);
        }

        let snapshot: Vec<(std::path::PathBuf, Vec<u8>)> = crate::util::fs::walk_files(root)
            .into_iter()
            .map(|p| {
                let bytes = std::fs::read(&p).unwrap();
                (p, bytes)
            })
            .collect();
        assert_eq!(snapshot.len(), 4);

        let second = patcher.patch(root).unwrap();
        assert!(!second.changed_anything(), "{:?}", second.fired());
        for (path, bytes) in snapshot {
            assert_eq!(std::fs::read(&path).unwrap(), bytes, "{}", path.display());
        }

        let openssl = std::fs::read_to_string(root.join("lib/ruby/3.4.0/openssl.rb")).unwrap();
        assert_eq!(openssl.matches(trust::RUNTIME_FALLBACK_GUARD).count(), 1);
        assert_eq!(openssl.matches("require 'openssl.so'").count(), 1);
    }

    #[test]
    fn test_darwin_skips_rbconfig_rules() {
        let darwin =
            PlatformProfile::resolve(&HostFacts::new("darwin", "arm64")).unwrap();
        let table = ruby_artifact(&darwin, &FeatureFlags::default(), Path::new("/opt/ruby"), &CompilerNames::default());
        assert!(!table.rules.iter().any(|r| r.id.starts_with("rbconfig")));
        assert!(table.rules.iter().any(|r| r.id == "ruby-openssl-trust-fallback"));
    }

    #[test]
    fn test_compiler_names_from_env() {
        let env = crate::builder::env::Environment::from_pairs([("CC", "/usr/bin/gcc-11"), ("CXX", "")]);
        let names = CompilerNames::from_env(&env);
        assert_eq!(names.cc, "gcc-11");
        assert_eq!(names.cxx, "g++");
    }
}
