//! portable-ruby: the relocatable Ruby runtime.
//!
//! The runtime links statically against the other portable packages, so the
//! recipe mostly wires dependency prefixes into `./configure`. The fiddly
//! parts are the bundled gem list, the optional YJIT toolchain and the
//! generated `rbconfig.rb`, which records the build machine's compilers.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::builder::env::EnvOverlay;
use crate::builder::plan::{BuildHook, BuildPlan, BuildStep, JitToolchain, Phase};
use crate::core::dependency::Requirement;
use crate::core::errors::PlanningError;
use crate::core::features::FeatureFlags;
use crate::core::package::{PackageContext, PortablePackage};
use crate::core::platform::{OsKind, PlatformProfile};
use crate::ops::verify::checks::{Expectation, FunctionalCheck};
use crate::relocate::rule::RuleTable;
use crate::relocate::rules::{self, CompilerNames};
use crate::relocate::trust::{TrustBundle, OPENSSL_BUNDLE, RUNTIME_BUNDLE};

pub const LIBYAML: &str = "portable-libyaml";
pub const OPENSSL: &str = "portable-openssl";
pub const PKGCONF: &str = "pkgconf";
pub const LIBFFI: &str = "portable-libffi";
pub const LIBXCRYPT: &str = "portable-libxcrypt";
pub const ZLIB: &str = "portable-zlib";

/// Extra gems shipped alongside the bundled set, with the versions used when
/// the manifest does not pin one.
pub const EXTRA_GEMS: &[(&str, &str)] = &[("msgpack", "1.8.0"), ("bootsnap", "1.18.6")];

const SHA256_OF_EMPTY: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

const GEM_LOAD_SCRIPT: &str = r#"Gem.discover_gems_on_require = false
require "portable_ruby_gems"
require "debug"
require "fiddle"
require "bootsnap"
"#;

pub struct Ruby;

impl Ruby {
    /// Arguments for `./configure`.
    pub fn configure_args(&self, ctx: &PackageContext<'_>) -> Result<Vec<String>, PlanningError> {
        let name = self.name();
        let baseruby = ctx
            .toolchain
            .resolve_baseruby(ctx.env)
            .ok_or_else(|| PlanningError::MissingTool {
                tool: "ruby".to_string(),
                hint: "set toolchain.baseruby in berth.toml, or BERTH_BASERUBY, to a Ruby interpreter"
                    .to_string(),
            })?;

        let mut args = vec![
            format!("--prefix={}", ctx.prefix.display()),
            format!("--with-baseruby={}", baseruby.display()),
            "--enable-load-relative".to_string(),
            "--with-out-ext=win32,win32ole".to_string(),
            "--without-gmp".to_string(),
            "--disable-install-doc".to_string(),
            "--disable-install-rdoc".to_string(),
            "--disable-dependency-tracking".to_string(),
        ];
        if ctx.features.jit {
            args.push("--enable-yjit".to_string());
        }

        // OpenSSL is found through pkg-config; `--with-openssl-dir` would bypass it.
        let libyaml = ctx.require(name, LIBYAML)?;
        args.push(format!("--with-libyaml-dir={}", libyaml.prefix.display()));

        if ctx.profile.is_linux() {
            let libffi = ctx.require(name, LIBFFI)?;
            let zlib = ctx.require(name, ZLIB)?;
            args.push(format!("--with-libffi-dir={}", libffi.prefix.display()));
            args.push(format!("--with-zlib-dir={}", zlib.prefix.display()));
            args.push("MKDIR_P=/bin/mkdir -p".to_string());
            // Keeps libruby itself from linking zlib; only the extension needs it.
            args.push("ac_cv_lib_z_uncompress=no".to_string());
        }
        Ok(args)
    }

    /// `name version` lines appended to `gems/bundled_gems`, plus the files to stage.
    fn extra_gems(&self, ctx: &PackageContext<'_>) -> Result<(Vec<String>, Vec<PathBuf>), PlanningError> {
        let mut lines = Vec::new();
        let mut files = Vec::new();
        for (gem, default_version) in EXTRA_GEMS {
            let resource = ctx.resource(self.name(), gem)?;
            let version = resource
                .resolved_version()
                .unwrap_or_else(|| default_version.to_string());
            lines.push(format!("{} {}", gem, version));
            files.push(resource.path.clone());
        }
        Ok((lines, files))
    }

    fn jit_toolchain(&self, ctx: &PackageContext<'_>) -> JitToolchain {
        JitToolchain {
            toolchain: ctx.toolchain.rustup_toolchain().to_string(),
            rustup_home: ["BERTH_RUSTUP_HOME", "HOMEBREW_RUSTUP_HOME"]
                .iter()
                .find_map(|key| ctx.env.get_non_empty(key))
                .map(str::to_string),
            install: !ctx.profile.has_rustc,
        }
    }
}

impl PortablePackage for Ruby {
    fn name(&self) -> &'static str {
        "portable-ruby"
    }

    fn version(&self) -> &'static str {
        "3.4.5"
    }

    fn description(&self) -> &'static str {
        "Powerful, clean, object-oriented scripting language"
    }

    fn requirements(&self, _features: &FeatureFlags) -> Vec<Requirement> {
        vec![
            Requirement::any(LIBYAML),
            Requirement::any(OPENSSL),
            Requirement::any(PKGCONF),
            Requirement::linux(LIBFFI),
            Requirement::linux(LIBXCRYPT),
            Requirement::linux(ZLIB),
        ]
    }

    /// YJIT needs a glibc newer than the baseline, so the baseline only
    /// applies to builds without it.
    fn conservative_baseline(&self, profile: &PlatformProfile, features: &FeatureFlags) -> bool {
        profile.is_linux() && !features.jit
    }

    fn configure_env(&self, ctx: &PackageContext<'_>, env: &mut EnvOverlay) -> Result<(), PlanningError> {
        if ctx.features.jit {
            let jit = self.jit_toolchain(ctx);
            if let Some(home) = jit.rustup_home {
                env.set("RUSTUP_HOME", home);
            }
            env.set("RUSTUP_TOOLCHAIN", jit.toolchain);
        }

        if ctx.profile.is_linux() {
            let libxcrypt = ctx.require(self.name(), LIBXCRYPT)?;
            env.set("XCFLAGS", format!("-I{}", libxcrypt.include_dir().display()))
                .set("XLDFLAGS", format!("-L{}", libxcrypt.lib_dir().display()));
        }

        // configure appends the lower-case variables instead of overriding its own flags.
        env.rename("CFLAGS", "cflags")
            .rename("CPPFLAGS", "cppflags")
            .rename("CXXFLAGS", "cxxflags");
        Ok(())
    }

    fn run_build(&self, ctx: &PackageContext<'_>, plan: &mut BuildPlan) -> Result<(), PlanningError> {
        let args = self.configure_args(ctx)?;
        let (gem_lines, gem_files) = self.extra_gems(ctx)?;

        if ctx.features.jit {
            let jit = self.jit_toolchain(ctx);
            if jit.install {
                plan.push(BuildStep::run(
                    Phase::Prepare,
                    "rustup",
                    ["install", jit.toolchain.as_str(), "--profile", "minimal"],
                ));
            }
            plan.toolchain.jit = Some(jit);
        }

        plan.push(BuildStep::hook(
            Phase::Prepare,
            BuildHook::StageFiles {
                dest: PathBuf::from("gems"),
                files: gem_files,
            },
        ))
        .push(BuildStep::hook(
            Phase::Prepare,
            BuildHook::RewriteBundledGems { extra: gem_lines },
        ))
        .push(BuildStep::run(Phase::Configure, "./configure", args))
        .push(BuildStep::run(Phase::Compile, "make", ["extract-gems"]))
        .push(BuildStep::run(Phase::Compile, "make", Vec::<String>::new()))
        .push(BuildStep::run(Phase::Compile, "make", ["ruby.pc"]))
        .push(BuildStep::hook(Phase::Compile, BuildHook::WriteGemLoadPaths))
        .push(BuildStep::run(Phase::Install, "make", ["install"]));
        Ok(())
    }

    fn artifact_rules(&self, ctx: &PackageContext<'_>) -> RuleTable {
        rules::ruby_artifact(
            ctx.profile,
            &ctx.features,
            ctx.prefix,
            &CompilerNames::from_env(ctx.env),
        )
    }

    /// Copies the crypto library's CA bundle next to the runtime for the
    /// `openssl.rb` fallback.
    fn install_extras(&self, ctx: &PackageContext<'_>) -> Result<Vec<PathBuf>> {
        let openssl = ctx.require(self.name(), OPENSSL)?;
        let bundle = openssl.prefix.join(OPENSSL_BUNDLE);
        let installed = TrustBundle::new(&bundle)
            .install(ctx.prefix, RUNTIME_BUNDLE)
            .with_context(|| format!("{} has no CA bundle", openssl.name))?;
        Ok(vec![installed])
    }

    fn export_deps(&self, os: OsKind) -> Vec<&'static str> {
        match os {
            OsKind::Linux => vec![LIBYAML, OPENSSL, LIBFFI, ZLIB, LIBXCRYPT],
            OsKind::Darwin => vec![LIBYAML, OPENSSL],
        }
    }

    fn verify(&self, _profile: &PlatformProfile) -> Vec<FunctionalCheck> {
        let ruby = |name: &str, args: &[&str], expect: Expectation| {
            FunctionalCheck::bin(name, "bin/ruby", args.iter().copied(), expect)
        };
        let gem = |name: &str, args: &[&str], expect: Expectation| {
            FunctionalCheck::bin(name, "bin/gem", args.iter().copied(), expect)
        };

        vec![
            ruby(
                "version",
                &["-e", "puts RUBY_VERSION"],
                Expectation::Equals(self.version().to_string()),
            ),
            ruby(
                "rbconfig-ruby",
                &["-e", "puts RbConfig.ruby"],
                Expectation::RelocatedPath("bin/ruby".to_string()),
            ),
            ruby(
                "zlib",
                &["-rzlib", "-e", "puts Zlib.crc32(\"test\")"],
                Expectation::Equals(crate::packages::zlib::CRC32_OF_TEST.to_string()),
            ),
            ruby(
                "readline",
                &["-rreadline", "-e", "p Readline.basic_word_break_characters"],
                Expectation::Equals(r#"" \t\n`><=;|&{(""#.to_string()),
            ),
            ruby(
                "yaml",
                &["-ryaml", "-e", "puts YAML.load(\"a: b\")"],
                Expectation::Equals(r#"{"a" => "b"}"#.to_string()),
            ),
            ruby(
                "openssl",
                &["-ropenssl", "-e", "puts OpenSSL::Digest::SHA256.hexdigest(\"\")"],
                Expectation::Equals(SHA256_OF_EMPTY.to_string()),
            ),
            ruby(
                "https",
                &[
                    "-ropen-uri",
                    "-e",
                    "URI.open(\"https://google.com\") { |f| puts f.status.first }",
                ],
                Expectation::Contains("200".to_string()),
            )
            .needs_network(),
            ruby(
                "bundled-gems",
                &["-rrbconfig", "-e", GEM_LOAD_SCRIPT],
                Expectation::Succeeds,
            ),
            gem("gem-environment", &["environment"], Expectation::Succeeds),
            FunctionalCheck::bin("bundle-init", "bin/bundle", ["init"], Expectation::Succeeds),
            gem(
                "native-gem",
                &["install", "--no-document", "byebug"],
                Expectation::Succeeds,
            )
            .needs_network(),
            FunctionalCheck::bin(
                "native-gem-runs",
                "bin/byebug",
                ["--version"],
                Expectation::Contains("byebug".to_string()),
            )
            .needs_network(),
            gem(
                "gem-openssl-headers",
                &["install", "--no-document", "openssl"],
                Expectation::Succeeds,
            )
            .needs_network(),
            gem(
                "gem-libyaml-headers",
                &["install", "--no-document", "psych"],
                Expectation::Succeeds,
            )
            .needs_network(),
            gem(
                "gem-upgrade-executables",
                &["install", "--no-document", "ruby-lsp"],
                Expectation::Succeeds,
            )
            .needs_network(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use std::path::Path;

    use super::*;
    use crate::builder::env::Environment;
    use crate::builder::plan::StepAction;
    use crate::core::dependency::{Dependency, DependencySet};
    use crate::core::manifest::Resource;
    use crate::core::platform::HostFacts;
    use crate::util::config::ToolchainConfig;

    fn linux_deps() -> DependencySet {
        DependencySet::new(vec![
            Dependency::new("portable-libyaml@0.2.5", "0.2.5", "/deps/libyaml"),
            Dependency::new("portable-openssl@3.5.1", "3.5.1", "/deps/openssl"),
            Dependency::new("pkgconf", "2.3.0", "/deps/pkgconf"),
            Dependency::new("portable-libffi@3.5.1", "3.5.1", "/deps/libffi"),
            Dependency::new("portable-libxcrypt@4.4.38", "4.4.38", "/deps/libxcrypt"),
            Dependency::new("portable-zlib@1.3.1", "1.3.1", "/deps/zlib"),
        ])
    }

    fn resources() -> Vec<Resource> {
        vec![
            Resource::new("msgpack", "/cache/msgpack-1.8.0.gem").with_version("1.8.0"),
            Resource::new("bootsnap", "/cache/bootsnap-1.18.6.gem").with_version("1.18.6"),
        ]
    }

    fn toolchain() -> ToolchainConfig {
        ToolchainConfig {
            rustup_toolchain: None,
            baseruby: Some(PathBuf::from("/usr/bin/ruby")),
        }
    }

    fn plan_for(profile: &PlatformProfile, features: FeatureFlags, env: &Environment) -> BuildPlan {
        let deps = linux_deps().for_platform(profile.os);
        let toolchain = toolchain();
        let resources = resources();
        let ctx = PackageContext {
            deps: &deps,
            profile,
            features,
            env,
            toolchain: &toolchain,
            resources: &resources,
            source_dir: Path::new("/scratch/ruby"),
            prefix: Path::new("/out/ruby"),
        };
        let mut plan = BuildPlan::new("portable-ruby", "/scratch/ruby", "/out/ruby");
        Ruby.configure_env(&ctx, &mut plan.env).unwrap();
        Ruby.run_build(&ctx, &mut plan).unwrap();
        plan
    }

    #[test]
    fn test_linux_without_jit() {
        let profile = PlatformProfile::resolve(&HostFacts::new("linux", "x86_64")).unwrap();
        let env = Environment::from_pairs([("CFLAGS", "-O2 -fPIC")]);
        let plan = plan_for(&profile, FeatureFlags::default().without_jit(), &env);

        let args = plan.configure_args();
        assert!(args.contains(&"--with-baseruby=/usr/bin/ruby".to_string()));
        assert!(!args.contains(&"--enable-yjit".to_string()));
        assert!(args.contains(&"--with-libffi-dir=/deps/libffi".to_string()));
        assert!(args.contains(&"--with-zlib-dir=/deps/zlib".to_string()));
        assert!(args.contains(&"MKDIR_P=/bin/mkdir -p".to_string()));
        assert!(args.contains(&"ac_cv_lib_z_uncompress=no".to_string()));
        assert!(plan.toolchain.jit.is_none());

        let applied = plan.env.apply(&env);
        assert_eq!(applied.get("cflags"), Some("-O2 -fPIC"));
        assert!(!applied.contains("CFLAGS"));
        assert_eq!(applied.get("XCFLAGS"), Some("-I/deps/libxcrypt/include"));
        assert_eq!(applied.get("XLDFLAGS"), Some("-L/deps/libxcrypt/lib"));

        let hooks: Vec<&str> = plan
            .steps
            .iter()
            .filter_map(|s| match &s.action {
                StepAction::Hook(h) => Some(h.name()),
                _ => None,
            })
            .collect();
        assert_eq!(hooks, ["stage-files", "rewrite-bundled-gems", "write-gem-load-paths"]);
        assert!(plan.steps.last().unwrap().display().ends_with("make install"));
    }

    #[test]
    fn test_darwin_with_jit_installs_toolchain() {
        let facts = HostFacts::new("darwin", "arm64").with_rustc(false);
        let profile = PlatformProfile::resolve(&facts).unwrap();
        let env = Environment::from_pairs([("BERTH_RUSTUP_HOME", "/shared/rustup")]);
        let plan = plan_for(&profile, FeatureFlags::default(), &env);

        assert!(plan.configure_args().contains(&"--enable-yjit".to_string()));
        assert!(!plan.configure_args().iter().any(|a| a.starts_with("--with-libffi-dir")));
        let jit = plan.toolchain.jit.as_ref().unwrap();
        assert_eq!(jit.toolchain, "1.58");
        assert_eq!(jit.rustup_home.as_deref(), Some("/shared/rustup"));
        assert!(plan.steps[0].display().starts_with("rustup install 1.58"));

        let applied = plan.env.apply(&env);
        assert_eq!(applied.get("RUSTUP_TOOLCHAIN"), Some("1.58"));
        assert_eq!(applied.get("RUSTUP_HOME"), Some("/shared/rustup"));
        assert!(!applied.contains("XCFLAGS"));
    }

    #[test]
    fn test_bundled_gem_lines() {
        let profile = PlatformProfile::resolve(&HostFacts::new("darwin", "x86_64")).unwrap();
        let plan = plan_for(&profile, FeatureFlags::default(), &Environment::default());
        let extra = plan.steps.iter().find_map(|s| match &s.action {
            StepAction::Hook(BuildHook::RewriteBundledGems { extra }) => Some(extra.clone()),
            _ => None,
        });
        assert_eq!(extra.unwrap(), ["msgpack 1.8.0", "bootsnap 1.18.6"]);
    }

    #[test]
    fn test_baseline_only_without_jit() {
        let linux = PlatformProfile::resolve(&HostFacts::new("linux", "aarch64")).unwrap();
        let darwin = PlatformProfile::resolve(&HostFacts::new("darwin", "arm64")).unwrap();
        assert!(Ruby.conservative_baseline(&linux, &FeatureFlags::default().without_jit()));
        assert!(!Ruby.conservative_baseline(&linux, &FeatureFlags::default()));
        assert!(!Ruby.conservative_baseline(&darwin, &FeatureFlags::default().without_jit()));
    }

    #[test]
    fn test_network_checks_are_marked() {
        let profile = PlatformProfile::resolve(&HostFacts::new("linux", "x86_64")).unwrap();
        let checks = Ruby.verify(&profile);
        let offline: Vec<&str> = checks
            .iter()
            .filter(|c| !c.network)
            .map(|c| c.name.as_str())
            .collect();
        assert!(offline.contains(&"rbconfig-ruby"));
        assert!(offline.contains(&"gem-environment"));
        assert!(!offline.contains(&"https"));
        assert!(checks.iter().any(|c| c.name == "native-gem" && c.network));
    }

    #[test]
    fn test_export_deps_per_platform() {
        assert_eq!(Ruby.export_deps(OsKind::Darwin), [LIBYAML, OPENSSL]);
        assert_eq!(Ruby.export_deps(OsKind::Linux).len(), 5);
    }
}
