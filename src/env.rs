//! Environment-variable resolution, scoped overrides, and working-directory
//! guards.
//!
//! Resolution uses bash syntax (`$VAR` / `${VAR}`, `$$` for a literal `$`)
//! on every platform, and an unset variable is an error rather than a
//! silent empty string — scripts fail where the typo is, not three steps
//! later.

use std::env;
use std::path::PathBuf;
use std::sync::OnceLock;

use regex::Regex;
use tracing::{debug, info, warn};

use crate::call::{check_output, Cmd, Exec};
use crate::error::{Result, ShellError};

fn var_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"\$(?:\$|\{([A-Za-z_][A-Za-z0-9_]*)\}|([A-Za-z_][A-Za-z0-9_]*))")
            .expect("hard-coded pattern")
    })
}

/// Resolve all `$VAR` / `${VAR}` references in `s`; `$$` escapes to a
/// literal `$`. Anything else (including a lone trailing `$`) passes
/// through untouched.
pub fn resolve_env(s: &str) -> Result<String> {
    let mut out = String::with_capacity(s.len());
    let mut last = 0;
    for caps in var_pattern().captures_iter(s) {
        let Some(whole) = caps.get(0) else { continue };
        out.push_str(&s[last..whole.start()]);
        last = whole.end();
        match caps.get(1).or_else(|| caps.get(2)) {
            Some(name) => match env::var(name.as_str()) {
                Ok(value) => out.push_str(&value),
                Err(_) => return Err(ShellError::MissingEnv(name.as_str().to_string())),
            },
            None => out.push('$'),
        }
    }
    out.push_str(&s[last..]);
    Ok(out)
}

/// Set an environment variable for this process and every child forked
/// afterwards, resolving `$VAR` references in the value first. `None`
/// deletes the variable.
pub fn putenv(key: &str, value: Option<&str>) -> Result<()> {
    match value {
        Some(value) => {
            info!("Setting environment variable {key}={value}");
            env::set_var(key, resolve_env(value)?);
        }
        None => {
            info!("Deleting environment variable {key}");
            env::remove_var(key);
        }
    }
    Ok(())
}

/// Scoped environment override. The previous value — or previous absence —
/// comes back when the guard drops, on every exit path.
#[must_use = "the override is reverted as soon as the guard drops"]
pub struct EnvOverride {
    key: String,
    prev: Option<String>,
}

/// Override an environment variable for the lifetime of the returned
/// guard; `None` deletes it for that scope.
pub fn override_env(key: &str, value: Option<&str>) -> Result<EnvOverride> {
    let prev = env::var(key).ok();
    putenv(key, value)?;
    Ok(EnvOverride {
        key: key.to_string(),
        prev,
    })
}

impl Drop for EnvOverride {
    fn drop(&mut self) {
        // Restore literally, without re-resolving: the saved value was
        // already concrete when we took it.
        match &self.prev {
            Some(value) => {
                info!("Setting environment variable {}={}", self.key, value);
                env::set_var(&self.key, value);
            }
            None => {
                info!("Deleting environment variable {}", self.key);
                env::remove_var(&self.key);
            }
        }
    }
}

/// Emulate bash `source <file>`: run the script under the strict shell and
/// import the resulting environment into this process. Script stdout is
/// redirected to stderr so only the final `env` output is parsed.
pub fn source(bash_file: &str) -> Result<()> {
    info!("Sourcing environment variables from {bash_file}");
    let stdout = check_output(
        Cmd::Shell(format!("source \"{bash_file}\" 1>&2 && env")),
        Exec::default(),
    )?;

    for line in stdout.lines() {
        let Some((key, value)) = line.split_once('=') else {
            // Continuation of a multi-line value; nothing to import.
            continue;
        };
        if key.is_empty() || key == "_" || key == "SHLVL" {
            continue;
        }
        if env::var(key).ok().as_deref() != Some(value) {
            debug!("Setting environment variable: {key}={value}");
            env::set_var(key, value);
        }
    }
    Ok(())
}

/// Change the working directory, resolving env references in the path.
pub fn chdir(path: &str) -> Result<()> {
    let path = resolve_env(path)?;
    info!("chdir {path}");
    env::set_current_dir(&path).map_err(ShellError::Io)
}

/// Guard returned by [`pushd`]; dropping it moves back to the directory
/// that was current when it was created.
#[must_use = "the directory change is reverted as soon as the guard drops"]
pub struct Pushd {
    prev: PathBuf,
}

/// Move into `path` for the lifetime of the returned guard.
pub fn pushd(path: &str) -> Result<Pushd> {
    let prev = env::current_dir().map_err(ShellError::Io)?;
    let path = resolve_env(path)?;
    info!("pushd {path}");
    env::set_current_dir(&path).map_err(ShellError::Io)?;
    Ok(Pushd { prev })
}

impl Drop for Pushd {
    fn drop(&mut self) {
        info!("popd");
        if let Err(err) = env::set_current_dir(&self.prev) {
            warn!(
                "failed to restore working directory {}: {err}",
                self.prev.display()
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::fs;
    use std::sync::Mutex;

    /// Env mutation and cwd changes are process-global; tests touching
    /// either serialize on this.
    fn env_lock() -> &'static Mutex<()> {
        static LOCK: OnceLock<Mutex<()>> = OnceLock::new();
        LOCK.get_or_init(|| Mutex::new(()))
    }

    #[rstest]
    #[case("no variables here", "no variables here")]
    #[case("$RSHELL_ENV_A", "alpha")]
    #[case("${RSHELL_ENV_A}", "alpha")]
    #[case("$RSHELL_ENV_A/${RSHELL_ENV_B}", "alpha/beta")]
    #[case("cost: $$5 and $RSHELL_ENV_B", "cost: $5 and beta")]
    #[case("$RSHELL_ENV_A$RSHELL_ENV_B", "alphabeta")]
    fn resolve_env_substitutes(#[case] input: &str, #[case] expected: &str) {
        let _guard = env_lock().lock().expect("env lock");
        env::set_var("RSHELL_ENV_A", "alpha");
        env::set_var("RSHELL_ENV_B", "beta");
        assert_eq!(resolve_env(input).expect("resolve"), expected);
    }

    #[test]
    fn resolve_env_reports_the_missing_name() {
        let _guard = env_lock().lock().expect("env lock");
        env::remove_var("RSHELL_ENV_MISSING");
        let err = resolve_env("x/$RSHELL_ENV_MISSING/y").expect_err("must fail");
        match err {
            ShellError::MissingEnv(name) => assert_eq!(name, "RSHELL_ENV_MISSING"),
            other => panic!("expected MissingEnv, got {other:?}"),
        }
    }

    #[test]
    fn putenv_resolves_references_in_the_value() {
        let _guard = env_lock().lock().expect("env lock");
        env::set_var("RSHELL_ENV_ROOT", "/opt/data");
        putenv("RSHELL_ENV_LOGDIR", Some("$RSHELL_ENV_ROOT/log")).expect("putenv");
        assert_eq!(
            env::var("RSHELL_ENV_LOGDIR").expect("var set"),
            "/opt/data/log"
        );

        putenv("RSHELL_ENV_LOGDIR", None).expect("delete");
        assert!(env::var("RSHELL_ENV_LOGDIR").is_err());
        env::remove_var("RSHELL_ENV_ROOT");
    }

    #[test]
    fn override_env_restores_previous_value() {
        let _guard = env_lock().lock().expect("env lock");
        env::set_var("RSHELL_ENV_OVR", "original");
        {
            let _scope = override_env("RSHELL_ENV_OVR", Some("temporary")).expect("override");
            assert_eq!(env::var("RSHELL_ENV_OVR").expect("var"), "temporary");
        }
        assert_eq!(env::var("RSHELL_ENV_OVR").expect("var"), "original");

        {
            let _scope = override_env("RSHELL_ENV_OVR", None).expect("override");
            assert!(env::var("RSHELL_ENV_OVR").is_err());
        }
        assert_eq!(env::var("RSHELL_ENV_OVR").expect("var"), "original");
        env::remove_var("RSHELL_ENV_OVR");
    }

    #[test]
    fn override_env_deletes_variables_it_created() {
        let _guard = env_lock().lock().expect("env lock");
        env::remove_var("RSHELL_ENV_FRESH");
        {
            let _scope = override_env("RSHELL_ENV_FRESH", Some("created")).expect("override");
            assert_eq!(env::var("RSHELL_ENV_FRESH").expect("var"), "created");
        }
        assert!(env::var("RSHELL_ENV_FRESH").is_err());
    }

    #[test]
    fn pushd_guard_restores_the_working_directory() {
        let _guard = env_lock().lock().expect("env lock");
        let target = env::temp_dir().join(format!("rshell-pushd-{}", std::process::id()));
        fs::create_dir_all(&target).expect("create target dir");
        let before = env::current_dir().expect("cwd");
        {
            let _scope = pushd(&target.to_string_lossy()).expect("pushd");
            let inside = env::current_dir().expect("cwd");
            // Canonicalize both sides: temp_dir is often a symlink.
            assert_eq!(
                inside.canonicalize().expect("canon"),
                target.canonicalize().expect("canon")
            );
        }
        assert_eq!(env::current_dir().expect("cwd"), before);
        let _ = fs::remove_dir_all(&target);
    }

    #[test]
    fn source_imports_exported_variables() {
        let _guard = env_lock().lock().expect("env lock");
        let script = env::temp_dir().join(format!("rshell-source-{}.sh", std::process::id()));
        fs::write(
            &script,
            "export RSHELL_SOURCED_VALUE=from-script\necho side-effect-output\n",
        )
        .expect("write script");

        env::remove_var("RSHELL_SOURCED_VALUE");
        source(&script.to_string_lossy()).expect("source");
        assert_eq!(
            env::var("RSHELL_SOURCED_VALUE").expect("imported"),
            "from-script"
        );

        env::remove_var("RSHELL_SOURCED_VALUE");
        let _ = fs::remove_file(&script);
    }

    #[test]
    fn source_propagates_script_failure() {
        let _guard = env_lock().lock().expect("env lock");
        let script = env::temp_dir().join(format!("rshell-source-bad-{}.sh", std::process::id()));
        fs::write(&script, "exit 7\n").expect("write script");
        let err = source(&script.to_string_lossy()).expect_err("must fail");
        assert!(matches!(err, ShellError::CommandFailed { .. }));
        let _ = fs::remove_file(&script);
    }
}
