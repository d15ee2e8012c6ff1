use std::{env, process::Command};

const TAG_KEY: &str = "AC_BUILD_GIT_TAG";
const COMMIT_KEY: &str = "AC_BUILD_GIT_COMMIT";
const DIRTY_KEY: &str = "AC_BUILD_GIT_DIRTY";

fn main() {
    for key in [TAG_KEY, COMMIT_KEY, DIRTY_KEY] {
        println!("cargo:rerun-if-env-changed={key}");
    }

    let tag = env_or(TAG_KEY, || {
        git_output(&["describe", "--tags", "--exact-match"]).unwrap_or_else(|| "untagged".into())
    });
    let commit = env_or(COMMIT_KEY, || {
        git_output(&["rev-parse", "--short=12", "HEAD"]).unwrap_or_else(|| "unknown".into())
    });
    let dirty = env_or(DIRTY_KEY, || {
        let changed = git_output(&["status", "--porcelain", "--untracked-files=no"])
            .is_some_and(|output| !output.is_empty());
        changed.to_string()
    });

    println!("cargo:rustc-env={TAG_KEY}={tag}");
    println!("cargo:rustc-env={COMMIT_KEY}={commit}");
    println!("cargo:rustc-env={DIRTY_KEY}={dirty}");
}

fn env_or(key: &str, fallback: impl FnOnce() -> String) -> String {
    env::var(key).unwrap_or_else(|_| fallback())
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let text = String::from_utf8(output.stdout).ok()?;
    Some(text.trim().to_string())
}
