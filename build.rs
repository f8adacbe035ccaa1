use std::process::Command;

fn strip_tag_prefix(raw: &str) -> String {
    let trimmed = raw.trim();
    match trimmed.strip_prefix('v') {
        Some(rest) if rest.starts_with(|ch: char| ch.is_ascii_digit()) => rest.to_string(),
        _ => trimmed.to_string(),
    }
}

fn git_output(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }

    let value = String::from_utf8(output.stdout).ok()?;
    let value = value.trim();
    (!value.is_empty()).then(|| value.to_string())
}

fn build_version() -> String {
    if let Ok(version) = std::env::var("TASKDECK_VERSION") {
        let version = strip_tag_prefix(&version);
        if !version.is_empty() {
            return version;
        }
    }

    git_output(&["describe", "--tags", "--always", "--dirty"])
        .map(|raw| strip_tag_prefix(&raw))
        .unwrap_or_else(|| env!("CARGO_PKG_VERSION").to_string())
}

fn main() {
    println!("cargo:rerun-if-env-changed=TASKDECK_VERSION");
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/packed-refs");

    println!("cargo:rustc-env=TASKDECK_BUILD_VERSION={}", build_version());
    let commit = git_output(&["rev-parse", "--short", "HEAD"]).unwrap_or_else(|| "unknown".into());
    println!("cargo:rustc-env=TASKDECK_BUILD_COMMIT={commit}");
}
