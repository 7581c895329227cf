use std::process::Command;

const KEYS: [&str; 5] = [
    "FLOE_BUILD_BRANCH",
    "FLOE_BUILD_COMMIT",
    "FLOE_BUILD_DESCRIBE",
    "FLOE_BUILD_BY",
    "FLOE_BUILD_ON",
];

fn main() {
    // Packaging injects these; `option_env!` picks them up directly.
    for key in KEYS {
        println!("cargo:rerun-if-env-changed={key}");
    }

    // Local builds fall back to whatever git can tell us.
    let fallbacks: [(&str, &[&str]); 3] = [
        ("FLOE_BUILD_BRANCH", &["rev-parse", "--abbrev-ref", "HEAD"]),
        ("FLOE_BUILD_COMMIT", &["rev-parse", "HEAD"]),
        ("FLOE_BUILD_DESCRIBE", &["describe", "--always", "--dirty"]),
    ];
    for (key, args) in fallbacks {
        if std::env::var(key).is_ok() {
            continue;
        }
        if let Some(value) = git(args) {
            println!("cargo:rustc-env={key}={value}");
        }
    }
}

fn git(args: &[&str]) -> Option<String> {
    let output = Command::new("git").args(args).output().ok()?;
    if !output.status.success() {
        return None;
    }
    let value = String::from_utf8(output.stdout).ok()?.trim().to_string();
    (!value.is_empty()).then_some(value)
}
