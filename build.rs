fn main() {
    // HEADが変わったら再実行 (commit, checkout など)
    println!("cargo:rerun-if-changed=.git/HEAD");
    println!("cargo:rerun-if-changed=.git/index");
    println!("cargo:rerun-if-env-changed=ROM_TRACKER_VERSION");

    // パッケージング環境などgitが無い場合は環境変数で上書き
    let version = std::env::var("ROM_TRACKER_VERSION").ok().or_else(|| {
        let output = std::process::Command::new("git")
            .args(["describe", "--always", "--dirty", "--tags"])
            .output()
            .ok()?;
        output
            .status
            .success()
            .then(|| String::from_utf8_lossy(&output.stdout).trim().to_string())
    });

    let version = match version {
        Some(v) if !v.is_empty() => format!("{} ({})", env!("CARGO_PKG_VERSION"), v),
        _ => env!("CARGO_PKG_VERSION").to_string(),
    };
    println!("cargo:rustc-env=GIT_VERSION={}", version);
}
