fn main() {
    built::write_built_file().expect("Failed to acquire build-time information");

    // Packagers without a .git directory can supply the hash directly.
    println!("cargo:rerun-if-env-changed=MERGEGATE_GIT_HASH");
    if let Ok(hash) = std::env::var("MERGEGATE_GIT_HASH") {
        println!("cargo:rustc-env=MERGEGATE_GIT_HASH={}", hash);
    }
}
