// git hooks (cargo check + fmt) are installed by cargo-husky on `cargo test`
