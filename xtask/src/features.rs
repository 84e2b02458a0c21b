use std::process::Command;

use anyhow::{Context, Result};

const PACKAGE: &str = "observa-core";

const FEATURE_COMBINATIONS: &[&[&str]] = &[
    &[], // default
    &["serde"],
    &["test-utils"],
    &["serde", "test-utils"],
    &["anyhow"],
];

/// Check that every `observa-core` feature combination compiles.
pub fn test_feature_matrix() -> Result<()> {
    println!("Testing {} {PACKAGE} feature combinations...", FEATURE_COMBINATIONS.len());

    for (index, features) in FEATURE_COMBINATIONS.iter().enumerate() {
        let label = if features.is_empty() { "default".to_string() } else { features.join(",") };

        println!(
            "\n[{}/{}] cargo check -p {PACKAGE} --no-default-features{}",
            index + 1,
            FEATURE_COMBINATIONS.len(),
            if features.is_empty() { String::new() } else { format!(" --features {label}") }
        );

        let mut command = Command::new("cargo");
        command.args(["check", "-p", PACKAGE, "--no-default-features"]);
        if !features.is_empty() {
            command.arg("--features").arg(&label);
        }

        let status = command
            .status()
            .with_context(|| format!("Failed to run cargo check for '{label}'"))?;

        if !status.success() {
            anyhow::bail!("Feature combination '{label}' failed to compile");
        }

        println!("✅ Features '{label}' compiled successfully");
    }

    println!("\n✅ All {} feature combinations compile successfully!", FEATURE_COMBINATIONS.len());

    Ok(())
}
