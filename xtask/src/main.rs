//! Build automation tasks for the dbcontrol workspace.
//!
//! Run with `cargo xtask <command>`.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use xshell::{Shell, cmd};

#[derive(Parser)]
#[command(name = "xtask", about = "Build automation for dbcontrol")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run all checks (format, lint, test, deny)
    Ci,
    /// Run cargo fmt --check
    Fmt,
    /// Run clippy on every target
    Clippy,
    /// Run unit and integration tests
    Test,
    /// Run the gate property tests with more cases
    Proptest {
        /// Number of cases per property
        #[arg(long, default_value_t = 2048)]
        cases: u32,
    },
    /// Repeat the timing-based pool tests to surface flakiness
    Stress {
        /// Number of repetitions
        #[arg(long, default_value_t = 20)]
        runs: u32,
    },
    /// Run cargo-deny checks
    Deny,
    /// Generate documentation
    Doc,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let sh = Shell::new()?;

    let workspace_root = workspace_root()?;
    sh.change_dir(&workspace_root);

    match cli.command {
        Command::Ci => {
            println!("Running CI checks...");
            fmt(&sh)?;
            clippy(&sh)?;
            test(&sh)?;
            deny(&sh)?;
            println!("All CI checks passed!");
        }
        Command::Fmt => fmt(&sh)?,
        Command::Clippy => clippy(&sh)?,
        Command::Test => test(&sh)?,
        Command::Proptest { cases } => proptest(&sh, cases)?,
        Command::Stress { runs } => stress(&sh, runs)?,
        Command::Deny => deny(&sh)?,
        Command::Doc => doc(&sh)?,
    }

    Ok(())
}

fn workspace_root() -> Result<PathBuf> {
    let output = std::process::Command::new("cargo")
        .args(["locate-project", "--workspace", "--message-format=plain"])
        .output()
        .context("failed to run cargo locate-project")?;

    let path = String::from_utf8(output.stdout)
        .context("invalid UTF-8 in cargo output")?
        .trim()
        .to_string();

    Ok(PathBuf::from(path)
        .parent()
        .context("failed to get workspace root")?
        .to_path_buf())
}

fn fmt(sh: &Shell) -> Result<()> {
    println!("Checking formatting...");
    cmd!(sh, "cargo fmt --all -- --check").run()?;
    println!("Formatting check passed.");
    Ok(())
}

fn clippy(sh: &Shell) -> Result<()> {
    println!("Running clippy...");
    cmd!(sh, "cargo clippy --workspace --all-targets -- -D warnings").run()?;
    println!("Clippy check passed.");
    Ok(())
}

fn test(sh: &Shell) -> Result<()> {
    println!("Running tests...");
    cmd!(sh, "cargo test --workspace").run()?;
    println!("All tests passed.");
    Ok(())
}

fn proptest(sh: &Shell, cases: u32) -> Result<()> {
    println!("Running property tests with {cases} cases...");
    let cases = cases.to_string();
    let _env = sh.push_env("PROPTEST_CASES", cases);
    cmd!(sh, "cargo test -p dbcontrol --lib prop_").run()?;
    println!("Property tests passed.");
    Ok(())
}

fn stress(sh: &Shell, runs: u32) -> Result<()> {
    println!("Repeating pool tests {runs} times...");
    for run in 1..=runs {
        cmd!(sh, "cargo test -p dbcontrol-testing --quiet")
            .run()
            .with_context(|| format!("pool tests failed on run {run} of {runs}"))?;
    }
    println!("Pool tests passed {runs} times.");
    Ok(())
}

fn deny(sh: &Shell) -> Result<()> {
    println!("Running cargo-deny...");
    cmd!(sh, "cargo deny check").run()?;
    println!("Cargo-deny check passed.");
    Ok(())
}

fn doc(sh: &Shell) -> Result<()> {
    println!("Generating documentation...");
    cmd!(sh, "cargo doc --workspace --no-deps").run()?;
    println!("Documentation generated.");
    Ok(())
}
