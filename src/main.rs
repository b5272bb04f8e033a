use anyhow::Context;
use clap::Parser;
use env_logger::Builder;
use logical_backup::{Cli, LogicalBackup, LogicalBackupError, OutputFormatter, OutputMode};
use std::path::{Path, PathBuf};
use std::process;

#[tokio::main]
async fn main() {
    let exit_code = run().await;
    process::exit(exit_code);
}

async fn run() -> i32 {
    let cli = Cli::parse();

    setup_logging(cli.verbosity_level());

    if cli.generate_config {
        return handle_generate_config(&cli);
    }

    let app = match LogicalBackup::from_cli(&cli) {
        Ok(app) => app,
        Err(e) => {
            print_startup_error(&e);
            return e.exit_code();
        }
    };

    let operation = cli.operation();
    let destination = cli.destination(app.config());

    if cli.dry_run {
        return handle_dry_run(&app, &cli);
    }

    let result = match app.run_operation(operation, destination).await {
        Ok(result) => result,
        Err(e) => {
            log::debug!("Run was not started: {:?}", e);
            app.handle_error(&e);
            return e.exit_code();
        }
    };

    app.output_formatter().print_run_report(&result.report);
    match result.error {
        None => 0,
        Some(e) => {
            log::debug!("Run ended with error: {:?}", e);
            app.handle_error(&e);
            e.exit_code()
        }
    }
}

fn handle_generate_config(cli: &Cli) -> i32 {
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from("logical-backup.toml"));

    match write_sample_config(&config_path) {
        Ok(()) => {
            println!(
                "Generated sample configuration file: {}",
                config_path.display()
            );
            println!("\nTo use this configuration:");
            println!(
                "  logical-backup --config {} backup",
                config_path.display()
            );
            println!("\nEdit the file to customize settings for your needs.");
            0
        }
        Err(e) => {
            eprintln!("Failed to generate configuration file: {:#}", e);
            1
        }
    }
}

fn write_sample_config(path: &Path) -> anyhow::Result<()> {
    if path.exists() {
        anyhow::bail!("{} already exists", path.display());
    }
    LogicalBackup::generate_sample_config(path)
        .with_context(|| format!("writing {}", path.display()))
}

fn handle_dry_run(app: &LogicalBackup, cli: &Cli) -> i32 {
    let formatter = app.output_formatter();

    formatter.info("DRY RUN MODE - The external tool will not be started");
    formatter.print_separator();

    let plan = match app.plan(cli.operation(), cli.destination(app.config())) {
        Ok(plan) => plan,
        Err(e) => {
            formatter.print_user_friendly_error(&e);
            return e.exit_code();
        }
    };

    let config = app.config();
    formatter.info("Configuration that would be used:");
    println!("  Tool: {}", config.tool.program);
    println!("  Create missing directories: {}", config.backup.create_missing);
    println!("  Progress bar: {}", config.progress.enabled);
    println!("  Diagnostic lines kept: {}", config.tool.diagnostic_lines);

    formatter.print_separator();
    formatter.info("Run plan:");
    println!("  Operation: {}", plan.operation);
    if let Some(destination) = plan.destination() {
        println!("  Destination: {}", destination.display());
        if !destination.exists() {
            if config.backup.create_missing {
                formatter.warning("Destination does not exist and would be created");
            } else {
                formatter.warning("Destination does not exist and --no-create is set");
            }
        }
    }
    println!("  Command: {}", plan.invocation);

    formatter.print_separator();
    formatter.success("Dry run completed successfully");
    0
}

fn print_startup_error(error: &LogicalBackupError) {
    let formatter = OutputFormatter::new(OutputMode::Human, 0, false);
    formatter.print_user_friendly_error(error);
}

fn setup_logging(verbosity: u8) {
    let default_filter = match verbosity {
        0 => "logical_backup=warn",
        1 => "logical_backup=info",
        _ => "logical_backup=debug",
    };

    // RUST_LOG wins over the verbosity flags
    let _ = Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .target(env_logger::Target::Stderr)
        .try_init();
}
