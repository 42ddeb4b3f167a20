use clap::Parser;
use colored::*;
use eyre::{Context, Result};
use log::info;
use std::fs;
use std::path::PathBuf;

mod cli;

use cli::Cli;
use cli::commands::Commands;
use taskbot::config::Config;
use taskbot::ipc::{AdminResponse, IpcClient};

fn setup_logging(level: Option<&str>) -> Result<()> {
    // Create log directory
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskbot")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let log_file = log_dir.join("taskbot.log");

    // Setup env_logger with file output
    let target = Box::new(
        fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&log_file)
            .context("Failed to open log file")?,
    );

    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    env_logger::Builder::from_env(env)
        .target(env_logger::Target::Pipe(target))
        .init();

    info!("Logging initialized, writing to: {}", log_file.display());
    Ok(())
}

/// Print an acknowledgement and report whether it was a success
fn report(response: &AdminResponse) -> bool {
    if response.is_success() {
        println!("{} {}", "✓".green(), response.message());
        true
    } else {
        eprintln!("{} {}", "✗".red(), response.message());
        false
    }
}

fn print_status(response: &AdminResponse) -> Result<bool> {
    let Some(status) = response.result.as_ref() else {
        return Ok(report(response));
    };
    let state = status["cycle_state"].as_str().unwrap_or("unknown");
    let headline = if status["is_paused"].as_bool().unwrap_or(false) {
        "paused".yellow()
    } else if status["loop_running"].as_bool().unwrap_or(false) {
        "running".green()
    } else {
        "idle".cyan()
    };
    println!("{} {} ({})", "Loop:".bold(), headline, state);
    println!(
        "{} {}/{}",
        "Task:".bold(),
        status["current_task"],
        status["total_tasks"]
    );
    println!("{}", serde_json::to_string_pretty(status)?);
    Ok(true)
}

async fn run_admin(client: &IpcClient, command: &Commands) -> Result<bool> {
    client.connect().await?;
    let ok = match command {
        Commands::Run => return Err(eyre::eyre!("`run` is not an admin command")),
        Commands::Ping => {
            let alive = client.ping().await?;
            if alive {
                println!("{} Bot is online and responsive!", "✓".green());
            }
            alive
        }
        Commands::Status => print_status(&client.status().await?)?,
        Commands::Start { .. } => {
            let request = command
                .batch_request()
                .ok_or_else(|| eyre::eyre!("start without batch parameters"))?;
            report(&client.start_batch(&request).await?)
        }
        Commands::Pause => report(&client.pause().await?),
        Commands::Resume => report(&client.resume().await?),
        Commands::Stop => report(&client.stop().await?),
        Commands::Configure { .. } => {
            let update = command
                .settings_override()
                .ok_or_else(|| eyre::eyre!("configure without settings"))?;
            report(&client.configure(&update).await?)
        }
        Commands::Assign { task, user } => report(&client.assign(*task, *user).await?),
        Commands::Verify { user, reddit } => report(&client.verify(*user, reddit).await?),
    };
    Ok(ok)
}

fn run_application(cli: &Cli, config: Config) -> Result<bool> {
    info!("Starting application");

    if cli.is_verbose() {
        println!("{}", "Verbose mode enabled".yellow());
    }

    let runtime = tokio::runtime::Runtime::new().context("Failed to start async runtime")?;

    if let Commands::Run = cli.command {
        println!("{}", "Starting taskbot...".cyan());
        runtime
            .block_on(taskbot::daemon::run_daemon(config))
            .context("Service failed")?;
        return Ok(true);
    }

    let socket = cli.socket.clone().unwrap_or_else(|| config.ipc.socket_path.clone());
    let client = IpcClient::with_socket(socket);
    runtime.block_on(run_admin(&client, &cli.command))
}

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Load configuration
    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    // Setup logging once the configured level is known
    setup_logging(config.log_level.as_deref()).context("Failed to setup logging")?;

    info!("Starting with config from: {:?}", cli.config);

    // Run the main application logic
    let ok = run_application(&cli, config).context("Application failed")?;
    if !ok {
        std::process::exit(1);
    }

    Ok(())
}
