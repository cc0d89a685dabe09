use anyhow::{Context, Result};
use clap::Parser;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc::unbounded_channel;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use triggertty::pty_reader::{spawn_console_reader, spawn_reader};
use triggertty::supervisor::{Inputs, Supervisor};
use triggertty::watcher::RuleWatcher;
use triggertty::{Engine, PtySession};

#[derive(Parser, Debug)]
#[command(
    name = "triggertty",
    about = "Run a server and answer its output with rule-driven commands",
    version
)]
struct Args {
    /// Path to the rule file
    #[arg(short, long, env = "TRIGGERTTY_RULES")]
    rules: Option<PathBuf>,

    /// Do not reload the rule file when it changes
    #[arg(long)]
    no_watch: bool,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    log_level: String,

    /// Server program to run
    #[arg(short, long)]
    command: String,

    /// Arguments to pass to the server
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Logs go to stderr; stdout mirrors the server.
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let mut engine = Engine::new();
    if let Some(path) = &args.rules {
        engine
            .load_file(path)
            .with_context(|| format!("Failed to load rules: {}", path.display()))?;
    } else {
        warn!("no rule file given, forwarding console only");
    }

    let (reload_tx, reloads) = unbounded_channel();
    let _watcher = match &args.rules {
        Some(path) if !args.no_watch => Some(RuleWatcher::start(path, reload_tx)?),
        _ => None,
    };

    info!(command = %args.command, args = ?args.args, "starting server");
    let (mut session, input, reader) =
        PtySession::spawn(&args.command, &args.args).context("Failed to spawn server")?;

    let inputs = Inputs {
        lines: spawn_reader(reader, Arc::new(mirror_to_stdout)),
        console: spawn_console_reader(std::io::BufReader::new(std::io::stdin())),
        reloads,
    };

    let mut supervisor = Supervisor::new(engine, input, args.rules.clone());
    supervisor
        .run(inputs)
        .await
        .context("Supervisor loop failed")?;

    let status = session.wait()?;
    info!(code = status.exit_code(), "server exited");
    Ok(())
}

fn mirror_to_stdout(data: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    let _ = stdout.write_all(data);
    let _ = stdout.flush();
}
