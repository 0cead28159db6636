use std::fs::File;
use std::path::PathBuf;
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::Parser;

use vitals::app::App;
use vitals::config::Config;
use vitals::registry::Registry;
use vitals::session_log;

#[derive(Parser)]
#[command(name = "vitals", version, about = "Interactive hardware diagnostics for the terminal")]
struct Cli {
    /// Print the test catalog with tool availability and exit
    #[arg(long)]
    list: bool,

    /// Directory for per-run session logs
    #[arg(long, value_name = "DIR")]
    logs_dir: Option<PathBuf>,

    /// Alternate configuration file
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = Config::load(cli.config.as_deref());
    if let Some(dir) = cli.logs_dir {
        config.logs_dir = Some(dir);
    }
    let logs_dir = config
        .logs_dir
        .clone()
        .unwrap_or_else(session_log::default_logs_dir);

    init_tracing(&logs_dir);

    let registry = Registry::probe();

    if cli.list {
        print_catalog(&registry);
        return Ok(());
    }

    // The UI thread stays synchronous; the runtime hosts the output relays.
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    let _guard = runtime.enter();

    let terminal = ratatui::init();
    let result = App::new(registry, config, logs_dir).run(terminal);
    ratatui::restore();
    result
}

/// Diagnostics go to a PID-suffixed file under the logs directory; stderr
/// belongs to the TUI. Filter via the VITALS_LOG environment variable.
fn init_tracing(logs_dir: &std::path::Path) {
    use tracing_subscriber::EnvFilter;

    if std::fs::create_dir_all(logs_dir).is_err() {
        return;
    }
    let path = logs_dir.join(format!("vitals-{}.log", std::process::id()));
    let Ok(file) = File::create(&path) else {
        return;
    };
    let filter = EnvFilter::try_from_env("VITALS_LOG").unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
}

fn print_catalog(registry: &Registry) {
    let mut section = "";
    for test in registry.tests() {
        if test.section != section {
            println!("{}:", test.section);
            section = &test.section;
        }
        let marker = if registry.is_available(test) {
            "     "
        } else {
            "  [MISSING]"
        };
        println!("{:<12} {:<24} {}", marker, test.name, test.command_line());
    }
}
