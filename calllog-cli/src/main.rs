use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::Context;
use calllog_core::{CallLogWriter, PluginHost, WriterConfig};
use calllog_policy::PermissionStatus;
use calllog_store::JsonlCallLogStore;
use calllog_types::{Action, WRITE_CALL_LOG};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tokio::sync::mpsc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "calllog", about = "Write call-history records into a call log store")]
struct Cli {
    /// JSON-lines file standing in for the device call log.
    #[arg(long, default_value = "./calllog.jsonl")]
    store: PathBuf,
    /// YAML writer config.
    #[arg(long)]
    config: Option<PathBuf>,
    /// Start with the write permission already granted.
    #[arg(long)]
    os_granted: bool,
    #[arg(short, long)]
    verbose: bool,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Insert the records from a JSON array file.
    Write {
        #[arg(long)]
        input: PathBuf,
        #[arg(long)]
        declare_permission: bool,
    },
    /// Delete every record.
    Clear {
        #[arg(long)]
        declare_permission: bool,
    },
    /// Send a raw action with a JSON argument array.
    Exec {
        action: String,
        #[arg(default_value = "[]")]
        args: String,
    },
}

/// Host backed by the terminal: permission prompts are answered on stdin.
struct ConsoleHost {
    granted: AtomicBool,
    prompts: mpsc::UnboundedSender<(i32, String)>,
}

impl PluginHost for ConsoleHost {
    fn has_permission(&self, permission: &str) -> bool {
        permission == WRITE_CALL_LOG && self.granted.load(Ordering::SeqCst)
    }

    fn request_permission(&self, request_code: i32, permission: &str) {
        let _ = self.prompts.send((request_code, permission.to_string()));
    }
}

fn ask(permission: &str) -> io::Result<bool> {
    let mut stderr = io::stderr();
    write!(stderr, "Allow writing the call log ({permission})? [y/N] ")?;
    stderr.flush()?;
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line)?;
    Ok(matches!(line.trim(), "y" | "Y" | "yes"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = WriterConfig::load(cli.config.as_deref())?;
    tracing::debug!(?config, "loaded writer config");

    let (action, args) = match cli.command {
        Command::Write {
            input,
            declare_permission,
        } => {
            let text = std::fs::read_to_string(&input)
                .with_context(|| format!("reading {}", input.display()))?;
            let records: Value = serde_json::from_str(&text)
                .with_context(|| format!("parsing {}", input.display()))?;
            (
                Action::WriteBulk.as_str().to_string(),
                vec![records, Value::Bool(declare_permission)],
            )
        }
        Command::Clear { declare_permission } => (
            Action::Clear.as_str().to_string(),
            vec![Value::Bool(declare_permission)],
        ),
        Command::Exec { action, args } => {
            let args: Vec<Value> =
                serde_json::from_str(&args).context("exec arguments must be a JSON array")?;
            (action, args)
        }
    };

    let (tx, mut prompts) = mpsc::unbounded_channel();
    let host = Arc::new(ConsoleHost {
        granted: AtomicBool::new(cli.os_granted),
        prompts: tx,
    });
    let store = Arc::new(JsonlCallLogStore::open(&cli.store)?);
    let writer = CallLogWriter::with_store(host.clone(), store, &config);

    let mut dispatch = writer.execute(&action, &args).await;
    tracing::debug!(accepted = dispatch.accepted, "dispatched {action}");

    let result = loop {
        tokio::select! {
            res = &mut dispatch.result => break res.context("request dropped without a result")?,
            Some((request_code, permission)) = prompts.recv() => {
                let granted = ask(&permission)?;
                host.granted.store(granted, Ordering::SeqCst);
                let status = if granted {
                    PermissionStatus::Granted
                } else {
                    PermissionStatus::Denied
                };
                writer.on_permission_result(request_code, &[status]).await;
            }
        }
    };

    println!("{}", result.to_wire());
    if !result.is_ok() {
        std::process::exit(1);
    }
    Ok(())
}
