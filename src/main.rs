//! Callback Later daemon - missed-call auto-responder
//!
//! CLI and daemon wiring: lifecycle commands, signal producers, journal
//! viewing, and the serialized detection loop.

use callback_later_rs::call_state::PhoneState;
use callback_later_rs::config::{Config, ReplySettings};
use callback_later_rs::dispatch::CommandSender;
use callback_later_rs::engine::{CommandAlerts, Engine};
use callback_later_rs::journal::{self, CallerId, CallerSource, LogEntry, ReplyJournal};
use callback_later_rs::notifications::CHAT_APP_PACKAGE;
use callback_later_rs::signals::{Signal, SignalSpool};
use callback_later_rs::{Error, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use std::fs;
use std::process::{Command, Stdio};
use std::sync::mpsc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Callback Later - missed-call auto-responder
#[derive(Parser)]
#[command(name = "callback-later-rs")]
#[command(about = "Auto-reply to missed calls with an SMS or chat message")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the daemon
    Start,

    /// Stop the daemon
    Stop,

    /// Restart the daemon
    Restart,

    /// Show daemon status
    Status,

    /// Tail the log file
    Logs {
        /// Number of lines to show
        #[arg(short = 'n', long, default_value = "50")]
        lines: u32,

        /// Don't follow the log
        #[arg(long = "no-follow")]
        no_follow: bool,
    },

    /// Deliver a platform signal to the daemon
    Signal {
        #[command(subcommand)]
        signal: SignalCommand,
    },

    /// Show journaled auto-replies, optionally filtered
    History {
        /// Contact substring filter (case insensitive)
        contact: Option<String>,

        /// Start of time range, inclusive (YYYY-MM-DDTHH:MM:SSZ)
        #[arg(long)]
        from: Option<String>,

        /// End of time range, inclusive (YYYY-MM-DDTHH:MM:SSZ)
        #[arg(long)]
        to: Option<String>,
    },

    /// Delete one journal entry matching contact and time exactly
    DeleteEntry {
        /// Tagged contact string as shown by `history`
        contact: String,

        /// Entry time (YYYY-MM-DDTHH:MM:SSZ)
        time: String,
    },

    /// Show reply settings
    GetSettings,

    /// Update reply settings
    SetSettings {
        /// Auto-reply message text
        #[arg(long)]
        message: Option<String>,

        /// Whitelist-only flag (stored but not enforced)
        #[arg(long)]
        whitelist_only: Option<bool>,
    },

    /// Run the daemon (internal)
    #[command(hide = true)]
    Run,
}

#[derive(Subcommand)]
enum SignalCommand {
    /// Call-state-changed broadcast (RINGING, OFFHOOK, IDLE)
    CallState {
        state: String,

        /// Incoming caller number, when the platform supplied one
        #[arg(long)]
        number: Option<String>,
    },

    /// Third-party notification posting
    Notification {
        #[arg(long, default_value = CHAT_APP_PACKAGE)]
        package: String,

        #[arg(long)]
        title: String,

        #[arg(long)]
        text: String,
    },

    /// Call-log change marker (triggers a re-query)
    CallLog,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    let config = Config::default();

    match cli.command {
        Commands::Start => cmd_start(&config),
        Commands::Stop => cmd_stop(&config),
        Commands::Restart => {
            // cmd_stop waits for the old daemon to exit before returning
            cmd_stop(&config)?;
            cmd_start(&config)
        }
        Commands::Status => cmd_status(&config),
        Commands::Logs { lines, no_follow } => cmd_logs(&config, lines, !no_follow),
        Commands::Signal { signal } => cmd_signal(&config, signal),
        Commands::History { contact, from, to } => cmd_history(&config, contact.as_deref(), from.as_deref(), to.as_deref()),
        Commands::DeleteEntry { contact, time } => cmd_delete_entry(&config, &contact, &time),
        Commands::GetSettings => cmd_get_settings(&config),
        Commands::SetSettings { message, whitelist_only } => {
            cmd_set_settings(&config, message, whitelist_only)
        }
        Commands::Run => cmd_run(&config),
    }
}

// ============================================================================
// Daemon lifecycle
// ============================================================================

fn get_pid(config: &Config) -> Option<u32> {
    let pid_file = config.state_dir.join("daemon.pid");
    if !pid_file.exists() {
        return None;
    }

    let content = fs::read_to_string(&pid_file).ok()?;
    let pid: u32 = content.trim().parse().ok()?;

    if process_alive(pid) {
        Some(pid)
    } else {
        // PID file exists but process is dead
        let _ = fs::remove_file(&pid_file);
        None
    }
}

fn cmd_start(config: &Config) -> Result<()> {
    if let Some(pid) = get_pid(config) {
        println!("Daemon already running (PID {})", pid);
        return Ok(());
    }

    fs::create_dir_all(&config.state_dir)?;
    fs::create_dir_all(&config.logs_dir)?;

    let log_file = config.logs_dir.join("responder.log");
    let log = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file)?;

    let exe = std::env::current_exe()?;
    let child = Command::new(&exe)
        .arg("run")
        .stdout(Stdio::from(log.try_clone()?))
        .stderr(Stdio::from(log))
        .spawn()?;

    let pid_file = config.state_dir.join("daemon.pid");
    fs::write(&pid_file, child.id().to_string())?;

    println!("Daemon started (PID {})", child.id());
    println!("Logs: {}", log_file.display());
    Ok(())
}

fn cmd_stop(config: &Config) -> Result<()> {
    let pid = match get_pid(config) {
        Some(p) => p,
        None => {
            println!("Daemon not running");
            return Ok(());
        }
    };

    println!("Stopping daemon (PID {})...", pid);

    let _ = Command::new("kill")
        .args(["-TERM", &pid.to_string()])
        .status();

    // Wait for it to die; a second daemon must not start while the old one
    // still drains the spool
    if !wait_for_exit(pid, 10, Duration::from_millis(500)) {
        println!("Force killing...");
        let _ = Command::new("kill")
            .args(["-KILL", &pid.to_string()])
            .status();
    }

    let _ = fs::remove_file(config.state_dir.join("daemon.pid"));
    println!("Daemon stopped");
    Ok(())
}

fn process_alive(pid: u32) -> bool {
    Command::new("kill")
        .args(["-0", &pid.to_string()])
        .status()
        .map(|s| s.success())
        .unwrap_or(false)
}

/// Poll until `pid` exits, up to `attempts` checks `interval` apart. Returns
/// whether the process is gone.
fn wait_for_exit(pid: u32, attempts: u32, interval: Duration) -> bool {
    for _ in 0..attempts {
        if !process_alive(pid) {
            return true;
        }
        std::thread::sleep(interval);
    }
    !process_alive(pid)
}

fn cmd_status(config: &Config) -> Result<()> {
    match get_pid(config) {
        Some(pid) => println!("Daemon running (PID {})", pid),
        None => println!("Daemon not running"),
    }

    let journal = ReplyJournal::new(config);
    println!("Journaled replies: {}", journal.read_all().len());

    let settings = ReplySettings::load(config);
    println!("Whitelist only: {}", settings.whitelist_only);
    Ok(())
}

fn cmd_logs(config: &Config, lines: u32, follow: bool) -> Result<()> {
    let log_file = config.logs_dir.join("responder.log");
    if !log_file.exists() {
        println!("No log file at {}", log_file.display());
        return Ok(());
    }

    let mut cmd = Command::new("tail");
    cmd.arg("-n").arg(lines.to_string());
    if follow {
        cmd.arg("-f");
    }
    cmd.arg(&log_file);
    cmd.status()?;
    Ok(())
}

// ============================================================================
// Signal producers and journal commands
// ============================================================================

fn cmd_signal(config: &Config, signal: SignalCommand) -> Result<()> {
    let signal = match signal {
        SignalCommand::CallState { state, number } => Signal::CallState {
            state: state.parse::<PhoneState>()?,
            number,
        },
        SignalCommand::Notification { package, title, text } => {
            Signal::NotificationPosted { package, title, text }
        }
        SignalCommand::CallLog => Signal::CallLogChanged,
    };

    SignalSpool::new(config).push(&signal)?;
    println!("Signal queued");
    Ok(())
}

fn parse_cli_time(s: &str) -> Result<DateTime<Utc>> {
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%SZ")
        .map(|naive| naive.and_utc())
        .map_err(|_| Error::Parse(format!("bad time (want YYYY-MM-DDTHH:MM:SSZ): {}", s)))
}

fn cmd_history(
    config: &Config,
    contact: Option<&str>,
    from: Option<&str>,
    to: Option<&str>,
) -> Result<()> {
    let from = from.map(parse_cli_time).transpose()?;
    let to = to.map(parse_cli_time).transpose()?;

    let journal = ReplyJournal::new(config);
    let entries = journal.filter(contact, from, to);

    if entries.is_empty() {
        println!("No entries");
        return Ok(());
    }

    for entry in entries {
        println!("{}", format_history_line(&entry));
    }
    Ok(())
}

/// One `history` line. The contact is printed in its tagged storage form so
/// it can be passed straight back to `delete-entry`.
fn format_history_line(entry: &LogEntry) -> String {
    let source = match entry.caller.source {
        CallerSource::Pstn => "sms",
        CallerSource::ChatApp => "chat",
    };
    format!(
        "{}  [{}]  {}",
        journal::format_time(entry.time_utc),
        source,
        entry.contact()
    )
}

fn cmd_delete_entry(config: &Config, contact: &str, time: &str) -> Result<()> {
    let entry = LogEntry::new(CallerId::from_tagged(contact), parse_cli_time(time)?);

    let journal = ReplyJournal::new(config);
    if journal.delete(&entry)? {
        println!("Entry deleted");
    } else {
        println!("No matching entry");
    }
    Ok(())
}

fn cmd_get_settings(config: &Config) -> Result<()> {
    let settings = ReplySettings::load(config);
    println!("Auto-reply text: {}", settings.auto_reply_text);
    println!("Whitelist only:  {}", settings.whitelist_only);
    Ok(())
}

fn cmd_set_settings(
    config: &Config,
    message: Option<String>,
    whitelist_only: Option<bool>,
) -> Result<()> {
    let mut settings = ReplySettings::load(config);
    if let Some(message) = message {
        settings.auto_reply_text = message;
    }
    if let Some(whitelist_only) = whitelist_only {
        settings.whitelist_only = whitelist_only;
    }
    settings.save(config)?;
    println!("Settings saved");
    Ok(())
}

// ============================================================================
// Daemon loop
// ============================================================================

fn cmd_run(config: &Config) -> Result<()> {
    info!("Callback Later daemon starting");

    fs::create_dir_all(&config.state_dir)?;

    let journal = Arc::new(ReplyJournal::new(config));
    info!("Loaded {} journaled replies", journal.read_all().len());

    let engine = Engine::new(
        config,
        journal,
        CommandSender::new(config),
        CommandAlerts::new(config),
    );

    let (tx, rx) = mpsc::channel::<Signal>();
    let poll_interval = Duration::from_millis(config.poll_interval_ms);

    // Producer: drain the signal spool each tick
    {
        let tx = tx.clone();
        let spool = SignalSpool::new(config);
        std::thread::spawn(move || loop {
            match spool.drain() {
                Ok(signals) => {
                    for signal in signals {
                        if tx.send(signal).is_err() {
                            return;
                        }
                    }
                }
                Err(e) => warn!("Failed to drain signal spool: {}", e),
            }
            std::thread::sleep(poll_interval);
        });
    }

    // Producer: watch the call-log database for changes
    {
        let tx = tx.clone();
        let db_path = config.call_log_db.clone();
        std::thread::spawn(move || {
            let mut last_modified = fs::metadata(&db_path).and_then(|m| m.modified()).ok();
            loop {
                let modified = fs::metadata(&db_path).and_then(|m| m.modified()).ok();
                if modified.is_some() && modified != last_modified {
                    last_modified = modified;
                    if tx.send(Signal::CallLogChanged).is_err() {
                        return;
                    }
                }
                std::thread::sleep(poll_interval);
            }
        });
    }

    drop(tx);

    // Single consumer: all detection paths are serialized here
    for signal in rx {
        engine.handle_signal(signal, Utc::now());
    }

    Ok(())
}
