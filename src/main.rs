use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use chrono::{Local, TimeZone, Utc};
use clap::{Args, Parser, Subcommand};

use alarm_remote::alarm::schedule::{is_due_within, seconds_until_trigger};
use alarm_remote::api::{ApiServer, ApiServerConfig};
use alarm_remote::controller::{AlarmController, Intent, Status, UiState};
use alarm_remote::store_client::{
    DEFAULT_READ_URL, DEFAULT_WRITE_URL, Endpoints, HttpAlarmStore,
};

#[derive(Parser, Debug)]
#[command(
    name = "alarm-remote",
    version,
    about = "Remote alarm control client and alarm store"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fetch and display the current alarm
    Show {
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Set the alarm to the next occurrence of a time of day and arm it
    Set {
        /// Time of day, HH:MM or HH:MM:SS
        time: String,
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Arm or disarm the alarm
    Toggle {
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Report whether the alarm fires within a window from now
    Due {
        #[arg(long, default_value = "12m", value_parser = parse_duration_token)]
        window: chrono::Duration,
        #[command(flatten)]
        remote: RemoteArgs,
    },
    /// Run the alarm store backend
    Serve {
        #[arg(long, default_value = "127.0.0.1")]
        bind: String,
        #[arg(long, default_value_t = 8098)]
        port: u16,
        #[arg(long, default_value = "alarm.json")]
        store: PathBuf,
    },
}

#[derive(Args, Debug)]
struct RemoteArgs {
    #[arg(long, default_value = DEFAULT_READ_URL)]
    read_url: String,
    #[arg(long, default_value = DEFAULT_WRITE_URL)]
    write_url: String,
    /// How long to wait for the store before giving up on the answer
    #[arg(long, default_value = "10s", value_parser = parse_duration_token)]
    wait: chrono::Duration,
}

fn main() {
    init_logger();
    if let Err(err) = run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

fn init_logger() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp_millis()
        .init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Command::Show { remote } => {
            let state = run_remote(&remote, None)?;
            finish(&state)
        }
        Command::Set { time, remote } => {
            let state = run_remote(&remote, Some(Intent::SetTime(time)))?;
            finish(&state)
        }
        Command::Toggle { remote } => {
            let state = run_remote(&remote, Some(Intent::Toggle))?;
            finish(&state)
        }
        Command::Due { window, remote } => {
            let state = run_remote(&remote, None)?;
            if state.status == Status::Error {
                bail!("alarm store reported an error");
            }
            let now = Utc::now().timestamp();
            println!("{}", describe_due(&state, now, window));
            Ok(())
        }
        Command::Serve { bind, port, store } => {
            let server = ApiServer::start(ApiServerConfig {
                bind_addr: bind.clone(),
                port,
                store_path: store,
            })
            .with_context(|| format!("failed to start alarm store at {bind}:{port}"))?;
            server.wait();
            Ok(())
        }
    }
}

/// Startup read, then the optional intent, each waited on up to `--wait`.
fn run_remote(remote: &RemoteArgs, intent: Option<Intent>) -> Result<UiState> {
    let wait = remote
        .wait
        .to_std()
        .context("--wait must be a positive duration")?;
    let store = Arc::new(HttpAlarmStore::new(Endpoints {
        read_url: remote.read_url.clone(),
        write_url: remote.write_url.clone(),
    }));
    let mut controller = AlarmController::new(store);

    controller.start();
    if !controller.settle(wait) {
        bail!("alarm store did not answer within {}s", wait.as_secs_f64());
    }

    if let Some(intent) = intent {
        if !controller.dispatch(intent) {
            log::warn!("time of day not understood, alarm left unchanged");
        }
        if !controller.settle(wait) {
            log::warn!("save still pending after {}s", wait.as_secs_f64());
        }
    }
    Ok(controller.snapshot())
}

fn finish(state: &UiState) -> Result<()> {
    print!("{}", render(state));
    if state.status == Status::Error {
        bail!("alarm store reported an error");
    }
    Ok(())
}

fn render(state: &UiState) -> String {
    let mut out = format!("time:    {}\n", state.time_display);
    if state.config.trigger_epoch_seconds > 0
        && let Ok(seconds) = i64::try_from(state.config.trigger_epoch_seconds)
        && let Some(trigger) = Local.timestamp_opt(seconds, 0).single()
    {
        out.push_str(&format!(
            "trigger: {}\n",
            trigger.format("%Y-%m-%d %H:%M:%S")
        ));
    }
    out.push_str(if state.config.active {
        "active:  on\n"
    } else {
        "active:  off\n"
    });
    match state.status {
        Status::Idle => {}
        Status::Saving => out.push_str("status:  saving\n"),
        Status::Error => out.push_str("status:  error\n"),
    }
    out
}

fn describe_due(state: &UiState, now_epoch_seconds: i64, window: chrono::Duration) -> String {
    match seconds_until_trigger(&state.config, now_epoch_seconds) {
        None => "due: no (alarm disarmed)".to_string(),
        Some(remaining) if is_due_within(&state.config, now_epoch_seconds, window) => {
            format!("due: yes (in {})", format_duration_hms(remaining))
        }
        Some(remaining) if remaining < 0 => "due: no (trigger time has passed)".to_string(),
        Some(remaining) => format!("due: no (in {})", format_duration_hms(remaining)),
    }
}

fn format_duration_hms(total_secs: i64) -> String {
    let total_secs = total_secs.max(0);
    let hours = total_secs / 3600;
    let minutes = (total_secs % 3600) / 60;
    let seconds = total_secs % 60;
    format!("{hours:02}:{minutes:02}:{seconds:02}")
}

fn parse_duration_token(token: &str) -> Result<chrono::Duration> {
    let (raw, unit): (&str, fn(i64) -> chrono::Duration) =
        if let Some(raw) = token.strip_suffix("ms") {
            (raw, chrono::Duration::milliseconds)
        } else if let Some(raw) = token.strip_suffix('s') {
            (raw, chrono::Duration::seconds)
        } else if let Some(raw) = token.strip_suffix('m') {
            (raw, chrono::Duration::minutes)
        } else if let Some(raw) = token.strip_suffix('h') {
            (raw, chrono::Duration::hours)
        } else {
            (token, chrono::Duration::seconds)
        };

    let value: i64 = raw
        .parse()
        .with_context(|| format!("invalid duration '{token}'"))?;
    if value <= 0 {
        bail!("duration must be > 0");
    }
    Ok(unit(value))
}
