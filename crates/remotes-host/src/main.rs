//! Remotes host agent binary.

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::info;

use remotes_core::tracing_init::init_tracing;
use remotes_crypto::DEFAULT_KEY_BITS;
use remotes_host::agent::{ActionOutcome, EXIT_OK};
use remotes_host::executor::{CommandRunner, DEFAULT_INTERPRETER};
use remotes_host::monitor::run_monitor;
use remotes_host::{HostAgent, HostSettings};

#[derive(Parser, Debug)]
#[command(name = "remotes-host")]
#[command(version, about = "Remotes host agent - enrollment and command execution")]
struct Args {
    /// Settings file, given before the subcommand.
    #[arg(long, short = 'S', required = true, env = "REMOTES_SETTINGS_FILE")]
    settings: PathBuf,

    /// Interpreter used to run command bodies.
    #[arg(long, global = true, default_value = DEFAULT_INTERPRETER)]
    interpreter: String,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug)]
enum Action {
    /// Query the server status and remember its URL.
    Status {
        #[arg(long)]
        url: String,
    },
    /// Fetch the endpoint map.
    Discover,
    /// Generate the host keypair.
    GenerateKeys {
        #[arg(long)]
        private_key: PathBuf,
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,
    },
    /// Register the host public key.
    HostRegister {
        /// Registration token.
        #[arg(long, env = "REMOTES_REGISTRATION_TOKEN")]
        token: String,
    },
    /// Verify key possession and obtain the host token.
    HostVerify {
        #[arg(long, env = "REMOTES_REGISTRATION_TOKEN")]
        token: String,
    },
    /// Show the host identity as seen by the server.
    HostStatus,
    /// Generate keys, then status, discover, register and verify.
    NewHost {
        #[arg(long)]
        url: String,
        #[arg(long, env = "REMOTES_REGISTRATION_TOKEN")]
        token: String,
        #[arg(long)]
        private_key: PathBuf,
        #[arg(long)]
        public_key: PathBuf,
        #[arg(long, default_value_t = DEFAULT_KEY_BITS)]
        bits: usize,
    },
    /// List pending commands.
    CommandsList,
    /// Fetch, run and answer one command.
    CommandGet {
        #[arg(long)]
        command: i64,
    },
    /// Run every pending command once.
    CommandsProcess,
    /// Run pending commands every `interval` seconds until interrupted.
    CommandsMonitor {
        #[arg(long, default_value_t = 60)]
        interval: u64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("warn,remotes_host=info", args.log_json);

    let settings_path = args.settings;
    let settings = HostSettings::load(&settings_path)?;
    let mut agent = HostAgent::new(settings, CommandRunner::new(args.interpreter))?;

    let outcome = dispatch(&mut agent, args.action).await;
    // Settings gathered before a failure are still worth keeping.
    agent.settings().save(&settings_path)?;
    let outcome = outcome?;

    print_result(&outcome)?;
    if outcome.exit_code != EXIT_OK {
        std::process::exit(outcome.exit_code);
    }
    Ok(())
}

async fn dispatch(agent: &mut HostAgent, action: Action) -> anyhow::Result<ActionOutcome> {
    let outcome = match action {
        Action::Status { url } => agent.status(&url).await?,
        Action::Discover => agent.discover().await?,
        Action::GenerateKeys {
            private_key,
            public_key,
            bits,
        } => agent.generate_keys(&private_key, &public_key, bits)?,
        Action::HostRegister { token } => agent.host_register(&token).await?,
        Action::HostVerify { token } => agent.host_verify(&token).await?,
        Action::HostStatus => agent.host_status().await?,
        Action::NewHost {
            url,
            token,
            private_key,
            public_key,
            bits,
        } => {
            agent
                .new_host(&url, &token, &private_key, &public_key, bits)
                .await?
        }
        Action::CommandsList => agent.commands_list().await?,
        Action::CommandGet { command } => agent.command_get(command).await?,
        Action::CommandsProcess => agent.commands_process().await?,
        Action::CommandsMonitor { interval } => monitor(agent, interval).await,
    };
    Ok(outcome)
}

async fn monitor(agent: &HostAgent, interval: u64) -> ActionOutcome {
    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        info!("Received shutdown signal");
        on_signal.cancel();
    });
    run_monitor(agent, Duration::from_secs(interval.max(1)), cancel).await;
    ActionOutcome {
        exit_code: EXIT_OK,
        result: None,
    }
}

#[allow(clippy::print_stdout)]
fn print_result(outcome: &ActionOutcome) -> anyhow::Result<()> {
    if let Some(result) = &outcome.result {
        println!("{}", serde_json::to_string_pretty(result)?);
    }
    Ok(())
}

