//! Remotes server binary.

use std::net::SocketAddr;
use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing::info;

use remotes_core::tracing_init::init_tracing;
use remotes_server::auth::{generate_token, hash_token};
use remotes_server::catalog::Catalog;
use remotes_server::storage::{SERVER_URL, ServerDatabase};
use remotes_server::{AppState, ServerConfig, build_router};

/// Username holding the host registration capability.
const REGISTRAR_USERNAME: &str = "register_hosts";

#[derive(Parser, Debug)]
#[command(name = "remotes-server")]
#[command(version, about = "Remotes server - host enrollment and encrypted command exchange")]
struct Args {
    /// Path to SQLite database file.
    #[arg(long, global = true, env = "REMOTES_DB_PATH")]
    db_path: Option<PathBuf>,

    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the HTTP API.
    Serve {
        /// Address to listen on.
        #[arg(long, default_value = "0.0.0.0:8000", env = "REMOTES_ADDR")]
        addr: SocketAddr,

        /// Public URL of this server, stored as the `server_url` setting.
        #[arg(long, env = "REMOTES_SERVER_URL")]
        server_url: Option<String>,
    },
    /// Rotate and print the host registration token.
    RegistrationToken,
    /// Manage the command catalog.
    Catalog {
        #[command(subcommand)]
        action: CatalogAction,
    },
}

#[derive(Subcommand, Debug)]
enum CatalogAction {
    /// Upsert settings, groups and commands from a TOML file.
    Load { file: PathBuf },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    init_tracing("info,remotes_server=debug", args.log_json);

    let db_path = match args.db_path {
        Some(p) => p,
        None => default_db_path()?,
    };
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let db = ServerDatabase::open(&db_path).await?;
    info!(path = %db_path.display(), "Database opened");

    match args.command {
        Command::Serve { addr, server_url } => serve(db, addr, server_url).await,
        Command::RegistrationToken => registration_token(&db).await,
        Command::Catalog {
            action: CatalogAction::Load { file },
        } => {
            let summary = Catalog::from_file(&file)?.apply(&db).await?;
            info!(?summary, file = %file.display(), "Catalog applied");
            Ok(())
        }
    }
}

async fn serve(
    db: ServerDatabase,
    addr: SocketAddr,
    server_url: Option<String>,
) -> anyhow::Result<()> {
    let mut config = ServerConfig::default();
    if let Some(url) = server_url {
        db.upsert_setting(SERVER_URL, Some(&url), "Public server URL", true)
            .await?;
        config.server_url = url;
    }

    let app = build_router(AppState::new(db, config));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %listener.local_addr()?, "Remotes server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Received shutdown signal");
        })
        .await?;

    info!("Server stopped");
    Ok(())
}

#[allow(clippy::print_stdout)]
async fn registration_token(db: &ServerDatabase) -> anyhow::Result<()> {
    let user = match db.get_user_by_username(REGISTRAR_USERNAME).await? {
        Some(user) => user,
        None => db.create_user(REGISTRAR_USERNAME, true).await?,
    };
    anyhow::ensure!(
        user.can_register_hosts,
        "user {REGISTRAR_USERNAME} exists without the registration permission"
    );

    let token = generate_token();
    db.set_token(user.id, &hash_token(&token)).await?;
    info!(user_id = user.id, "Registration token rotated");

    println!("{token}");
    Ok(())
}

fn default_db_path() -> anyhow::Result<PathBuf> {
    let home =
        dirs::home_dir().ok_or_else(|| anyhow::anyhow!("Cannot determine home directory"))?;
    Ok(home.join(".remotes").join("server.db"))
}
