mod apic;
mod config;
mod db;
mod dns;
mod table;
mod web;

use std::io::BufRead;
use std::time::Duration;

use clap::{Parser, Subcommand};
use env_logger::Env;
use futures::future::join_all;
use ipnetwork::IpNetwork;
use log::{error, info, warn};
use tokio::task;

use apic::filters::QueryFilters;
use apic::session::parse_token_feed_line;
use apic::{ApicClient, ApicError, DeploymentMode, SessionContext};
use dns::resolver::Resolution;
use table::EndpointTable;

#[derive(Parser)]
#[command(version)]
#[command(about = "Subnet endpoint browser for ACI controllers")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the web backend and keep the nameserver mirror in sync
    Serve,
    /// List the endpoints whose IP matches a subnet
    Endpoints {
        /// Subnet to browse, e.g. 10.0.0.0/24
        subnet: String,
        /// Reverse-resolve every listed IP
        #[arg(long)]
        resolve: bool,
    },
    /// Resolve one address through the cache and mirrored nameservers
    Resolve { ip: String },
    /// Log in to the controller and persist the session token pair
    Login,
    /// Refresh the nameserver mirror from the controller
    SyncDns,
    /// Read token hand-off messages from stdin (embedded deployments)
    AcceptTokens,
}

#[tokio::main]
async fn main() {
    env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    if let Err(e) = run(cli.command).await {
        error!("{}", e);
        std::process::exit(1);
    }
}

async fn run(command: Command) -> Result<(), Box<dyn std::error::Error>> {
    {
        let conn = db::new_connection_result()?;
        db::create_tables(&conn)?;
    }

    match command {
        Command::Serve => serve().await,
        Command::Endpoints { subnet, resolve } => {
            // Validate before the controller sees it; the query still carries
            // the literal as typed.
            subnet.parse::<IpNetwork>()?;

            let (client, session) = connect().await?;
            let records = client.list_endpoints(&session, &subnet).await?;

            let mut table = EndpointTable::new();
            table.replace_all(&records);
            info!("{} endpoints in {}", table.len(), subnet);
            if resolve && !table.is_empty() {
                resolve_all(&client, &session, &mut table).await;
            }
            print!("{}", table.render());
            Ok(())
        }
        Command::Resolve { ip } => {
            let resolution = match DeploymentMode::detect(&config::get_app_host()) {
                DeploymentMode::Standalone => dns::resolver::resolve_with_cache(&ip).await?,
                DeploymentMode::Embedded => {
                    let (client, session) = connect().await?;
                    resolve_ptr(&client, &session, &ip).await?
                }
            };
            println!(
                "{}  {}{}",
                resolution.ip,
                resolution.ptr,
                if resolution.cache { "  (cached)" } else { "" }
            );
            Ok(())
        }
        Command::Login => {
            let mode = DeploymentMode::detect(&config::get_app_host());
            let client = ApicClient::new(&controller_url(mode), config::verify_ssl())?;
            let mut session = SessionContext::new(mode);
            login_and_persist(&client, &mut session).await?;
            println!("session tokens stored");
            Ok(())
        }
        Command::SyncDns => {
            let (client, session) = connect().await?;
            let changed = dns::sync_dns_mirror(&client, &session).await?;

            let conn = db::new_connection_result()?;
            let providers = dns::DnsProvider::all(&conn)?;
            let domains = dns::DnsDomain::all(&conn)?;
            println!(
                "{} nameservers, {} domains{}",
                providers.len(),
                domains.len(),
                if changed {
                    " (nameserver set changed, cache cleared)"
                } else {
                    ""
                }
            );
            for provider in providers {
                println!(
                    "  {}{}",
                    provider.addr,
                    if provider.preferred { " (preferred)" } else { "" }
                );
            }
            for domain in domains {
                println!(
                    "  {}{}",
                    domain.name,
                    if domain.is_default { " (default)" } else { "" }
                );
            }
            Ok(())
        }
        Command::AcceptTokens => {
            let conn = db::new_connection_result()?;
            let mut session = SessionContext::new(DeploymentMode::Embedded);
            session.restore(&conn);

            let stdin = std::io::stdin();
            for line in stdin.lock().lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                let Some(message) = parse_token_feed_line(&line) else {
                    log::debug!("ignoring malformed feed line");
                    continue;
                };
                if session.accept_token_message(&message, &conn) {
                    info!("session tokens updated");
                }
            }
            Ok(())
        }
    }
}

/// Controller base URL for a deployment mode. A standalone run talks to the
/// configured controller; an embedded run talks to the host serving the app.
fn controller_url(mode: DeploymentMode) -> String {
    match mode {
        DeploymentMode::Standalone => config::get_apic_url(),
        DeploymentMode::Embedded => config::normalize_controller_url(&config::get_app_host()),
    }
}

async fn serve() -> Result<(), Box<dyn std::error::Error>> {
    let mode = DeploymentMode::detect(&config::get_app_host());
    let client = ApicClient::new(&controller_url(mode), config::verify_ssl())?;
    info!("{:?} deployment, controller at {}", mode, client.base());

    web::start(web::AppState {
        client: client.clone(),
        mode,
    });

    tokio::spawn(sync_loop(client, mode));

    wait_for_shutdown().await?;
    info!("shutting down");
    Ok(())
}

/// Periodic upkeep for a running server: keep the session healthy and the
/// nameserver mirror current. The interval is re-read every pass so a
/// settings change applies without a restart.
async fn sync_loop(client: ApicClient, mode: DeploymentMode) {
    loop {
        let mut session = SessionContext::new(mode);
        match db::new_connection_result() {
            Ok(conn) => {
                session.restore(&conn);
            }
            Err(e) => error!("Failed to open database: {}", e),
        }

        if !session_is_healthy(&client, &session).await {
            match mode {
                DeploymentMode::Standalone => {
                    if let Err(e) = login_and_persist(&client, &mut session).await {
                        error!("login failed: {}", e);
                    }
                }
                DeploymentMode::Embedded => {
                    warn!("session unhealthy; waiting for a token hand-off");
                }
            }
        }

        if session.has_tokens() {
            if let Err(e) = dns::sync_dns_mirror(&client, &session).await {
                error!("dns mirror sync failed: {}", e);
            }
        }

        let interval = db::get_setting_i64("dns_sync_interval_seconds", 60).max(5) as u64;
        tokio::time::sleep(Duration::from_secs(interval)).await;
    }
}

/// The session works if a minimal dn read succeeds.
async fn session_is_healthy(client: &ApicClient, session: &SessionContext) -> bool {
    if !session.has_tokens() {
        return false;
    }
    match client.get_dn(session, "uni", &QueryFilters::new()).await {
        Ok(_) => true,
        Err(e) => {
            warn!("session health check failed: {}", e);
            false
        }
    }
}

/// Client plus a query-ready session. Standalone runs always log in fresh;
/// embedded runs pick up the token pair handed off by the hosting side.
async fn connect() -> Result<(ApicClient, SessionContext), Box<dyn std::error::Error>> {
    let mode = DeploymentMode::detect(&config::get_app_host());
    let client = ApicClient::new(&controller_url(mode), config::verify_ssl())?;
    let mut session = SessionContext::new(mode);

    match mode {
        DeploymentMode::Standalone => {
            login_and_persist(&client, &mut session).await?;
        }
        DeploymentMode::Embedded => {
            let conn = db::new_connection_result()?;
            if !session.restore(&conn) {
                warn!("no stored session tokens; run accept-tokens first");
            }
        }
    }
    Ok((client, session))
}

async fn login_and_persist(
    client: &ApicClient,
    session: &mut SessionContext,
) -> Result<(), ApicError> {
    let (username, password) =
        config::get_login_credentials().ok_or(ApicError::MissingCredentials)?;
    client.login(session, &username, &password).await?;
    let conn = db::new_connection_result()?;
    session.persist(&conn)?;
    info!("session established for {}", username);
    Ok(())
}

/// Resolve every row concurrently. Results come back keyed by row index and
/// are applied through the table's IP check; failures leave the cell alone.
async fn resolve_all(client: &ApicClient, session: &SessionContext, table: &mut EndpointTable) {
    let targets: Vec<(usize, String)> = table
        .rows()
        .iter()
        .enumerate()
        .filter_map(|(index, row)| row.ip().map(|ip| (index, ip.to_string())))
        .filter(|(_, ip)| !ip.is_empty())
        .collect();

    let lookups = targets.into_iter().map(|(index, ip)| async move {
        let outcome = resolve_ptr(client, session, &ip).await;
        (index, ip, outcome)
    });

    for (index, ip, outcome) in join_all(lookups).await {
        match outcome {
            Ok(resolution) => {
                table.apply_resolution(index, &ip, &resolution.ptr);
            }
            Err(e) => error!("resolve failed for {}: {}", ip, e),
        }
    }
}

/// One lookup, routed the way the hosted UI routes it: through the backend
/// endpoint when embedded, locally when standalone.
async fn resolve_ptr(
    client: &ApicClient,
    session: &SessionContext,
    ip: &str,
) -> Result<Resolution, Box<dyn std::error::Error>> {
    match session.mode() {
        DeploymentMode::Embedded => {
            let reply = client.resolve_ip(session, ip).await?;
            let ptr = reply.ptr.ok_or_else(|| {
                ApicError::MalformedReply("resolve reply missing ptr".to_string())
            })?;
            Ok(Resolution {
                ip: reply.ip,
                ptr,
                cache: reply.cache,
            })
        }
        DeploymentMode::Standalone => Ok(dns::resolver::resolve_with_cache(ip).await?),
    }
}

async fn wait_for_shutdown() -> Result<(), Box<dyn std::error::Error>> {
    let (tx, rx) = std::sync::mpsc::channel();
    ctrlc::set_handler(move || {
        let _ = tx.send(());
    })?;
    task::spawn_blocking(move || rx.recv()).await??;
    Ok(())
}
