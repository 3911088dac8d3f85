use anyhow::{Context, Result, bail};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;

use pitv_viewer::config::{self, ConfigStore, EndpointConfig, ServerList};
use pitv_viewer::lease::{
    LeaseClient, LeaseEvent, LeaseScheduler, LeaseTiming, StartOutcome,
};

#[tokio::main]
async fn main() -> Result<()> {
    let matches = build_cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    match matches.subcommand() {
        Some(("run", sub_m)) => run(sub_m).await,
        Some(("config", sub_m)) => match sub_m.subcommand() {
            Some(("init", m)) => config_init(store_for(m), m.get_flag("force")),
            Some(("show", m)) => config_show(store_for(m)),
            Some(("validate", m)) => config_validate(store_for(m)),
            Some(("sample", _)) => {
                print!("{}", ServerList::sample().to_toml()?);
                Ok(())
            }
            _ => bail!("Unknown config subcommand. Available: init, show, validate, sample"),
        },
        _ => bail!("No command given, try --help"),
    }
}

fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn build_cli() -> Command {
    Command::new("pitv-viewer")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Lease a camera stream from a PiTV server and keep the lease alive")
        .arg_required_else_help(true)
        .subcommand_required(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Enable debug logging"),
        )
        .subcommand(build_run_command())
        .subcommand(build_config_command())
}

fn build_run_command() -> Command {
    Command::new("run")
        .about("Acquire a camera lease and renew it until interrupted")
        .long_about(
            "Acquire a camera lease for the local UDP endpoint and renew it every \
             few seconds. Exits with an error as soon as a lease request fails; \
             Ctrl-C stops renewing and exits cleanly.",
        )
        .arg(config_path_arg().long("config").short('c'))
        .arg(
            Arg::new("server")
                .short('s')
                .long("server")
                .value_name("INDEX|URL")
                .help("Server list entry to use (defaults to the first)"),
        )
        .arg(
            Arg::new("server-url")
                .long("server-url")
                .value_name("URL")
                .help("Lease server URL; bypasses the server list"),
        )
        .arg(
            Arg::new("username")
                .short('u')
                .long("username")
                .value_name("USER")
                .help("Basic authentication user"),
        )
        .arg(
            Arg::new("password")
                .short('p')
                .long("password")
                .value_name("PASSWORD")
                .env("PITV_PASSWORD")
                .hide_env_values(true)
                .help("Basic authentication password"),
        )
        .arg(
            Arg::new("udp-endpoint")
                .long("udp-endpoint")
                .value_name("ADDR:PORT")
                .help("Local endpoint the stream is sent to"),
        )
}

fn build_config_command() -> Command {
    Command::new("config")
        .about("Manage the server list")
        .subcommand_required(true)
        .subcommand(
            Command::new("init")
                .about("Write a sample server list")
                .arg(config_path_arg())
                .arg(
                    Arg::new("force")
                        .short('f')
                        .long("force")
                        .action(ArgAction::SetTrue)
                        .help("Overwrite an existing file"),
                ),
        )
        .subcommand(
            Command::new("show")
                .about("Print the server list with passwords hidden")
                .arg(config_path_arg()),
        )
        .subcommand(
            Command::new("validate")
                .about("Check every server list entry")
                .arg(config_path_arg()),
        )
        .subcommand(Command::new("sample").about("Print a sample server list"))
}

fn config_path_arg() -> Arg {
    Arg::new("path")
        .value_name("PATH")
        .value_parser(clap::value_parser!(PathBuf))
        .help("Server list file (.toml or .json)")
}

fn store_for(matches: &ArgMatches) -> ConfigStore {
    match matches.get_one::<PathBuf>("path") {
        Some(path) => ConfigStore::new(path.clone()),
        None => ConfigStore::locate(),
    }
}

/// Endpoint from the command line, or from the server list with command-line
/// overrides applied
fn resolve_endpoint(matches: &ArgMatches) -> Result<EndpointConfig> {
    let mut endpoint = match matches.get_one::<String>("server-url") {
        Some(url) => {
            let mut endpoint = EndpointConfig::default();
            endpoint.set_server_url(url.clone());
            endpoint.set_local_udp_endpoint(config::guess_local_endpoint());
            endpoint
        }
        None => {
            let store = store_for(matches);
            let list = store
                .load_all()
                .with_context(|| format!("Cannot load server list {}", store.path().display()))?;
            let selector = matches.get_one::<String>("server").map_or("0", |s| s.as_str());
            list.find(selector)?.clone()
        }
    };

    if let Some(username) = matches.get_one::<String>("username") {
        endpoint.set_username(username.clone());
    }
    if let Some(password) = matches.get_one::<String>("password") {
        endpoint.set_password(password.clone());
    }
    if let Some(udp) = matches.get_one::<String>("udp-endpoint") {
        endpoint.set_local_udp_endpoint(udp.clone());
    }

    if let Err(problems) = endpoint.validate() {
        bail!("Invalid endpoint configuration: {}", problems.join("; "));
    }
    Ok(endpoint)
}

async fn run(matches: &ArgMatches) -> Result<()> {
    let endpoint = resolve_endpoint(matches)?;
    log::debug!("Using endpoint {:?}", endpoint);

    let client = LeaseClient::for_config(&endpoint, LeaseTiming::default())?;
    let (scheduler, mut events) = LeaseScheduler::spawn(client);

    if scheduler.start(endpoint).await? == StartOutcome::Disabled {
        println!("No lease server configured; nothing to do");
        scheduler.shutdown().await;
        return Ok(());
    }

    let outcome = loop {
        tokio::select! {
            event = events.recv() => match event {
                Some(LeaseEvent::Acquired { guid, endpoint }) => {
                    println!("Lease {} acquired, stream is sent to {}", guid, endpoint);
                }
                Some(LeaseEvent::Renewed { guid }) => log::info!("Lease {} renewed", guid),
                Some(LeaseEvent::Failed { message }) => break Err(message),
                Some(LeaseEvent::ProtocolViolation { message }) => break Err(message),
                Some(LeaseEvent::Disabled) | Some(LeaseEvent::Stopped) => break Ok(()),
                None => break Ok(()),
            },
            signal = tokio::signal::ctrl_c() => {
                if let Err(e) = signal {
                    log::warn!("Cannot listen for Ctrl-C: {}", e);
                }
                println!("Stopping");
                break Ok(());
            }
        }
    };

    if let Ok(snapshot) = scheduler.snapshot().await {
        log::debug!("Final lease state: {} after {} renewals", snapshot.phase, snapshot.renewals);
    }
    scheduler.shutdown().await;

    match outcome {
        Ok(()) => Ok(()),
        Err(message) => bail!("Lease lost: {}", message),
    }
}

fn config_init(store: ConfigStore, force: bool) -> Result<()> {
    if store.exists() && !force {
        bail!(
            "{} already exists, use --force to overwrite",
            store.path().display()
        );
    }
    store.save_all(&ServerList::sample())?;
    println!("Wrote sample server list to {}", store.path().display());
    Ok(())
}

fn config_show(store: ConfigStore) -> Result<()> {
    let mut list = store.load_all()?;
    for server in &mut list.servers {
        if !server.password().is_empty() {
            server.set_password("********");
        }
    }
    println!("# {}", store.path().display());
    print!("{}", list.to_toml()?);
    Ok(())
}

fn config_validate(store: ConfigStore) -> Result<()> {
    let list = store.load_all()?;
    match list.validate() {
        Ok(()) => {
            println!(
                "{}: {} server(s), all valid",
                store.path().display(),
                list.servers.len()
            );
            Ok(())
        }
        Err(problems) => {
            for problem in &problems {
                eprintln!("  - {}", problem);
            }
            bail!("{} problem(s) in {}", problems.len(), store.path().display())
        }
    }
}
