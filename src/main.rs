//! Jetpack Game Server
//!
//! Authoritative server binary: loads a map, binds a TCP port, and hosts
//! one two-player race at a fixed 60 Hz simulation rate.

use std::net::SocketAddr;

use anyhow::Context;
use tracing::{info, Level};
use tracing_subscriber::filter::{EnvFilter, LevelFilter};
use tracing_subscriber::FmtSubscriber;

use jetpack::network::server::{GameServer, ServerConfig};
use jetpack::{CellKind, TileMap, MAX_PLAYERS, TICK_RATE, VERSION};

struct Args {
    port: u16,
    map_file: String,
    debug: bool,
}

fn print_usage(binary: &str) {
    eprintln!("Usage: {binary} -p <port> -m <map> [-d]");
    eprintln!("  -p <port>  Port on which the server will listen");
    eprintln!("  -m <map>   Path to the map file");
    eprintln!("  -d         Enable debug logging");
}

fn parse_args(argv: &[String]) -> Option<Args> {
    let mut port: Option<u16> = None;
    let mut map_file: Option<String> = None;
    let mut debug = false;

    let mut i = 0;
    while i < argv.len() {
        match argv[i].as_str() {
            "-p" if i + 1 < argv.len() => {
                match argv[i + 1].parse::<u16>() {
                    Ok(p) if p > 0 => port = Some(p),
                    _ => {
                        eprintln!("Invalid port: {}", argv[i + 1]);
                        return None;
                    }
                }
                i += 2;
            }
            "-m" if i + 1 < argv.len() => {
                map_file = Some(argv[i + 1].clone());
                i += 2;
            }
            "-d" => {
                debug = true;
                i += 1;
            }
            other => {
                eprintln!("Unknown option: {other}");
                return None;
            }
        }
    }

    Some(Args {
        port: port?,
        map_file: map_file?,
        debug,
    })
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let argv: Vec<String> = std::env::args().collect();
    let Some(args) = parse_args(&argv[1..]) else {
        print_usage(&argv[0]);
        std::process::exit(1);
    };

    // -d raises the default level; RUST_LOG still wins when set.
    let level = if args.debug { Level::DEBUG } else { Level::INFO };
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::from_level(level).into())
                .from_env_lossy(),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .expect("Failed to set tracing subscriber");

    info!("Jetpack Server v{}", VERSION);
    info!("Tick Rate: {} Hz", TICK_RATE);
    info!("Roster Size: {} players", MAX_PLAYERS);

    let map = TileMap::load(&args.map_file)
        .with_context(|| format!("failed to load map {:?}", args.map_file))?;
    info!(
        "map loaded: {}x{} tiles, {} coins, {} hazards",
        map.width(),
        map.height(),
        map.count(CellKind::Coin),
        map.count(CellKind::Electric)
    );

    let config = ServerConfig {
        bind_addr: SocketAddr::from(([0, 0, 0, 0], args.port)),
        ..ServerConfig::default()
    };
    let server = GameServer::new(config, map);

    let ctrl_c_handle = server.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Ctrl-C received, shutting down");
            ctrl_c_handle.shutdown();
        }
    });

    server.run().await.context("server terminated")?;
    Ok(())
}
