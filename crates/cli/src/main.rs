use std::io;
use std::process::ExitCode;
use std::time::Duration;

use bfcp::{ChairPolicy, ConferenceConfig, IpRestriction, Server, ServerConfig, TransportKind};
use clap::{Parser, ValueEnum};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Transport {
    Tcp,
    Udp,
}

impl From<Transport> for TransportKind {
    fn from(transport: Transport) -> Self {
        match transport {
            Transport::Tcp => TransportKind::Tcp,
            Transport::Udp => TransportKind::Udp,
        }
    }
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum Policy {
    /// Floors without a chair are accepted automatically
    Accept,
    /// Requests for floors without a chair are denied
    Deny,
}

impl From<Policy> for ChairPolicy {
    fn from(policy: Policy) -> Self {
        match policy {
            Policy::Accept => ChairPolicy::AutoAccept,
            Policy::Deny => ChairPolicy::AutoDeny,
        }
    }
}

/// One `--floors` entry: `id[:chair][@capacity]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct FloorSpec {
    id: u16,
    chair: u16,
    capacity: u16,
}

fn parse_floor(text: &str) -> Result<FloorSpec, String> {
    let (rest, capacity) = match text.split_once('@') {
        Some((rest, capacity)) => (
            rest,
            capacity
                .parse::<u16>()
                .map_err(|e| format!("invalid capacity {capacity:?}: {e}"))?,
        ),
        None => (text, 1),
    };
    let (id, chair) = match rest.split_once(':') {
        Some((id, chair)) => (
            id,
            chair
                .parse::<u16>()
                .map_err(|e| format!("invalid chair {chair:?}: {e}"))?,
        ),
        None => (rest, 0),
    };
    let id = id
        .parse::<u16>()
        .map_err(|e| format!("invalid floor id {id:?}: {e}"))?;
    if id == 0 {
        return Err("floor id must be non-zero".to_string());
    }
    Ok(FloorSpec {
        id,
        chair,
        capacity,
    })
}

#[derive(Parser)]
#[command(name = "bfcp-server", about = "Standalone BFCP floor control server")]
struct Args {
    /// Bind address (host:port)
    #[arg(long, short, default_value = "0.0.0.0:2345")]
    bind: String,

    #[arg(long, short, value_enum, default_value = "tcp")]
    transport: Transport,

    /// Maximum number of conferences
    #[arg(long, default_value_t = 16)]
    max_conferences: usize,

    /// Allowed client addresses; an octet of 0 matches anything
    #[arg(long, default_value = "0.0.0.0")]
    allow: String,

    /// Conference id to create
    #[arg(long, short, default_value_t = 1)]
    conference: u32,

    /// Floors as id[:chair][@capacity], comma separated (capacity 0 = unbounded)
    #[arg(long, value_delimiter = ',', value_parser = parse_floor)]
    floors: Vec<FloorSpec>,

    /// User ids, comma separated
    #[arg(long, short, value_delimiter = ',')]
    users: Vec<u16>,

    /// Outstanding requests allowed per user and floor
    #[arg(long, default_value_t = 1)]
    max_requests: u16,

    /// What to do with requests for floors that have no chair
    #[arg(long, value_enum, default_value = "accept")]
    policy: Policy,

    /// Seconds a chair has to act on a pending request
    #[arg(long, default_value_t = 300)]
    chair_wait: u64,
}

fn run(args: Args) -> bfcp::Result<()> {
    let config = ServerConfig {
        max_conferences: args.max_conferences,
        allow: IpRestriction::parse(&args.allow),
        ..Default::default()
    };
    let mut server = Server::with_config(&args.bind, config);

    let conference = ConferenceConfig {
        max_floors: args.floors.len().max(ConferenceConfig::default().max_floors),
        max_requests_per_floor: args.max_requests,
        policy: args.policy.into(),
        chair_wait: Duration::from_secs(args.chair_wait),
    };
    server.add_conference(args.conference, conference)?;
    for &user in &args.users {
        server.add_user(args.conference, user, None, None)?;
    }
    for floor in &args.floors {
        tracing::debug!(
            floor_id = floor.id,
            chair = floor.chair,
            capacity = floor.capacity,
            "adding floor"
        );
        server.add_floor(args.conference, floor.id, floor.chair, floor.capacity)?;
    }

    server.start(args.transport.into())?;

    println!(
        "BFCP server on {} (conference {}, {} floors, {} users), press Enter to stop",
        args.bind,
        args.conference,
        args.floors.len(),
        args.users.len()
    );
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;

    server.stop();
    Ok(())
}

fn main() -> ExitCode {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer())
        .with(filter)
        .init();

    match run(Args::parse()) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Failed to run server: {e}");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn floor_spec_forms() {
        assert_eq!(
            parse_floor("10").unwrap(),
            FloorSpec {
                id: 10,
                chair: 0,
                capacity: 1
            }
        );
        assert_eq!(
            parse_floor("10:5").unwrap(),
            FloorSpec {
                id: 10,
                chair: 5,
                capacity: 1
            }
        );
        assert_eq!(
            parse_floor("10:5@3").unwrap(),
            FloorSpec {
                id: 10,
                chair: 5,
                capacity: 3
            }
        );
        assert_eq!(parse_floor("7@0").unwrap().capacity, 0);
    }

    #[test]
    fn floor_spec_errors() {
        assert!(parse_floor("0").is_err());
        assert!(parse_floor("x").is_err());
        assert!(parse_floor("1:y").is_err());
        assert!(parse_floor("1@").is_err());
    }

    #[test]
    fn args_parse() {
        let args = Args::try_parse_from([
            "bfcp-server",
            "--transport",
            "udp",
            "--floors",
            "1:5,2@2",
            "--users",
            "5,6",
            "--policy",
            "deny",
        ])
        .unwrap();
        assert!(matches!(args.transport, Transport::Udp));
        assert_eq!(args.floors.len(), 2);
        assert_eq!(args.users, vec![5, 6]);
        assert!(matches!(args.policy, Policy::Deny));
        assert_eq!(args.chair_wait, 300);
    }
}
