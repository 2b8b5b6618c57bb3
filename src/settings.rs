use std::net::SocketAddr;
use std::sync::Arc;

use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use ipnet::IpNet;
use serde::de::DeserializeOwned;

use rsniff::sniffer::{detector_by_name, DetectorDescriptor, FakeDnsDetector, FakeDnsPool, Network};

const DEFAULT_CHUNK_SIZE: usize = 16;
const DEFAULT_DETECTORS: [&str; 3] = ["http", "tls", "bittorrent"];
const DEFAULT_FAKE_DNS_POOL: &str = "198.18.0.0/15";

/// Classify captured connection prefixes the way the proxy sniffs live traffic.
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// config file filepath
    #[clap(short, long, default_value = "config.yaml")]
    config: String,

    /// working directory
    #[clap(short, long, default_value = ".")]
    work_dir: String,

    /// transport the captures were taken from: tcp or udp
    #[clap(short, long, default_value = "tcp")]
    network: String,

    /// original destination of the captured connections
    #[clap(short, long)]
    target: Option<SocketAddr>,

    /// files holding the first bytes of a connection, one connection each
    #[clap(required = true)]
    inputs: Vec<String>,
}

pub struct Settings {
    pub debug: bool,
    pub chunk_size: usize,
    pub network: Network,
    pub target: Option<SocketAddr>,
    pub inputs: Vec<String>,
    pub registry: Vec<DetectorDescriptor>,
    pub fake_dns: Option<Arc<FakeDnsPool>>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let args = Args::parse();
        std::env::set_current_dir(&args.work_dir).map_err(|err| {
            ConfigError::Message(format!("cannot enter work dir {}: {}", args.work_dir, err))
        })?;

        let mut s = Config::new();
        s.merge(File::with_name(&args.config).required(false))?;
        s.merge(Environment::with_prefix("rsniff"))?;

        Self::from_config(&s, args)
    }

    fn from_config(s: &Config, args: Args) -> Result<Self, ConfigError> {
        let network = match args.network.as_str() {
            "tcp" => Network::Tcp,
            "udp" => Network::Udp,
            other => {
                return Err(ConfigError::Message(format!(
                    "network `{}` is not one of `tcp`, `udp`.",
                    other
                )))
            }
        };

        let chunk_size: usize = get_or(s, "chunk-size", DEFAULT_CHUNK_SIZE)?;
        if chunk_size == 0 {
            return Err(ConfigError::Message("chunk-size must be positive.".to_owned()));
        }

        /* 1. Metadata detectors run in their own pass, their position is irrelevant. */
        let mut registry = Vec::new();
        let mut fake_dns = None;
        for name in get_or::<Vec<String>>(s, "sniffing.metadata", Vec::new())? {
            match name.as_str() {
                "fakedns" => {
                    let pool = Arc::new(parse_fake_dns(s)?);
                    registry.push(DetectorDescriptor::metadata(Arc::new(FakeDnsDetector::new(
                        pool.clone(),
                    ))));
                    fake_dns = Some(pool);
                }
                other => {
                    return Err(ConfigError::Message(format!(
                        "{} is not a valid metadata detector.",
                        other
                    )))
                }
            }
        }

        /* 2. Content detectors, in priority order. */
        let default_detectors = DEFAULT_DETECTORS.iter().map(|v| v.to_string()).collect();
        for name in get_or::<Vec<String>>(s, "sniffing.detectors", default_detectors)? {
            let detector = detector_by_name(&name).ok_or_else(|| {
                ConfigError::Message(format!("{} is not a valid detector.", name))
            })?;
            registry.push(DetectorDescriptor::content(detector));
        }

        Ok(Settings {
            debug: get_or(s, "debug", false)?,
            chunk_size,
            network,
            target: args.target,
            inputs: args.inputs,
            registry,
            fake_dns,
        })
    }
}

fn get_or<T: DeserializeOwned>(s: &Config, key: &str, default: T) -> Result<T, ConfigError> {
    match s.get::<T>(key) {
        Ok(value) => Ok(value),
        Err(ConfigError::NotFound(_)) => Ok(default),
        Err(err) => Err(err),
    }
}

fn parse_fake_dns(s: &Config) -> Result<FakeDnsPool, ConfigError> {
    let pool = get_or(s, "sniffing.fake-dns.pool", DEFAULT_FAKE_DNS_POOL.to_owned())?;
    let range: IpNet = pool
        .parse()
        .map_err(|_| ConfigError::Message(format!("Wrong format for fake-dns pool: {}", pool)))?;

    let pool = FakeDnsPool::new(range);
    for domain in get_or::<Vec<String>>(s, "sniffing.fake-dns.domains", Vec::new())? {
        pool.assign(&domain).ok_or_else(|| {
            ConfigError::Message(format!("fake-dns pool {} has no usable address.", range))
        })?;
    }
    Ok(pool)
}
