use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use pnet::packet::arp::{ArpOperations, ArpPacket};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use dhcpcap::capture::PacketSocketProvider;
use dhcpcap::config::Config;
use dhcpcap::dispatch::{self, EventSource};
use dhcpcap::filter::{arp_filter, dhcp_filter, Program};
use dhcpcap::probe::{Probe, ProbeState};
use dhcpcap::{DeviceInfo, DhcpDevice, Protocol, ProtocolHandler, Session};

/// Upper bound on one dispatcher wait, so Ctrl+C is noticed promptly.
const MAX_WAIT: Duration = Duration::from_millis(500);

#[derive(Parser)]
#[command(name = "dhcpcap")]
#[command(about = "Link-layer DHCP/ARP capture")]
struct Cli {
    /// Configuration file (default: $DHCPCAP_CONFIG or /etc/dhcpcap.conf)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the kernel filter programs as installed on cooked sockets
    Filter {
        /// Only print this program
        #[arg(value_enum)]
        protocol: Option<ProtocolArg>,
    },
    /// Log validated DHCP payloads arriving on an interface
    Listen {
        /// Network interface to listen on (e.g., eth0)
        #[arg(short, long)]
        interface: Option<String>,
    },
    /// Log ARP replies arriving on an interface
    Arp {
        #[arg(short, long)]
        interface: Option<String>,
    },
    /// Broadcast a DHCPDISCOVER and wait for an offer
    Discover {
        #[arg(short, long)]
        interface: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum ProtocolArg {
    Dhcp,
    Arp,
}

/// Logs whatever the capture delivers.
struct Monitor;

impl ProtocolHandler for Monitor {
    fn process_dhcp_payload(&mut self, device: &mut DhcpDevice, payload: &[u8]) {
        if payload.len() < 8 {
            debug!("{}: short DHCP payload ({} bytes)", device.ifname(), payload.len());
            return;
        }
        let xid = u32::from_be_bytes([payload[4], payload[5], payload[6], payload[7]]);
        info!(
            "{}: DHCP op {} xid {:#010x} ({} bytes)",
            device.ifname(),
            payload[0],
            xid,
            payload.len()
        );
    }

    fn process_arp_payload(&mut self, device: &mut DhcpDevice, payload: &[u8]) {
        let Some(arp) = ArpPacket::new(payload) else {
            debug!("{}: short ARP frame ({} bytes)", device.ifname(), payload.len());
            return;
        };
        if arp.get_operation() != ArpOperations::Reply {
            return;
        }
        info!(
            "{}: ARP reply {} is at {}",
            device.ifname(),
            arp.get_sender_proto_addr(),
            arp.get_sender_hw_addr()
        );
    }

    fn retransmit(&mut self, device: &mut DhcpDevice) {
        device.clear_retransmit_deadline();
    }
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .context("Failed to load configuration")?;

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(&config.log_filter));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    match cli.command {
        Commands::Filter { protocol } => {
            if !matches!(protocol, Some(ProtocolArg::Arp)) {
                print_program("dhcp", dhcp_filter());
            }
            if !matches!(protocol, Some(ProtocolArg::Dhcp)) {
                print_program("arp", arp_filter());
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Listen { interface } => {
            let device = open_device(interface, &config)?;
            monitor(device, Protocol::Dhcp)
        }
        Commands::Arp { interface } => {
            let device = open_device(interface, &config)?;
            monitor(device, Protocol::Arp)
        }
        Commands::Discover { interface } => {
            let device = open_device(interface, &config)?;
            discover(device, &config)
        }
    }
}

fn print_program(name: &str, program: &Program) {
    println!("# {} ({} instructions)", name, program.len());
    for insn in program.instructions() {
        println!("{},", insn);
    }
}

fn open_device(interface: Option<String>, config: &Config) -> Result<DhcpDevice> {
    let Some(ifname) = interface.or_else(|| config.interface.clone()) else {
        bail!("No interface given (use -i or set `interface` in the config file)");
    };
    let info = DeviceInfo::from_system(&ifname)
        .with_context(|| format!("Failed to look up interface {}", ifname))?;
    info!(
        "{}: ifindex {}, link {:?}, mtu {}",
        info.ifname, info.ifindex, info.link_type, info.mtu
    );
    Ok(DhcpDevice::new(info, Box::new(PacketSocketProvider))
        .with_listen_socket(config.listen_socket))
}

fn install_ctrlc() -> Result<Arc<AtomicBool>> {
    let running = Arc::new(AtomicBool::new(true));
    let r = running.clone();
    ctrlc::set_handler(move || {
        r.store(false, Ordering::SeqCst);
    })
    .context("Failed to set Ctrl+C handler")?;
    Ok(running)
}

fn monitor(device: DhcpDevice, protocol: Protocol) -> Result<ExitCode> {
    let running = install_ctrlc()?;
    let mut session = Session::new(device, Monitor);
    info!("{}: capturing {} (Ctrl+C to stop)", session.device().ifname(), protocol);

    while running.load(Ordering::SeqCst) {
        // No-op while the capture is healthy.
        let device = session.device_mut();
        let opened = match protocol {
            Protocol::Dhcp => device.open_dhcp(),
            Protocol::Arp => device.open_arp(),
        };
        opened.with_context(|| format!("Failed to open {} capture", protocol))?;
        dispatch::run_once(&mut [&mut session as &mut dyn EventSource], MAX_WAIT)
            .context("Dispatcher failed")?;
    }

    info!("Stopped");
    Ok(ExitCode::SUCCESS)
}

fn discover(device: DhcpDevice, config: &Config) -> Result<ExitCode> {
    let Some(chaddr) = device.info().hwaddr else {
        bail!("{} has no hardware address", device.ifname());
    };

    let running = install_ctrlc()?;
    let probe = Probe::new(
        rand::random::<u32>(),
        chaddr,
        config.retransmit_interval(),
        config.max_retransmits,
    );
    let mut session = Session::new(device, probe);
    session
        .with_parts(|probe, device| probe.start(device))
        .context("Failed to start DHCP probe")?;

    while running.load(Ordering::SeqCst) && !session.handler().is_finished() {
        dispatch::run_once(&mut [&mut session as &mut dyn EventSource], MAX_WAIT)
            .context("Dispatcher failed")?;
    }

    match session.handler().state() {
        ProbeState::Offered(offer) => {
            println!("offer: {}", offer.yiaddr);
            if let Some(server) = offer.server_id {
                println!("server: {}", server);
            }
            if let Some(secs) = offer.lease_secs {
                println!("lease: {}s", secs);
            }
            Ok(ExitCode::SUCCESS)
        }
        ProbeState::TimedOut => {
            error!("No DHCPOFFER received");
            Ok(ExitCode::FAILURE)
        }
        ProbeState::Idle | ProbeState::Selecting => {
            info!("Interrupted");
            Ok(ExitCode::FAILURE)
        }
    }
}

