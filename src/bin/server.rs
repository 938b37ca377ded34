use anyhow::Context;
use clap::Parser;

/// Accepts bonded UDP paths from a linkbond client and bridges them to a TUN device.
#[derive(Debug, Parser)]
#[command(name = "linkbond-server", version, about)]
struct Cli {
    /// Name of the TUN device to create (assigned by the kernel if omitted)
    #[arg(long)]
    tun: Option<String>,

    /// MTU of the TUN device
    #[arg(long, default_value_t = 1400)]
    mtu: u16,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Address to listen on, e.g. 0.0.0.0:7000
    #[arg(value_name = "BIND")]
    bind: std::net::SocketAddr,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::INFO,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt().with_max_level(level).init();
}

#[cfg(target_os = "linux")]
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let config = linkbond::Config::default();

    anyhow::ensure!(
        usize::from(cli.mtu) <= config.packet_size_max(),
        "MTU {} exceeds the maximum packet size of {}",
        cli.mtu,
        config.packet_size_max()
    );

    let mut tun = linkbond::tun::TunPort::new(cli.tun.as_deref(), cli.mtu)
        .context("failed to create TUN device (root privileges required)")?;

    let mut server = linkbond::ChannelServer::bind_with_config(cli.bind, config)
        .with_context(|| format!("failed to bind {}", cli.bind))?;

    tracing::info!(
        tun = tun.name(),
        local = %server.local_addr(),
        "server running"
    );

    server.run(&mut tun)?;

    Ok(())
}

#[cfg(not(target_os = "linux"))]
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    anyhow::bail!("TUN devices are only supported on Linux")
}
