use std::path::PathBuf;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dhcpclaim::lease::{self, Lease};
use dhcpclaim::options::{DHCP_OPTS, get_option_routes};
use dhcpclaim::{ClientConfig, Result};

#[derive(Parser)]
#[command(name = "dhcpclaim")]
#[command(author, version, about = "A developer-grade DHCPv4 client engine", long_about = None)]
struct Cli {
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[arg(short, long, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decode a cached lease file and print its contents.
    ShowLease { file: PathBuf },
    /// Print the hook environment a lease file would produce.
    Env {
        file: PathBuf,
        #[arg(short, long, default_value = "new")]
        prefix: String,
    },
    /// List the variables this client can hand to the hook script.
    PrintOptions,
}

fn load_config(cli: &Cli) -> Result<ClientConfig> {
    match &cli.config {
        Some(path) => ClientConfig::load_or_create(path),
        None => Ok(ClientConfig::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level)),
        )
        .init();

    let config = load_config(&cli)?;

    match &cli.command {
        Commands::ShowLease { file } => {
            let Some(msg) = lease::read_lease("cli", file) else {
                eprintln!("no lease at {}", file.display());
                std::process::exit(1);
            };

            let mut decoded = Lease::from_message(&msg);
            decoded.normalize_times("cli");

            println!("address:  {}/{}", decoded.addr, decoded.subnet_cidr());
            println!("broadcast: {}", decoded.brd);
            println!("server:   {}", decoded.server);
            if decoded.is_infinite() {
                println!("leased:   infinite");
            } else {
                println!(
                    "leased:   {} seconds (renew {}, rebind {})",
                    decoded.leasetime, decoded.renewaltime, decoded.rebindtime
                );
            }
            let (routes, _) = get_option_routes(&msg, &config.nomask);
            for route in routes {
                println!(
                    "route:    {}/{} via {}",
                    route.dest,
                    u32::from(route.net).count_ones(),
                    route.gate
                );
            }
            Ok(())
        }
        Commands::Env { file, prefix } => {
            let Some(msg) = lease::read_lease("cli", file) else {
                eprintln!("no lease at {}", file.display());
                std::process::exit(1);
            };
            for (key, value) in dhcpclaim::env::collect(prefix, &msg, &config.nomask) {
                println!("{}={}", key, value);
            }
            Ok(())
        }
        Commands::PrintOptions => {
            for param in [
                "ip_address",
                "subnet_cidr",
                "network_number",
                "filename",
                "server_name",
            ] {
                println!("    {}", param);
            }
            for opt in DHCP_OPTS {
                println!("{:03} {}", opt.option, opt.var);
            }
            Ok(())
        }
    }
}
