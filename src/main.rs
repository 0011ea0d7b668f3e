/// Command-line entry point.
///
/// `robot <host>` downloads the photo into `foto.png`; `robot <host> <file>`
/// uploads the firmware image. Anything else prints usage. Packet traces and
/// lifecycle events go to stderr via tracing; banners go to stdout.

use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::Parser;

use robot_transfer::{
    receiver, sender, Connection, Mode, Transport, LOCAL_PORT, PHOTO_FILENAME, REMOTE_PORT,
};

#[derive(Parser)]
#[command(name = "robot", about = "Client for the robot UDP file-transfer protocol")]
struct Args {
    /// Robot server hostname or address
    host: Option<String>,
    /// Firmware image to upload; omit to download the photo
    file: Option<PathBuf>,
}

fn print_usage() {
    println!("Usage: robot <hostname> for photo download, robot <hostname> <file> for firmware upload");
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "robot_transfer=debug".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = match Args::try_parse() {
        Ok(args) => args,
        Err(_) => {
            print_usage();
            return;
        }
    };
    let Some(host) = args.host else {
        print_usage();
        return;
    };

    if let Err(e) = run(&host, args.file.as_deref()) {
        eprintln!("{:#}", e);
        std::process::exit(1);
    }
}

fn run(host: &str, file: Option<&Path>) -> anyhow::Result<()> {
    let remote: SocketAddr = (host, REMOTE_PORT)
        .to_socket_addrs()
        .with_context(|| format!("cannot resolve {}", host))?
        .find(SocketAddr::is_ipv4)
        .with_context(|| format!("{} did not resolve to an IPv4 address", host))?;

    println!("Connecting to {}:{}", host, REMOTE_PORT);
    let transport = Transport::bind(LOCAL_PORT, remote)?;
    let mut conn = Connection::new(transport);

    match file {
        None => {
            conn.open(Mode::Download)?;
            println!("\nDOWNLOADING STARTED\n");
            let result = receiver::run_download(&conn, Path::new(PHOTO_FILENAME))?;
            println!("\nDOWNLOADING FINISHED\n");
            println!(
                "Saved {} bytes to {} in {:.1}s ({} B/s)",
                result.total_bytes,
                PHOTO_FILENAME,
                result.elapsed.as_secs_f64(),
                result.throughput_bps
            );
        }
        Some(path) => {
            conn.open(Mode::Upload)?;
            let result = sender::run_upload(&conn, path)?;
            println!("\nUPLOADING FINISHED\n");
            println!(
                "Sent {} bytes in {:.1}s ({} B/s, {} retransmits)",
                result.total_bytes,
                result.elapsed.as_secs_f64(),
                result.throughput_bps,
                result.retransmits
            );
        }
    }
    Ok(())
}
