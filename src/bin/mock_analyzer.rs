use std::net::{IpAddr, SocketAddr};

use clap::{Arg, Command};
use tracing::info;
use tracing_subscriber::EnvFilter;

use motion_analysis_client::mock_analyzer::MockAnalyzerServer;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let matches = Command::new("Mock Motion Analyzer")
        .version("0.1.0")
        .about("Mock analyzer answering streamed frames with synthesized results")
        .arg(
            Arg::new("port")
                .short('p')
                .long("port")
                .value_name("PORT")
                .help("Listening port")
                .default_value("4433"),
        )
        .arg(
            Arg::new("host")
                .short('H')
                .long("host")
                .value_name("HOST")
                .help("Listening host")
                .default_value("127.0.0.1"),
        )
        .get_matches();

    let port: u16 = matches
        .get_one::<String>("port")
        .expect("port has a default")
        .parse()
        .expect("Invalid port number");

    let host: IpAddr = matches
        .get_one::<String>("host")
        .expect("host has a default")
        .parse()
        .expect("Invalid host address");

    let mut server = MockAnalyzerServer::new();
    server.start(SocketAddr::new(host, port)).await?;

    info!("mock analyzer running; press Ctrl+C to stop");
    tokio::signal::ctrl_c().await?;

    server.shutdown();
    info!("mock analyzer stopped");
    Ok(())
}
