//! Chartpax cluster executable: the dispatcher, its replica roster, and the
//! control API.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::process::ExitCode;

use clap::Parser;
use log::{self, LevelFilter};
use chartpax::{
    logger_init, pf_error, pf_info, ChartpaxError, CtrlReactor, Dispatcher,
    DispatcherConfig, ReplicaId,
};
use tokio::runtime::Builder;
use tokio::sync::watch;

/// Command line arguments definition.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct CliArgs {
    /// Local IP to use for binding the listening sockets.
    #[arg(short, long, default_value_t = Ipv4Addr::LOCALHOST)]
    bind_ip: Ipv4Addr,

    /// Dispatcher control API port.
    /// This port must be available at process launch.
    #[arg(short, long, default_value_t = 52700)]
    ctrl_port: u16,

    /// Replica roster in assignment order; each id is also that replica's
    /// client API port (e.g., '-r 52701 -r 52702').
    #[arg(short, long, default_values_t = [52701, 52702, 52703, 52704, 52705])]
    replicas: Vec<ReplicaId>,

    /// Path to a TOML file overriding dispatcher config fields.
    #[arg(long)]
    config: Option<String>,

    /// Number of tokio worker threads.
    #[arg(long, default_value_t = 16)]
    threads: usize,
}

impl CliArgs {
    /// Sanitize command line arguments, return `Ok(())` on success or
    /// `Err(ChartpaxError)` on any error.
    fn sanitize(&self) -> Result<(), ChartpaxError> {
        if self.ctrl_port <= 1024 {
            return Err(ChartpaxError::msg(format!(
                "invalid ctrl_port {}",
                self.ctrl_port
            )));
        }
        if self.replicas.is_empty() {
            return Err(ChartpaxError::msg("empty replica roster"));
        }
        if self.threads < 2 {
            return Err(ChartpaxError::msg(format!(
                "invalid number of threads {}",
                self.threads
            )));
        }

        let mut seen = HashSet::new();
        for &id in &self.replicas {
            if id <= 1024 {
                return Err(ChartpaxError::msg(format!(
                    "invalid replica port {}",
                    id
                )));
            } else if id == self.ctrl_port {
                return Err(ChartpaxError::msg(format!(
                    "replica port == ctrl_port {}",
                    id
                )));
            } else if !seen.insert(id) {
                return Err(ChartpaxError::msg(format!(
                    "duplicate replica port {}",
                    id
                )));
            }
        }
        Ok(())
    }
}

/// Actual main function of the Chartpax cluster.
fn cluster_main() -> Result<(), ChartpaxError> {
    // read in and parse command line arguments
    let args = CliArgs::parse();
    args.sanitize()?;

    let config_str = match args.config {
        Some(ref path) => Some(std::fs::read_to_string(path)?),
        None => None,
    };
    let config = DispatcherConfig::from_toml(config_str.as_deref())?;

    let ctrl_addr = SocketAddr::new(IpAddr::V4(args.bind_ip), args.ctrl_port);

    // set up termination signals handler
    let (tx_term, mut rx_term) = watch::channel(false);
    ctrlc::set_handler(move || {
        if let Err(e) = tx_term.send(true) {
            pf_error!("d"; "error sending to term channel: {}", e);
        }
    })?;

    let log_level = log::max_level();
    {
        // create tokio multi-threaded runtime
        let runtime = Builder::new_multi_thread()
            .enable_all()
            .worker_threads(args.threads)
            .thread_name("tokio-worker-cluster")
            .build()?;

        // enter tokio runtime, bring up the dispatcher and its roster, and
        // serve until terminated
        runtime.block_on(async move {
            let dispatcher = Dispatcher::new_and_setup(
                config,
                Some(IpAddr::V4(args.bind_ip)),
                args.replicas,
            )
            .await?;
            let reactor =
                CtrlReactor::new_and_setup(ctrl_addr, dispatcher.clone())
                    .await?;

            rx_term.changed().await.map_err(|e| {
                ChartpaxError::msg(format!("term channel closed: {}", e))
            })?;
            pf_info!("d"; "terminating on signal");

            drop(reactor);
            dispatcher.shutdown().await;

            // suppress logging before dropping the runtime to avoid spurious
            // error messages
            log::set_max_level(LevelFilter::Off);

            Ok::<(), ChartpaxError>(()) // give type hint for this async closure
        })?;
    } // drop the runtime here

    log::set_max_level(log_level);
    Ok(())
}

/// Main function of the Chartpax cluster.
fn main() -> ExitCode {
    logger_init();

    if let Err(ref e) = cluster_main() {
        pf_error!("d"; "cluster_main exited: {}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
