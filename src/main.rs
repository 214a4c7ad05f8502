//! pagestream: single page client server.
//!
//! Serves registered clients' pages over HTTP and multiplexes named
//! message channels over one WebSocket per browser.
//!
//! Usage:
//!   pagestream                              # Default port 7080, cwd as root
//!   pagestream --port 8080                  # Custom port
//!   pagestream --root /srv/site             # Application root
//!   pagestream --log-file                   # Log to <root>/logs/pagestream.log

mod demo;

use std::path::PathBuf;

use clap::Parser;
use pagestream_server::{AppOptions, pages_router};
use pagestream_transport::{MuxConfig, TransportConfig, TransportServer};
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "pagestream", about = "pagestream: single page clients over multiplexed WebSocket channels")]
struct Cli {
    /// Port to listen on (0 for OS-assigned)
    #[arg(long, default_value = "7080")]
    port: u16,

    /// Hostname to bind to
    #[arg(long, default_value = "127.0.0.1")]
    hostname: String,

    /// Application root directory (defaults to the current directory)
    #[arg(long)]
    root: Option<PathBuf>,

    /// Maximum concurrent connections
    #[arg(long, default_value = "256")]
    max_connections: usize,

    /// Static file directory, relative to the root
    #[arg(long)]
    static_dir: Option<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,

    /// Write logs to a file (defaults to <root>/logs/pagestream.log if no path given)
    #[arg(long, default_missing_value = "DEFAULT", num_args = 0..=1)]
    log_file: Option<String>,
}

fn app_options(cli: &Cli) -> AppOptions {
    let mut options = AppOptions::from_env();
    if let Some(root) = &cli.root {
        let root = root.canonicalize().unwrap_or_else(|_| root.clone());
        options = options.with_root(root);
    }
    if let Some(dir) = &cli.static_dir {
        options = options.with_static_dir(dir.clone());
    }
    options
}

fn init_tracing(cli: &Cli, options: &AppOptions) {
    let filter = if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };

    let Some(log_file_arg) = &cli.log_file else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return;
    };

    let log_path = if log_file_arg == "DEFAULT" {
        options.root.join("logs/pagestream.log")
    } else {
        PathBuf::from(log_file_arg)
    };
    if let Some(parent) = log_path.parent() {
        let _ = std::fs::create_dir_all(parent);
    }

    match std::fs::OpenOptions::new().create(true).append(true).open(&log_path) {
        Ok(file) => {
            tracing_subscriber::fmt()
                .with_env_filter(filter)
                .with_writer(std::sync::Mutex::new(file))
                .with_ansi(false)
                .init();
            eprintln!("Logging to {}", log_path.display());
        }
        Err(e) => {
            tracing_subscriber::fmt().with_env_filter(filter).init();
            error!("Failed to open log file {}: {e}", log_path.display());
        }
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let options = app_options(&cli);
    init_tracing(&cli, &options);

    let serving = match demo::build(options).and_then(|app| Ok(app.start()?)) {
        Ok(serving) => serving,
        Err(e) => {
            error!("Failed to start application: {e:#}");
            std::process::exit(1);
        }
    };

    // Surface system events in the log.
    let mut events = serving.events().subscribe();
    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!(kind = %event.kind(), ?event, "system event");
        }
    });

    let config = TransportConfig {
        port: cli.port,
        hostname: cli.hostname.clone(),
        max_connections: Some(cli.max_connections),
        mux: MuxConfig::default(),
        verbose_logging: cli.verbose,
    };

    let mut transport = match TransportServer::start(
        config,
        serving.router(),
        serving.broadcast_stream().clone(),
        serving.events().clone(),
        pages_router(serving.clone()),
    )
    .await
    {
        Ok(t) => t,
        Err(e) => {
            error!("Failed to start transport: {e}");
            std::process::exit(1);
        }
    };

    let port = transport.port();
    let context = serving.context();

    println!();
    println!("  pagestream {}", context.version());
    println!();
    println!("  Root:       {}", context.root().display());
    println!("  Env:        {}", context.env());
    println!("  Clients:    {}", serving.clients().names().collect::<Vec<_>>().join(", "));
    println!("  Pages:      http://{}:{port}/", cli.hostname);
    println!("  WebSocket:  ws://{}:{port}/ws", cli.hostname);
    println!();
    println!("  Press Ctrl+C to stop.");
    println!();

    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {e}");
    }

    info!("Shutting down...");
    transport.stop().await;
}
