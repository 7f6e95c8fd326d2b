use std::sync::Arc;

use clap::Parser;
use couponpass::cli::{Args, build_config, init_logging, load_jwt_secret, open_database};
use couponpass::identity::UnconfiguredIdentityProvider;
use couponpass::run_server;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging(&args.log_format);

    let Some(jwt_secret) = load_jwt_secret(args.jwt_secret_file.as_deref()) else {
        std::process::exit(1);
    };

    let Some(db) = open_database(&args.database).await else {
        std::process::exit(1);
    };

    warn!("No identity provider configured; login callbacks will fail with 500");
    let config = build_config(&args, db, jwt_secret, Arc::new(UnconfiguredIdentityProvider));

    let addr = format!("0.0.0.0:{}", args.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .unwrap_or_else(|e| {
            error!(address = %addr, error = %e, "Failed to bind");
            std::process::exit(1);
        });

    match listener.local_addr() {
        Ok(local_addr) => info!(address = %local_addr, "Listening"),
        Err(e) => warn!(error = %e, "Listening on unknown address"),
    }

    if let Err(e) = run_server(config, listener).await {
        error!(error = %e, "Server error");
        std::process::exit(1);
    }
}
