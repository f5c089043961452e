use clap::Parser;
use matinee_lobby::{
    build_router,
    cli::{self, Cli, Commands},
    config::Config,
    rooms::RoomRegistry,
};
use tracing::{error, info};

#[tokio::main]
async fn main() {
    // Default to INFO if RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();

    if let Some(Commands::Probe { url, room }) = cli.command {
        if let Err(err) = cli::run_probe(url, room).await {
            error!("probe failed: {err:#}");
            std::process::exit(1);
        }
        return;
    }

    let config = Config::from_env();
    let registry = RoomRegistry::new();
    let app = build_router(registry);

    let addr = format!("{}:{}", config.bind_addr, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("failed to bind listener");

    info!("matinee lobby listening on {addr}");

    axum::serve(listener, app).await.expect("server error");
}
