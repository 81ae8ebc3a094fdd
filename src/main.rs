use axum::serve;
use clap::Parser;
use dbdash::bulk_write::BulkWriter;
use dbdash::config::Config;
use dbdash::http;
use dbdash::metrics::Metrics;
use dbdash::poller::{DashboardController, PollTiming};
use dbdash::scale::ScaleUnit;
use dbdash::settings::SettingsStore;
use dbdash::source::rpc::RpcStatsSource;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "dbdash")]
#[command(version)]
struct Cli {
    #[arg(long, default_value = "./config.yaml")]
    config: String,
    #[arg(long)]
    print_default_config: bool,
    #[arg(long, conflicts_with = "hide_db_stats")]
    show_db_stats: bool,
    #[arg(long, conflicts_with = "show_db_stats")]
    hide_db_stats: bool,
    /// Bytes, KiloBytes or MegaBytes
    #[arg(long)]
    scale: Option<ScaleUnit>,
}

#[tokio::main]
async fn main() {
    init_tracing();

    let cli = Cli::parse();
    if cli.print_default_config {
        println!("{}", Config::example_yaml());
        return;
    }

    let mut cfg = match Config::load_from_file(&cli.config) {
        Ok(cfg) => cfg,
        Err(err) => {
            error!(error = %err, "не удалось загрузить конфигурацию");
            std::process::exit(1);
        }
    };
    if cli.show_db_stats {
        cfg.settings.show_db_stats = true;
    } else if cli.hide_db_stats {
        cfg.settings.show_db_stats = false;
    }
    if let Some(scale) = cli.scale {
        cfg.settings.scale = Some(scale);
    }

    info!(
        listen = %cfg.listen,
        rpc = %cfg.rpc.base_url,
        poll_interval = %humantime::format_duration(cfg.dashboard.poll_interval),
        "запуск dbdash"
    );

    let metrics = match Metrics::new() {
        Ok(m) => m,
        Err(err) => {
            error!(error = %err, "не удалось инициализировать метрики");
            std::process::exit(1);
        }
    };
    let source = match RpcStatsSource::new(&cfg.rpc) {
        Ok(s) => Arc::new(s),
        Err(err) => {
            error!(error = %err, "не удалось создать RPC-клиент");
            std::process::exit(1);
        }
    };

    let settings = SettingsStore::new();
    let controller = Arc::new(DashboardController::mount(
        source.clone(),
        settings.clone(),
        metrics.clone(),
        PollTiming::from(&cfg.dashboard),
    ));
    let writer = Arc::new(BulkWriter::new(
        source,
        metrics.clone(),
        cfg.dashboard.history_limit,
        cfg.dashboard.replay_delay,
    ));
    settings.publish(cfg.settings);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let http_task = {
        let listen = cfg.listen.clone();
        let app = http::build_router(metrics, controller.clone(), writer);
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let addr: SocketAddr = match listen.parse() {
                Ok(addr) => addr,
                Err(err) => {
                    error!(error = %err, listen = %listen, "некорректный адрес listen");
                    return;
                }
            };

            let listener = match TcpListener::bind(addr).await {
                Ok(l) => l,
                Err(err) => {
                    error!(error = %err, "не удалось запустить HTTP-сервер");
                    return;
                }
            };

            let server = serve(listener, app).with_graceful_shutdown(async move {
                let _ = shutdown_rx.changed().await;
            });

            if let Err(err) = server.await {
                error!(error = %err, "ошибка HTTP-сервера");
            }
        })
    };

    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "не удалось дождаться Ctrl+C");
    }
    info!("получен Ctrl+C, выполняется остановка");

    controller.unmount();
    let _ = shutdown_tx.send(true);
    let _ = http_task.await;
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}
