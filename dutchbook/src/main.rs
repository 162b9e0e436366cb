//! dutchbook entry point.
//!
//! Task layout:
//! 1. two venue feed tasks (WebSocket, reconnect forever);
//! 2. the normalizer task folding feed messages into published books;
//! 3. the engine loop consuming books and spawning arb runners;
//! 4. balance refresh on an interval;
//! 5. the axum control plane (health / metrics / drain).
//!
//! Shutdown: SIGINT or `/drain` refuses new signals, the feeds are torn
//! down, and the engine drains in-flight legs under its deadline. Exit code
//! 0 on a clean shutdown, non-zero on startup auth or trade-log failure.

mod chain;
mod control;
mod settings;

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use dutchbook_data::kalshi::message::KalshiMessage;
use dutchbook_data::kalshi::ws::{KalshiFeed, WsAuth};
use dutchbook_data::polymarket::ws::PolymarketFeed;
use dutchbook_data::recorder::BookRecorder;
use dutchbook_data::{kalshi, polymarket, Normalizer};
use dutchbook_engine::engine::Engine;
use dutchbook_engine::exec::ArbRunner;
use dutchbook_engine::ledger::{JsonlTradeStore, TradeStore};
use dutchbook_engine::pairs::CrossVenueWhitelist;
use dutchbook_engine::risk::{RiskEngine, VenueHealth};
use dutchbook_engine::scan::{BookView, SpreadScanner};
use dutchbook_engine::FeeSchedule;
use dutchbook_execution::chain::ctf::CtfMerger;
use dutchbook_execution::gas::FixedGasOracle;
use dutchbook_execution::kalshi::sign::KalshiSigner;
use dutchbook_execution::kalshi::KalshiClient;
use dutchbook_execution::polymarket::sign::PolymarketCredentials;
use dutchbook_execution::polymarket::{PolymarketClient, PolymarketConfig};
use dutchbook_instrument::Venue;
use smol_str::SmolStr;
use tokio::sync::{mpsc, watch};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "dutchbook", about = "Negative-spread arbitrage engine for binary prediction markets")]
struct Cli {
    /// Path to the TOML configuration file.
    #[arg(long)]
    config: Option<String>,

    /// Verify venue credentials and exit.
    #[arg(long)]
    check_auth: bool,
}

/// Bridges the execution signer into the data crate's feed auth seam.
struct SignerWsAuth(KalshiSigner);

impl WsAuth for SignerWsAuth {
    fn ws_auth_headers(&self) -> Result<Vec<(&'static str, String)>, String> {
        Ok(self.0.ws_headers().to_vec())
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let settings = match Settings::load(cli.config.as_deref()) {
        Ok(settings) => settings,
        Err(err) => {
            error!(%err, "configuration error");
            return ExitCode::from(2);
        }
    };

    let Some(kalshi_settings) = settings.kalshi.clone() else {
        error!("missing [kalshi] configuration");
        return ExitCode::from(2);
    };
    let Some(poly_settings) = settings.polymarket.clone() else {
        error!("missing [polymarket] configuration");
        return ExitCode::from(2);
    };

    // Venue clients. A bad key is an unrecoverable auth failure at startup.
    let pem = match kalshi_settings.private_key() {
        Ok(pem) => pem,
        Err(err) => {
            error!(%err, "kalshi private key unavailable");
            return ExitCode::FAILURE;
        }
    };
    let kalshi_signer = match KalshiSigner::from_pem(&kalshi_settings.api_key, &pem) {
        Ok(signer) => signer,
        Err(err) => {
            error!(%err, "kalshi signer rejected the key");
            return ExitCode::FAILURE;
        }
    };
    let kalshi_client = Arc::new(KalshiClient::new(kalshi_signer.clone(), kalshi_settings.demo));

    let poly_client = match PolymarketClient::new(
        PolymarketConfig {
            credentials: PolymarketCredentials {
                api_key: poly_settings.api_key.clone(),
                api_secret: poly_settings.api_secret.clone(),
                api_passphrase: poly_settings.api_passphrase.clone(),
                wallet_address: poly_settings.wallet_address.clone(),
            },
            private_key_hex: poly_settings.private_key.clone(),
            neg_risk: poly_settings.neg_risk,
        },
        settings.token_map(),
    ) {
        Ok(client) => Arc::new(client),
        Err(err) => {
            error!(%err, "polymarket client construction failed");
            return ExitCode::FAILURE;
        }
    };

    if cli.check_auth {
        use dutchbook_execution::adapter::{KalshiOrderAdapter, PolymarketOrderAdapter};
        let mut failed = false;
        match kalshi_client.balance().await {
            Ok(balance) => info!(%balance, "kalshi auth ok"),
            Err(err) => {
                error!(%err, "kalshi auth failed");
                failed = true;
            }
        }
        match poly_client.balance().await {
            Ok(balance) => info!(%balance, "polymarket auth ok"),
            Err(err) => {
                error!(%err, "polymarket auth failed");
                failed = true;
            }
        }
        return if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS };
    }

    // Chain access for the merge path.
    let polygon = match chain::connect(&settings.app.polygon_rpc_url, &poly_settings.private_key) {
        Ok(chain) => chain,
        Err(err) => {
            error!(%err, "polygon chain setup failed");
            return ExitCode::FAILURE;
        }
    };
    let engine_config = settings.engine_config();
    let merger = Arc::new(CtfMerger::new(polygon, engine_config.merge_max_retries));
    if let Err(err) = merger.sync_nonce().await {
        warn!(%err, "nonce sync failed, starting from zero");
    }

    // Trade log.
    let store: Box<dyn TradeStore> = match JsonlTradeStore::open(&settings.app.trade_log) {
        Ok(store) => Box::new(store),
        Err(err) => {
            error!(%err, path = %settings.app.trade_log.display(), "cannot open trade log");
            return ExitCode::FAILURE;
        }
    };

    // Data plumbing.
    let (book_tx, book_rx) = mpsc::channel(1024);
    let (resync_tx, mut resync_rx) = mpsc::channel(64);
    let mut normalizer = Normalizer::new(settings.token_registry(), book_tx, resync_tx);
    if let Some(recorder) = BookRecorder::from_env() {
        normalizer = normalizer.with_recorder(recorder);
    }

    let (kalshi_msg_tx, mut kalshi_msg_rx) = mpsc::channel::<KalshiMessage>(1024);
    let (poly_msg_tx, mut poly_msg_rx) = mpsc::channel(1024);
    let (kalshi_resync_tx, kalshi_resync_rx) = mpsc::channel(64);
    let (poly_resync_tx, poly_resync_rx) = mpsc::channel(64);

    // Engine assembly.
    let fees = FeeSchedule::new(engine_config.poly_dynamic_fee_ceiling);
    let scanner = SpreadScanner::new(engine_config.clone(), fees.clone(), settings.pairs());
    let risk = RiskEngine::new(
        engine_config.clone(),
        fees.clone(),
        CrossVenueWhitelist::new(engine_config.cross_platform_whitelist.clone()),
    );
    let books = Arc::new(std::sync::RwLock::new(BookView::new()));
    let runner = Arc::new(ArbRunner::new(
        kalshi_client.clone(),
        poly_client.clone(),
        merger,
        engine_config.clone(),
        fees,
        books.clone(),
    ));
    let health = Arc::new(VenueHealth::default());
    let engine = Arc::new(Engine::new(
        kalshi_client,
        poly_client,
        runner,
        scanner,
        risk,
        Arc::new(FixedGasOracle::new(settings.app.gas_allowance_usdc)),
        store,
        health.clone(),
        books,
        engine_config.clone(),
    ));
    engine.refresh_balances().await;

    if !engine_config.enable_live_trading {
        info!("live trading disabled: signals will be recorded, no orders submitted");
    }

    // Feeds.
    let kalshi_tickers: Vec<SmolStr> = settings
        .markets
        .kalshi
        .iter()
        .map(|market| SmolStr::new(&market.ticker))
        .chain(
            settings
                .markets
                .cross_venue
                .iter()
                .map(|(ticker, _)| SmolStr::new(ticker)),
        )
        .collect();
    let poly_assets: Vec<SmolStr> = settings
        .markets
        .polymarket
        .iter()
        .flat_map(|market| {
            [SmolStr::new(&market.yes_token), SmolStr::new(&market.no_token)]
        })
        .collect();

    let kalshi_ws_url = if kalshi_settings.demo {
        kalshi::WS_URL_KALSHI_DEMO
    } else {
        kalshi::WS_URL_KALSHI
    };
    let kalshi_feed = KalshiFeed::new(
        kalshi_ws_url,
        SignerWsAuth(kalshi_signer),
        kalshi_tickers,
    );
    let feed_health = health.clone();
    let kalshi_feed_task = tokio::spawn(async move {
        if let Err(err) = kalshi_feed.run(kalshi_msg_tx, kalshi_resync_rx).await {
            error!(%err, "kalshi feed fatal, venue runs degraded");
            feed_health.set_live(Venue::Kalshi, false);
        }
    });

    let poly_feed = PolymarketFeed::new(polymarket::WS_URL_POLYMARKET, poly_assets);
    let poly_feed_task = tokio::spawn(async move {
        poly_feed.run(poly_msg_tx, poly_resync_rx).await;
    });

    // Normalizer task. One venue feed dying leaves the other publishing:
    // coverage degrades, the pipeline keeps running.
    let normalizer_task = tokio::spawn(async move {
        let mut kalshi_open = true;
        let mut poly_open = true;
        while kalshi_open || poly_open {
            tokio::select! {
                msg = kalshi_msg_rx.recv(), if kalshi_open => match msg {
                    None => kalshi_open = false,
                    Some(KalshiMessage::OrderbookSnapshot(snapshot)) => {
                        normalizer.on_kalshi_snapshot(&snapshot).await
                    }
                    Some(KalshiMessage::OrderbookDelta(delta)) => {
                        normalizer.on_kalshi_delta(&delta).await
                    }
                    Some(KalshiMessage::MarketLifecycle(lifecycle)) => {
                        normalizer.on_kalshi_lifecycle(&lifecycle).await
                    }
                    Some(KalshiMessage::Subscribed(_) | KalshiMessage::Error(_)) => {}
                },
                event = poly_msg_rx.recv(), if poly_open => match event {
                    None => poly_open = false,
                    Some(event) => normalizer.on_polymarket_book(&event).await,
                },
            }
        }
    });

    // Resync routing back to the owning feed. A closed feed just drops its
    // requests.
    let resync_task = tokio::spawn(async move {
        while let Some(request) = resync_rx.recv().await {
            match request.venue {
                Venue::Kalshi => {
                    let _ = kalshi_resync_tx.send(request).await;
                }
                Venue::Polymarket => {
                    let _ = poly_resync_tx.send(request).await;
                }
            }
        }
    });

    // Balance refresh.
    let refresh_engine = engine.clone();
    let refresh_secs = settings.app.balance_refresh_secs;
    let refresh_task = tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(std::time::Duration::from_secs(refresh_secs.max(1)));
        loop {
            interval.tick().await;
            refresh_engine.refresh_balances().await;
        }
    });

    // Control plane.
    let (drain_tx, mut drain_rx) = watch::channel(false);
    let control_task = tokio::spawn(control::serve(
        settings.app.control_addr.clone(),
        control::ControlState {
            metrics: engine.metrics(),
            health: engine.health(),
            drain: drain_tx.clone(),
        },
    ));

    let engine_task = tokio::spawn(engine.clone().run(book_rx));

    info!("dutchbook running");

    // Wait for SIGINT or an operator drain.
    tokio::select! {
        _ = tokio::signal::ctrl_c() => info!("interrupt received, shutting down"),
        _ = drain_rx.changed() => info!("drain received, shutting down"),
    }

    engine.drain();

    // Tear down the data path; closing the book channel lets the engine
    // loop fall through to its bounded drain.
    kalshi_feed_task.abort();
    poly_feed_task.abort();
    normalizer_task.abort();
    resync_task.abort();
    refresh_task.abort();

    if let Err(err) = engine_task.await {
        error!(%err, "engine task failed");
        return ExitCode::FAILURE;
    }
    control_task.abort();

    info!("shutdown complete");
    ExitCode::SUCCESS
}
