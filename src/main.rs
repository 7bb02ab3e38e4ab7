//! `exchange-demo`: an illustrative binary wiring `exchange_core`'s library
//! components to axum. Mirrors the teacher's `main.rs` shape (tracing init,
//! config load, service construction, `AppState`, router, serve) with the
//! teacher's persistence/auth/blockchain layers replaced by this crate's
//! in-memory venue/validator/coordinator/pipeline.

use exchange_core::api::{self, AppState};
use exchange_core::config::AppConfig;
use exchange_core::coordinator::ResponseCoordinator;
use exchange_core::fees::{FeeCalculator, FeeSchedule};
use exchange_core::model::{Instrument, OptionType};
use exchange_core::phase::{PhaseManager, PhaseRules, PhaseScheduleConfig, PhaseType, PhaseTransitionHandler, PhaseTransitionOutcome, ScheduleEntry};
use exchange_core::pipeline::{self, Pipeline, PipelineServices};
use exchange_core::position::PositionStore;
use exchange_core::validator::{ConstraintConfig, ConstraintType, Validator, ValidatorConfig};
use exchange_core::venue::ExchangeVenue;
use exchange_core::ws::WebSocketFanout;
use rust_decimal::Decimal;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().unwrap_or_else(|err| {
        eprintln!("falling back to default configuration: {err}");
        AppConfig::default()
    });

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| config.log_filter.clone().into()))
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(environment = %config.environment, "starting exchange-demo v{}", env!("CARGO_PKG_VERSION"));

    let venue = Arc::new(build_venue());
    let validator = Arc::new(Validator::new(demo_validator_config()));
    let coordinator = Arc::new(ResponseCoordinator::new(config.coordinator_config()));
    let positions = Arc::new(PositionStore::new());
    let fees = Arc::new(FeeCalculator::new(demo_fee_schedules()));
    let websocket = Arc::new(WebSocketFanout::new());
    let phase_manager = Arc::new(PhaseManager::new(demo_phase_schedule()));

    let services = PipelineServices {
        venue: venue.clone(),
        validator,
        coordinator: coordinator.clone(),
        positions: positions.clone(),
        fees,
        websocket: websocket.clone(),
        phase_manager: phase_manager.clone(),
    };
    let pipeline = Pipeline::start(services, config.pipeline_config());

    spawn_phase_poller(phase_manager, venue.clone(), positions, config.phase_poll_interval());
    spawn_cleanup_sweeper(coordinator.clone(), config.cleanup_interval());

    let state = Arc::new(AppState {
        config: config.clone(),
        pipeline,
        coordinator: coordinator.clone(),
        venue,
        websocket,
    });

    let app = api::create_router(state);
    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    tracing::info!("listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(coordinator))
        .await?;

    Ok(())
}

async fn shutdown_signal(coordinator: Arc<ResponseCoordinator>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutdown signal received, draining in-flight requests");
    coordinator.shutdown();
}

fn build_venue() -> ExchangeVenue {
    let venue = ExchangeVenue::new();
    let mut call = Instrument::new("SPX_4500_CALL");
    call.strike = Some(Decimal::new(4500, 0));
    call.option_type = Some(OptionType::Call);
    call.underlying = Some("SPX".to_string());
    venue.add_instrument(call).expect("demo instrument listing cannot collide");

    let mut put = Instrument::new("SPX_4500_PUT");
    put.strike = Some(Decimal::new(4500, 0));
    put.option_type = Some(OptionType::Put);
    put.underlying = Some("SPX".to_string());
    venue.add_instrument(put).expect("demo instrument listing cannot collide");

    venue
}

/// A representative constraint registry: position/portfolio limits for
/// market makers, a size ceiling for retail, and a universal rate limit.
/// A production deployment would load this from the same `AppConfig`
/// overlay rather than hardcoding it, per spec §9's configuration surface.
fn demo_validator_config() -> ValidatorConfig {
    let mut role_constraints = HashMap::new();
    role_constraints.insert(
        "market_maker".to_string(),
        vec![
            ConstraintConfig {
                constraint: ConstraintType::PositionLimit { max_position: 500, symmetric: true },
                error_code: "MM_POSITION_LIMIT".to_string(),
                error_message: "market maker position limit exceeded".to_string(),
            },
            ConstraintConfig {
                constraint: ConstraintType::PortfolioLimit { max_total_position: 2000 },
                error_code: "MM_PORTFOLIO_LIMIT".to_string(),
                error_message: "market maker portfolio limit exceeded".to_string(),
            },
        ],
    );
    role_constraints.insert(
        "retail".to_string(),
        vec![ConstraintConfig {
            constraint: ConstraintType::OrderSize { min_size: 1, max_size: 100 },
            error_code: "RETAIL_ORDER_SIZE".to_string(),
            error_message: "order size outside retail limits".to_string(),
        }],
    );

    ValidatorConfig {
        role_constraints,
        universal_constraints: vec![ConstraintConfig {
            constraint: ConstraintType::OrderRate { max_orders_per_second: 20 },
            error_code: "ORDER_RATE".to_string(),
            error_message: "order submission rate exceeded".to_string(),
        }],
    }
}

fn demo_fee_schedules() -> HashMap<String, FeeSchedule> {
    let mut schedules = HashMap::new();
    schedules.insert(
        "market_maker".to_string(),
        FeeSchedule { maker_rebate: Decimal::new(2, 2), taker_fee: Decimal::new(-1, 2) },
    );
    schedules.insert(
        "retail".to_string(),
        FeeSchedule { maker_rebate: Decimal::new(-1, 2), taker_fee: Decimal::new(-3, 2) },
    );
    schedules
}

/// US-equity-style trading day: pre-open, a one-minute opening auction,
/// continuous trading, then closed. All times are US/Eastern local time.
fn demo_phase_schedule() -> PhaseScheduleConfig {
    use chrono::{NaiveTime, Weekday};

    let weekdays = vec![Weekday::Mon, Weekday::Tue, Weekday::Wed, Weekday::Thu, Weekday::Fri];
    let entries = vec![
        ScheduleEntry {
            weekdays: weekdays.clone(),
            start: NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
            end: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            phase_type: PhaseType::PreOpen,
        },
        ScheduleEntry {
            weekdays: weekdays.clone(),
            start: NaiveTime::from_hms_opt(9, 30, 0).unwrap(),
            end: NaiveTime::from_hms_opt(9, 31, 0).unwrap(),
            phase_type: PhaseType::OpeningAuction,
        },
        ScheduleEntry {
            weekdays,
            start: NaiveTime::from_hms_opt(9, 31, 0).unwrap(),
            end: NaiveTime::from_hms_opt(16, 0, 0).unwrap(),
            phase_type: PhaseType::Continuous,
        },
    ];

    let mut rules = HashMap::new();
    for phase_type in [PhaseType::PreOpen, PhaseType::OpeningAuction, PhaseType::Continuous, PhaseType::Closed] {
        rules.insert(phase_type, PhaseRules::default_for(phase_type));
    }

    PhaseScheduleConfig {
        timezone: chrono_tz::America::New_York,
        entries,
        rules,
    }
}

/// Polls the phase schedule at a fixed interval and reacts to transitions —
/// the opening auction fires and resting orders are swept at close without
/// any caller needing to invoke it directly, per spec §4.3.
fn spawn_phase_poller(
    phase_manager: Arc<PhaseManager>,
    venue: Arc<ExchangeVenue>,
    positions: Arc<PositionStore>,
    interval: std::time::Duration,
) {
    tokio::spawn(async move {
        let handler = PhaseTransitionHandler::new();
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let phase = phase_manager.resolve(chrono::Utc::now());
            match handler.on_tick(phase.phase_type, &venue) {
                PhaseTransitionOutcome::None => {}
                PhaseTransitionOutcome::BatchExecuted(results) => {
                    let trades: usize = results.iter().map(|r| r.trades.len()).sum();
                    tracing::info!(trades, instruments = results.len(), "opening auction executed");
                    pipeline::settle_auction_results(&positions, &results);
                }
                PhaseTransitionOutcome::OrdersCancelled(order_ids) => {
                    tracing::info!(count = order_ids.len(), "resting orders cancelled at close");
                }
            }
        }
    });
}

/// Sweeps expired/long-completed coordinator entries so `pending_count`
/// doesn't grow unbounded across a long-running process.
fn spawn_cleanup_sweeper(coordinator: Arc<ResponseCoordinator>, interval: std::time::Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            let removed = coordinator.cleanup_completed_requests();
            if removed > 0 {
                tracing::debug!(removed, "coordinator swept stale requests");
            }
        }
    });
}
