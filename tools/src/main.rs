//! timer-runner: drives the balance timer engine outside any UI.
//!
//! Usage:
//!   timer-runner --seed 7 --accounts 20 --minutes 720 --db run.db
//!   timer-runner --ipc-mode --db timers.db --config timer.json
//!   timer-runner --serve --db timers.db --config timer.json

use anyhow::{Context, Result};
use balance_timer_core::{
    clock::{Clock, ManualClock, SystemClock},
    config::TimerConfig,
    depletion,
    engine::{TickScope, TimerEngine},
    notifier::ThresholdState,
    record::TopupEntry,
    scheduler::TickLoop,
    store::TimerStore,
    types::Timestamp,
};
use chrono::{TimeZone, Utc};
use rand::Rng;
use rand::SeedableRng;
use rand_pcg::Pcg64Mcg;
use std::env;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

#[derive(serde::Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum IpcCommand {
    GetState,
    CreateAccount {
        user_id:  String,
        username: String,
    },
    Topup {
        user_id:    String,
        amount:     serde_json::Value,
        #[serde(default)]
        admin_name: Option<String>,
    },
    SetCoefficient {
        user_id:     String,
        coefficient: f64,
    },
    /// Restart the countdown from the stored balance.
    StartTimer {
        user_id:     String,
        #[serde(default)]
        coefficient: Option<f64>,
    },
    SetInitialTimer {
        user_id:     String,
        minutes:     f64,
        coefficient: f64,
    },
    SetContact {
        user_id: String,
        #[serde(default)]
        email:   Option<String>,
        #[serde(default)]
        phone:   Option<String>,
    },
    Tick {
        #[serde(default)]
        user_id: Option<String>,
    },
    History {
        #[serde(default)]
        user_id: Option<String>,
    },
    Quit,
}

#[derive(serde::Serialize)]
struct AccountView {
    user_id:     String,
    username:    String,
    email:       Option<String>,
    phone:       Option<String>,
    coefficient: f64,
    balance:     f64,
    deadline:    Option<Timestamp>,
    countdown:   String,
    threshold:   ThresholdState,
}

#[derive(serde::Serialize)]
struct UiState {
    now:      Timestamp,
    accounts: Vec<AccountView>,
}

#[derive(serde::Serialize)]
struct HistoryView {
    entries: Vec<TopupEntry>,
}

/// Entries returned by `history` without a user: the admin's recent list.
const RECENT_TOPUPS: usize = 100;

fn main() -> Result<()> {
    env_logger::init();

    let args: Vec<String> = env::args().collect();
    let seed = parse_arg(&args, "--seed", 42u64);
    let accounts = parse_arg(&args, "--accounts", 10usize);
    let minutes = parse_arg(&args, "--minutes", 600u64);
    let ipc_mode = args.iter().any(|a| a == "--ipc-mode");
    let serve = args.iter().any(|a| a == "--serve");
    let db = flag_value(&args, "--db").unwrap_or(":memory:");
    let config = match flag_value(&args, "--config") {
        Some(path) => TimerConfig::load(path)?,
        None => TimerConfig::default(),
    };

    if !ipc_mode {
        println!("timer-runner");
        println!("  mode:       {}", if serve { "serve" } else { "simulate" });
        println!("  db:         {db}");
        println!("  threshold:  {}", config.low_balance_threshold);
        if !serve {
            println!("  seed:       {seed}");
            println!("  accounts:   {accounts}");
            println!("  minutes:    {minutes}");
        }
        println!();
    }

    // Shared-memory URI so reopened connections see the same database.
    let db_effective: String = if db == ":memory:" {
        format!("file:timers_{}?mode=memory&cache=shared", epoch_secs())
    } else {
        db.to_string()
    };
    let store = TimerStore::open(&db_effective)?;
    store.migrate()?;

    if serve {
        let engine = TimerEngine::build(store, Arc::new(SystemClock), config)?;
        run_serve(engine)
    } else if ipc_mode {
        let mut engine = TimerEngine::build(store, Arc::new(SystemClock), config)?;
        run_ipc_loop(&mut engine)
    } else {
        let start = Utc
            .with_ymd_and_hms(2026, 1, 1, 0, 0, 0)
            .single()
            .context("simulation epoch")?;
        let clock = ManualClock::new(start);
        let mut engine = TimerEngine::build(store, Arc::new(clock.clone()), config)?;
        let stats = run_simulation(&mut engine, &clock, seed, accounts, minutes)?;
        print_summary(&engine, &stats)
    }
}

// ── serve ────────────────────────────────────────────────────────────

/// The engine is built before the runtime exists: its blocking HTTP
/// clients must not be created on a runtime thread.
fn run_serve(engine: TimerEngine) -> Result<()> {
    let runtime = tokio::runtime::Runtime::new()?;
    runtime.block_on(async move {
        let tick_loop = TickLoop::spawn(engine, TickScope::All);
        tokio::signal::ctrl_c().await?;
        log::info!("ctrl-c received, stopping");
        let engine = tick_loop.stop().await?;
        println!("stopped after {} ticks", engine.ticks_run());
        Ok::<(), anyhow::Error>(())
    })
}

// ── ipc ──────────────────────────────────────────────────────────────

fn run_ipc_loop(engine: &mut TimerEngine) -> Result<()> {
    let stdin = io::stdin();
    let mut stdout = io::stdout();
    let mut handle = stdin.lock();
    let mut buffer = String::new();

    loop {
        buffer.clear();
        let bytes_read = handle.read_line(&mut buffer)?;
        if bytes_read == 0 {
            break; // EOF
        }
        if buffer.trim().is_empty() {
            continue;
        }

        let cmd: IpcCommand = match serde_json::from_str(&buffer) {
            Ok(c) => c,
            Err(e) => {
                write_error(&mut stdout, &e.to_string())?;
                continue;
            }
        };
        if let IpcCommand::Quit = cmd {
            break;
        }

        match handle_command(engine, cmd) {
            Ok(reply) => writeln!(stdout, "{reply}")?,
            Err(e) => write_error(&mut stdout, &e.to_string())?,
        }
        stdout.flush()?;
    }
    Ok(())
}

fn handle_command(engine: &mut TimerEngine, cmd: IpcCommand) -> Result<serde_json::Value> {
    match cmd {
        IpcCommand::GetState | IpcCommand::Quit => {}
        IpcCommand::CreateAccount { user_id, username } => {
            engine.ensure_account(&user_id, &username)?;
        }
        IpcCommand::Topup { user_id, amount, admin_name } => {
            // The admin form sends text; scripts send numbers.
            match amount {
                serde_json::Value::String(raw) => {
                    engine.apply_topup_str(&user_id, &raw, admin_name.as_deref())?;
                }
                other => {
                    let amount = other.as_f64().unwrap_or(f64::NAN);
                    engine.apply_topup(&user_id, amount, admin_name.as_deref())?;
                }
            }
        }
        IpcCommand::SetCoefficient { user_id, coefficient } => {
            engine.set_coefficient(&user_id, coefficient)?;
        }
        IpcCommand::StartTimer { user_id, coefficient } => {
            let coefficient = match coefficient {
                Some(c) => c,
                None => engine.record(&user_id)?.coefficient,
            };
            engine.set_coefficient(&user_id, coefficient)?;
        }
        IpcCommand::SetInitialTimer { user_id, minutes, coefficient } => {
            engine.set_initial_timer(&user_id, minutes, coefficient)?;
        }
        IpcCommand::SetContact { user_id, email, phone } => {
            engine.set_contact(&user_id, email, phone)?;
        }
        IpcCommand::Tick { user_id } => {
            let scope = match user_id {
                Some(id) => TickScope::Account(id),
                None => TickScope::All,
            };
            engine.tick_scope(&scope)?;
        }
        IpcCommand::History { user_id } => {
            let entries = match user_id {
                Some(id) => engine.topup_history(&id)?,
                None => engine.recent_topups(RECENT_TOPUPS)?,
            };
            return Ok(serde_json::to_value(HistoryView { entries })?);
        }
    }
    Ok(serde_json::to_value(build_ui_state(engine)?)?)
}

fn build_ui_state(engine: &TimerEngine) -> Result<UiState> {
    let now = engine.now();
    let accounts = engine
        .accounts()?
        .into_iter()
        .map(|row| AccountView {
            balance: depletion::depleted_balance(&row.record, now),
            countdown: depletion::countdown(&row.record, now).to_string(),
            threshold: if row.record.notification_sent {
                ThresholdState::BelowThreshold
            } else {
                ThresholdState::Normal
            },
            user_id: row.record.account_id,
            username: row.contact.username,
            email: row.contact.email,
            phone: row.contact.phone,
            coefficient: row.record.coefficient,
            deadline: row.record.deadline,
        })
        .collect();
    Ok(UiState { now, accounts })
}

fn write_error(stdout: &mut io::Stdout, message: &str) -> Result<()> {
    let err_json = serde_json::json!({ "error": message });
    writeln!(stdout, "{err_json}")?;
    stdout.flush()?;
    Ok(())
}

// ── simulate ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct SimStats {
    topups:       u64,
    rejected:     u64,
    credited:     f64,
    expired:      usize,
    notified:     usize,
    failed_ticks: usize,
}

fn run_simulation(
    engine: &mut TimerEngine,
    clock: &ManualClock,
    seed: u64,
    accounts: usize,
    minutes: u64,
) -> Result<SimStats> {
    let mut rng = Pcg64Mcg::seed_from_u64(seed);
    let mut stats = SimStats::default();

    let ids: Vec<String> = (0..accounts).map(|i| format!("acct-{i:03}")).collect();
    for id in &ids {
        engine.ensure_account(id, id)?;
        let coefficient = f64::from(rng.gen_range(1u32..=10));
        let balance = f64::from(rng.gen_range(200u32..=5_000));
        engine.provision_balance(id, balance, coefficient)?;
    }

    for _ in 0..minutes {
        clock.advance_minutes(1);

        for id in &ids {
            // Roughly one top-up per account every ~3 hours.
            if rng.gen_bool(1.0 / 180.0) {
                let amount = f64::from(rng.gen_range(50u32..=2_000));
                match engine.apply_topup(id, amount, Some("sim")) {
                    Ok(_) => {
                        stats.topups += 1;
                        stats.credited += amount;
                    }
                    Err(e) => {
                        stats.rejected += 1;
                        log::warn!("simulated top-up on {id} rejected: {e}");
                    }
                }
            }
        }

        let summary = engine.tick_all()?;
        stats.expired += summary.expired;
        stats.notified += summary.notified;
        stats.failed_ticks += summary.failed;
    }
    log::debug!("simulation ended at {}", clock.now());
    Ok(stats)
}

fn print_summary(engine: &TimerEngine, stats: &SimStats) -> Result<()> {
    let rows = engine.accounts()?;
    let now = engine.now();
    let running = rows.iter().filter(|r| r.record.is_running()).count();
    let remaining: f64 = rows
        .iter()
        .map(|r| depletion::depleted_balance(&r.record, now))
        .sum();

    println!("=== RUN SUMMARY ===");
    println!("  sim clock:      {now}");
    println!("  ticks run:      {}", engine.ticks_run());
    println!("  accounts:       {}", rows.len());
    println!("  still running:  {running}");
    println!("  top-ups:        {} ({} rejected)", stats.topups, stats.rejected);
    println!("  credited:       {:.2}", stats.credited);
    println!("  expired:        {}", stats.expired);
    println!("  low-balance:    {}", stats.notified);
    println!("  failed ticks:   {}", stats.failed_ticks);
    println!("  balance left:   {remaining:.2}");

    println!();
    println!("=== ACCOUNTS ===");
    for row in &rows {
        println!(
            "  {} | {:>10.2} @ {:>4}/min | {}",
            row.record.account_id,
            depletion::depleted_balance(&row.record, now),
            row.record.coefficient,
            depletion::countdown(&row.record, now)
        );
    }
    Ok(())
}

fn flag_value<'a>(args: &'a [String], flag: &str) -> Option<&'a str> {
    args.windows(2).find(|w| w[0] == flag).map(|w| w[1].as_str())
}

fn parse_arg<T: std::str::FromStr + Copy>(args: &[String], flag: &str, default: T) -> T {
    args.windows(2)
        .find(|w| w[0] == flag)
        .and_then(|w| w[1].parse().ok())
        .unwrap_or(default)
}

fn epoch_secs() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
