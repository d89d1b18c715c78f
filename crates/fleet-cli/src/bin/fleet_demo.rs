//! Fleet coordination demo.
//!
//! Runs the coordinator in-process against a manual clock:
//!
//! 1. `scenario clear`: one delivery in clear weather
//! 2. `scenario storm`: storm flight, critical obstacle, emergency dispatch, recovery
//! 3. `scenario contention`: airspace conflict, reschedule and priority bump
//! 4. `simulate`: seeded random fleet and order book
//!
//! Usage:
//!   cargo run -p fleet-cli --bin fleet_demo -- scenario storm
//!   cargo run -p fleet-cli --bin fleet_demo -- simulate --drones 20 --orders 60 --seed 7

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use chrono::Utc;
use clap::{Parser, Subcommand};
use fleet_cli::sim::flight::FlightLog;
use fleet_cli::sim::scenarios::{self, ScenarioKind};
use fleet_cli::sim::simulation::{run_simulation, SimulationReport};
use fleet_coordinator::loops::spawn_background_loops;
use fleet_coordinator::telemetry::init_tracing;
use fleet_coordinator::{AppState, Config};
use fleet_core::{BalancingAlgorithm, ManualClock, RebalanceOutcome};
use rand::rngs::StdRng;
use rand::SeedableRng;
use tokio::sync::broadcast;

#[derive(Parser, Debug)]
#[command(author, version, about = "Fleet coordination demo")]
struct Args {
    /// Emit logs as JSON lines
    #[arg(long, default_value_t = false)]
    json_logs: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a canned end-to-end scenario
    Scenario {
        #[arg(value_enum)]
        kind: ScenarioKind,
    },
    /// Simulate a random fleet
    Simulate {
        #[arg(long, default_value_t = 10)]
        drones: usize,
        #[arg(long, default_value_t = 30)]
        orders: usize,
        #[arg(long, default_value_t = 42)]
        seed: u64,
        /// round_robin, capacity_based, distance_based or ai_optimized
        #[arg(long, value_parser = parse_algorithm)]
        algorithm: Option<BalancingAlgorithm>,
    },
}

fn parse_algorithm(raw: &str) -> Result<BalancingAlgorithm, String> {
    BalancingAlgorithm::parse(raw).ok_or_else(|| format!("unknown balancing algorithm '{raw}'"))
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mut config = Config::from_env();
    init_tracing(args.json_logs || config.json_logs).context("failed to initialise tracing")?;

    if let Command::Simulate {
        algorithm: Some(algorithm),
        ..
    } = &args.command
    {
        config.algorithm = *algorithm;
    }

    let clock = Arc::new(ManualClock::new(Utc::now()));
    let state = Arc::new(AppState::new(config, clock));
    let (shutdown, _) = broadcast::channel(1);
    let loops = spawn_background_loops(state.clone(), &shutdown);

    println!("╔═══════════════════════════════════════════════════════════════╗");
    println!("║  FLEET COORDINATION DEMO                                      ║");
    println!("╚═══════════════════════════════════════════════════════════════╝\n");

    match args.command {
        Command::Scenario { kind } => run_scenario(&state, kind)?,
        Command::Simulate {
            drones, orders, seed, ..
        } => {
            println!("[SIMULATE] {} drones, {} orders, seed {}", drones, orders, seed);
            let mut rng = StdRng::seed_from_u64(seed);
            let report = run_simulation(&state, &mut rng, drones, orders)?;
            print_simulation(&report);
        }
    }

    // Let the event log drain before stopping the loops
    tokio::time::sleep(Duration::from_millis(100)).await;
    let _ = shutdown.send(());
    for handle in loops {
        handle.await.context("background loop panicked")?;
    }

    println!("\n╔═══════════════════════════════════════════════════════════════╗");
    println!("║  DEMO COMPLETE - {} events emitted", state.events().emitted());
    println!("╚═══════════════════════════════════════════════════════════════╝");
    Ok(())
}

fn run_scenario(state: &AppState, kind: ScenarioKind) -> anyhow::Result<()> {
    match kind {
        ScenarioKind::Clear => {
            println!("[SCENARIO] Clear weather delivery");
            let outcome = scenarios::run_clear(state)?;
            let route = &outcome.ticket.route;
            println!(
                "  Route {:016x}: {:.0}m, {:.0}s, score {:.1}, cruise {:.0}m",
                route.route_hash,
                route.distance_m,
                route.estimated_time_ms as f64 / 1000.0,
                route.optimization_score,
                route.cruise_altitude_m
            );
            println!("  Slot {} reserved", outcome.ticket.slot.slot_id);
            print_flight("DRONE001", &outcome.log);
            println!("  Final status: {}", outcome.summary.final_status.as_str());
        }
        ScenarioKind::Storm => {
            println!("[SCENARIO] Storm flight with critical obstacle");
            let outcome = scenarios::run_storm(state)?;
            println!(
                "  Score clear {:.1} vs storm {:.1}",
                outcome.clear_score, outcome.storm_score
            );
            if outcome.ticket.slot.rescheduled {
                println!("  Nominal window taken, flying at {}", outcome.ticket.slot.window.start);
            }
            print_flight("DRONE001 (before)", &outcome.before_escalation);

            println!("\n  ╔════════════════════════════════════════════════════════════╗");
            println!("  ║  EMERGENCY: {:?}", outcome.escalation.avoidance.decision.action);
            println!("  ╚════════════════════════════════════════════════════════════╝");
            match &outcome.escalation.emergency {
                Some(Ok(response)) => println!(
                    "  [DISPATCH] {} -> {:?} (eta {}s, {}%)",
                    response.response_id,
                    response.responders,
                    response.estimated_response_time_ms / 1000,
                    response.success_rate
                ),
                Some(Err(err)) => println!("  [DISPATCH] ⚠ {}", err),
                None => println!("  [DISPATCH] not required"),
            }
            if let Some(resolved) = &outcome.resolved {
                println!("  [RESOLVED] {} ({:?})", resolved.response_id, resolved.outcome);
            }

            print_flight("DRONE001 (after)", &outcome.after_recovery);
            println!(
                "  Final status: {} (emergency entered: {})",
                outcome.summary.final_status.as_str(),
                outcome.summary.entered_emergency
            );
        }
        ScenarioKind::Contention => {
            println!("[SCENARIO] Airspace contention");
            let outcome = scenarios::run_contention(state)?;
            println!("  DRONE001 slot {} at {}", outcome.first.slot_id, outcome.first.window.start);
            if let Some(err) = &outcome.rejected {
                println!("  DRONE002 ⚠ {}", err);
            }
            println!(
                "  DRONE002 rescheduled to slot {} at {}",
                outcome.rescheduled.slot_id, outcome.rescheduled.window.start
            );
            println!("  MEDIC01 emergency slot {}", outcome.priority.slot_id);
            for slot in &outcome.active {
                println!(
                    "    slot {:>3} {:<9} {} - {} {:?}{}",
                    slot.slot_id,
                    slot.agent_id,
                    slot.window.start.format("%H:%M"),
                    slot.window.end.format("%H:%M"),
                    slot.priority,
                    if slot.rescheduled { " (rescheduled)" } else { "" }
                );
            }
            let stats = outcome.stats;
            println!(
                "  Airspace: {} reserved, {} superseded, {} rebooked, {} active",
                stats.total_flights, stats.superseded_total, stats.rebooked_total, stats.active_slots
            );
        }
    }
    Ok(())
}

fn print_flight(label: &str, log: &FlightLog) {
    println!("  [{}] {} tick(s), ended {:?}", label, log.ticks, log.end);
    for decision in &log.decisions {
        println!(
            "    #{:<3} {:<18} {:>3}%  {}",
            decision.sequence,
            decision.action.label(),
            decision.confidence,
            decision.reason
        );
    }
}

fn print_simulation(report: &SimulationReport) {
    match &report.rebalance {
        RebalanceOutcome::Rebalanced {
            assigned,
            pending,
            efficiency_score,
        } => println!(
            "  [BALANCE] {} ({}): {} assigned, {} pending, efficiency {:.1}",
            report.balancer.algorithm.as_str(),
            report.registered,
            assigned,
            pending,
            efficiency_score
        ),
        RebalanceOutcome::Skipped { next_eligible_at } => {
            println!("  [BALANCE] skipped until {}", next_eligible_at)
        }
    }
    println!("  [FLIGHTS] {} planned", report.flights_planned);
    for (kind, count) in &report.rejections {
        println!("    rejected ({}): {}", kind, count);
    }
    println!(
        "  [FLIGHTS] {} arrived, {} aborted, {} reroute(s)",
        report.arrived, report.aborted, report.reroutes
    );
    let emergency = report.emergency_stats;
    println!(
        "  [EMERGENCY] {} flight(s) escalated, {} dispatched, {} succeeded, {} failed",
        report.emergencies, emergency.total_dispatched, emergency.successful_responses, emergency.failed_responses
    );
    let airspace = report.airspace_stats;
    println!(
        "  [AIRSPACE] {} reserved, {} superseded, {} rebooked, {} released",
        airspace.total_flights, airspace.superseded_total, airspace.rebooked_total, airspace.released_total
    );
}
