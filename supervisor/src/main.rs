//! CLI entrypoint for the pipeline supervisor.
//!
//! Wires [`SupervisorConfig`], [`Orchestrator`], and [`MissionManager`]
//! together behind the `start`/`recover`/`mission` surface (SPEC_FULL §6).

use std::io::Read as _;
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use supervisor::mission::{Mission, MissionStatus, Phase, PhaseStatus, Task, TaskStatus};
use supervisor::planning::{PlanningConfig, ProcessCriticAgent, ProcessPlannerAgent};
use supervisor::run::{RunDirectory, StateStore};
use supervisor::{BlockingRunSpawner, MissionManager, Orchestrator, SupervisorConfig};

#[derive(Parser, Debug)]
#[command(name = "supervisor")]
#[command(author, version, about = "Drives a Refiner/Builder/Verifier/Gatekeeper agent pipeline against a briefing")]
#[command(long_about = r#"
The supervisor runs a briefing through a four-stage pipeline of external
agent processes, coordinating them entirely through sentinel files on disk.

  supervisor start --briefing-file task.md
  supervisor recover --list
  supervisor recover run-20260727120000
  supervisor mission create mission-brief.md
  supervisor mission run <mission-id> 1
"#)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Project root to operate in (defaults to the current directory)
    #[arg(long, global = true, value_name = "DIR")]
    project: Option<PathBuf>,

    /// Path to supervisor.toml (defaults to <project>/supervisor.toml)
    #[arg(long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Verbosity (-v info, -vv debug, -vvv trace); default is warn
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Start a new pipeline run against a briefing
    Start {
        /// File containing the briefing text; reads stdin if omitted
        #[arg(long, value_name = "FILE")]
        briefing_file: Option<PathBuf>,
    },
    /// Recover a run left interrupted by a supervisor crash, or resume one
    /// parked on a human resolution
    Recover {
        run_id: Option<String>,

        /// List interrupted runs instead of recovering one
        #[arg(long)]
        list: bool,

        /// Recover every interrupted run found under the runs directory
        #[arg(long)]
        auto: bool,

        /// Restart an agent even if state.json still shows it running
        #[arg(long)]
        force: bool,
    },
    /// Multi-phase mission planning and execution
    Mission {
        #[command(subcommand)]
        command: MissionCommand,
    },
}

#[derive(Subcommand, Debug)]
enum MissionCommand {
    /// Plan a new mission from a description, via the Planner/Critic loop
    Create {
        description_file: PathBuf,

        /// Executable invoked for the Planner role (defaults to agent_command)
        #[arg(long)]
        planner_command: Option<String>,

        /// Executable invoked for the Critic role (defaults to agent_command)
        #[arg(long)]
        critic_command: Option<String>,
    },
    /// List known mission ids
    List,
    /// Print a mission's current status
    Status { mission_id: String },
    /// Promote a mission out of plan_review into ready
    Approve { mission_id: String },
    /// Run one phase's eligible tasks as pipeline runs
    Run {
        mission_id: String,
        phase: u32,

        /// Keep running remaining tasks even after one fails
        #[arg(long)]
        continue_on_failure: bool,
    },
    /// Print the phase/task kanban board for a mission
    Kanban { mission_id: String },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => EnvFilter::new("warn"),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();

    let project_root = cli.project.clone().unwrap_or_else(|| PathBuf::from("."));
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| project_root.join("supervisor.toml"));
    let config = SupervisorConfig::load_or_default(&config_path);

    let orchestrator = Orchestrator::new(project_root.clone(), config.clone());

    let code = match cli.command {
        Command::Start { briefing_file } => cmd_start(&orchestrator, briefing_file).await,
        Command::Recover { run_id, list, auto, force } => {
            cmd_recover(&orchestrator, &project_root, &config.app_dir_name, run_id, list, auto, force).await
        }
        Command::Mission { command } => cmd_mission(&config, &project_root, &orchestrator, command).await,
    };

    std::process::exit(code);
}

/// Watches for Ctrl-C and flips the returned receiver, mirroring SPEC_FULL
/// §5's cooperative-cancellation requirement for long-running commands.
fn spawn_cancel_on_ctrl_c() -> watch::Receiver<bool> {
    let (tx, rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            let _ = tx.send(true);
        }
    });
    rx
}

async fn cmd_start(orchestrator: &Orchestrator, briefing_file: Option<PathBuf>) -> i32 {
    let briefing = match briefing_file {
        Some(path) => match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) => {
                eprintln!("failed to read briefing file {}: {e}", path.display());
                return 1;
            }
        },
        None => {
            let mut buf = String::new();
            if let Err(e) = std::io::stdin().read_to_string(&mut buf) {
                eprintln!("failed to read briefing from stdin: {e}");
                return 1;
            }
            buf
        }
    };

    let cancel_rx = spawn_cancel_on_ctrl_c();
    match orchestrator.start_run_cancellable(&briefing, cancel_rx).await {
        Ok((run_id, outcome)) => {
            println!("run {run_id}: {outcome:?}");
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("start failed: {e}");
            1
        }
    }
}

async fn cmd_recover(
    orchestrator: &Orchestrator,
    project_root: &Path,
    app_dir_name: &str,
    run_id: Option<String>,
    list: bool,
    auto: bool,
    force: bool,
) -> i32 {
    let runs_root = project_root.join(format!(".{app_dir_name}")).join("runs");

    if list {
        let ids = match StateStore::list_run_ids(&runs_root) {
            Ok(ids) => ids,
            Err(e) => {
                eprintln!("failed to list runs: {e}");
                return 1;
            }
        };
        for id in ids {
            let store = StateStore::new(RunDirectory::new(project_root, app_dir_name, &id));
            match store.load() {
                Ok(Some(run)) if !run.phase.is_terminal() => {
                    println!("{id}\t{}\trunning={:?}", run.phase, run.running_agents());
                }
                Ok(_) => {}
                Err(e) => eprintln!("{id}: failed to read state: {e}"),
            }
        }
        return 0;
    }

    if auto {
        let ids = match StateStore::list_run_ids(&runs_root) {
            Ok(ids) => ids,
            Err(e) => {
                eprintln!("failed to list runs: {e}");
                return 1;
            }
        };
        let mut worst = 0;
        for id in ids {
            let store = StateStore::new(RunDirectory::new(project_root, app_dir_name, &id));
            let Ok(Some(run)) = store.load() else { continue };
            if run.phase.is_terminal() {
                continue;
            }
            if !run.running_agents().is_empty() && !force {
                eprintln!("{id}: has a running agent, skipping (pass --force to restart it)");
                worst = worst.max(1);
                continue;
            }
            match orchestrator.recover_run(&id).await {
                Ok(outcome) => {
                    println!("{id}: {outcome:?}");
                    worst = worst.max(outcome.exit_code());
                }
                Err(e) => {
                    eprintln!("{id}: recover failed: {e}");
                    worst = worst.max(1);
                }
            }
        }
        return worst;
    }

    let Some(run_id) = run_id else {
        eprintln!("recover requires a run id, or --list/--auto");
        return 2;
    };

    let store = StateStore::new(RunDirectory::new(project_root, app_dir_name, &run_id));
    match store.load() {
        Ok(Some(run)) if !run.running_agents().is_empty() && !force => {
            eprintln!(
                "{run_id}: has a running agent ({:?}); pass --force to restart it",
                run.running_agents()
            );
            return 1;
        }
        Ok(_) => {}
        Err(e) => {
            eprintln!("{run_id}: failed to read state: {e}");
            return 1;
        }
    }

    let cancel_rx = spawn_cancel_on_ctrl_c();
    match orchestrator.recover_run_cancellable(&run_id, cancel_rx).await {
        Ok(outcome) => {
            println!("run {run_id}: {outcome:?}");
            outcome.exit_code()
        }
        Err(e) => {
            eprintln!("recover failed: {e}");
            1
        }
    }
}

async fn cmd_mission(
    config: &SupervisorConfig,
    project_root: &Path,
    orchestrator: &Orchestrator,
    command: MissionCommand,
) -> i32 {
    let missions_root = project_root.join(format!(".{}", config.app_dir_name)).join("missions");
    let planning_config = PlanningConfig {
        max_iterations: config.planning_max_iterations,
        convergence_threshold: config.convergence_threshold,
        auto_approve_max_minor: config.auto_approve_max_minor,
    };
    let manager = MissionManager::new(&missions_root, planning_config);

    match command {
        MissionCommand::Create { description_file, planner_command, critic_command } => {
            let description = match std::fs::read_to_string(&description_file) {
                Ok(text) => text,
                Err(e) => {
                    eprintln!("failed to read {}: {e}", description_file.display());
                    return 1;
                }
            };
            let mut planner =
                ProcessPlannerAgent::new(planner_command.unwrap_or_else(|| config.agent_command.clone()), project_root);
            let mut critic =
                ProcessCriticAgent::new(critic_command.unwrap_or_else(|| config.agent_command.clone()), project_root);
            let briefings_dir = missions_root.join("briefings").join(Uuid::new_v4().to_string());

            match manager.create_mission(&description, &mut planner, &mut critic, |plan| {
                materialize_phases(&briefings_dir, plan)
            }) {
                Ok(mission) => {
                    print_mission(&mission);
                    0
                }
                Err(e) => {
                    eprintln!("create_mission failed: {e}");
                    1
                }
            }
        }
        MissionCommand::List => match manager.list() {
            Ok(ids) => {
                for id in ids {
                    println!("{id}");
                }
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
        MissionCommand::Status { mission_id } => match manager.status(&mission_id) {
            Ok(mission) => {
                print_mission(&mission);
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
        MissionCommand::Approve { mission_id } => match manager.approve_plan(&mission_id) {
            Ok(mission) => {
                print_mission(&mission);
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
        MissionCommand::Run { mission_id, phase, continue_on_failure } => {
            // `run_phase` blocks on child runs synchronously via
            // `BlockingRunSpawner`, which itself block_on's a fresh runtime;
            // `block_in_place` lets that nest inside this task without
            // tripping tokio's "runtime within a runtime" panic.
            let result = tokio::task::block_in_place(|| {
                let mut spawner = BlockingRunSpawner::new(orchestrator);
                manager.run_phase(&mission_id, phase, continue_on_failure, &mut spawner)
            });
            match result {
                Ok(mission) => {
                    let failed = mission.status == MissionStatus::Failed;
                    print_mission(&mission);
                    if failed {
                        1
                    } else {
                        0
                    }
                }
                Err(e) => {
                    eprintln!("{e}");
                    1
                }
            }
        }
        MissionCommand::Kanban { mission_id } => match manager.status(&mission_id) {
            Ok(mission) => {
                for phase in &mission.phases {
                    for task in &phase.tasks {
                        println!("{}\t{}\t{:?}", phase.number, task.task_id, task.status);
                    }
                }
                0
            }
            Err(e) => {
                eprintln!("{e}");
                1
            }
        },
    }
}

fn print_mission(mission: &Mission) {
    println!("{}\t{:?}", mission.mission_id, mission.status);
    for phase in &mission.phases {
        let status: PhaseStatus = phase.status;
        println!("  phase {} ({status:?}): {}", phase.number, phase.title);
        for task in &phase.tasks {
            let status: TaskStatus = task.status;
            println!("    {} [{status:?}] {}", task.task_id, task.title);
        }
    }
}

/// Turns a Planner's final plan JSON into materialised `Phase`/`Task`
/// records, writing each task's briefing prose to its own file so it can be
/// fed verbatim into a pipeline run later (`Task::briefing_path`).
///
/// Expects `final_plan` to be a JSON array of phase objects:
/// `[{"title", "description", "tasks": [{"title", "description",
/// "depends_on"?}]}]`. The draft body is agent-authored content the
/// supervisor otherwise treats opaquely; a plan that doesn't match this
/// shape materialises as zero phases rather than failing the mission.
fn materialize_phases(briefings_dir: &Path, final_plan: &serde_json::Value) -> Vec<Phase> {
    let Some(raw_phases) = final_plan.as_array() else {
        return Vec::new();
    };

    raw_phases
        .iter()
        .enumerate()
        .map(|(phase_index, raw_phase)| {
            let number = phase_index as u32 + 1;
            let phase_id = format!("phase-{number}");
            let title = raw_phase.get("title").and_then(|v| v.as_str()).unwrap_or("untitled phase");
            let description = raw_phase.get("description").and_then(|v| v.as_str()).unwrap_or("");

            let raw_tasks = raw_phase.get("tasks").and_then(|v| v.as_array()).cloned().unwrap_or_default();
            let tasks = raw_tasks
                .iter()
                .enumerate()
                .map(|(task_index, raw_task)| {
                    let task_id = format!("{phase_id}-task-{}", task_index + 1);
                    let task_title = raw_task.get("title").and_then(|v| v.as_str()).unwrap_or("untitled task");
                    let task_description = raw_task.get("description").and_then(|v| v.as_str()).unwrap_or("");
                    let depends_on = raw_task
                        .get("depends_on")
                        .and_then(|v| v.as_array())
                        .map(|deps| deps.iter().filter_map(|d| d.as_str().map(str::to_string)).collect())
                        .unwrap_or_default();

                    let briefing_path = briefings_dir.join(format!("{task_id}.md"));
                    let briefing = format!("# {task_title}\n\n{task_description}\n");
                    if let Some(parent) = briefing_path.parent() {
                        let _ = std::fs::create_dir_all(parent);
                    }
                    let _ = std::fs::write(&briefing_path, briefing.as_bytes());

                    Task {
                        task_id,
                        phase_id: phase_id.clone(),
                        title: task_title.to_string(),
                        briefing_path: briefing_path.to_string_lossy().into_owned(),
                        depends_on,
                        status: TaskStatus::Pending,
                        run_id: None,
                        carry_forward: None,
                        error: None,
                        agent_config_override: None,
                    }
                })
                .collect();

            Phase {
                phase_id,
                number,
                title: title.to_string(),
                description: description.to_string(),
                tasks,
                status: PhaseStatus::Pending,
                summary: None,
            }
        })
        .collect()
}
