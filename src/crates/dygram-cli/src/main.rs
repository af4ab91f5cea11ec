//! CLI surface for running DyGram machines: `execute` drives one run (or one
//! step of one, depending on granularity flags); `exec` inspects and manages
//! the on-disk execution directory `dygram-checkpoint` owns.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use dygram_checkpoint::{
    hash_bytes, ExecutionMetadata as CheckpointMetadata, ExecutionMode as CheckpointMode, ExecutionStatus,
    ExecutionStore, RecordingReader, RecordingWriter,
};
use dygram_core::config::{PartialRuntimeConfig, RuntimeConfig};
use dygram_core::descriptor;
use dygram_core::executor::{EffectExecutor, VirtualFilesystem};
use dygram_core::machine::Machine;
use dygram_core::runtime::Runtime;
use dygram_core::state::{ExecutionState, Path as ExecPath, RunMode};
use dygram_core::tool::{ToolDescriptor, ToolRegistry};
use dygram_core::turn_loop::{MachineExecutor, Suspension};
use dygram_llm::{AnthropicConfig, ClaudeTransport, ScriptedTransport};
use dygram_tooling::{ConstructToolHandler, GetMachineDefinitionTool, ReadFileTool, UpdateDefinitionTool, WriteFileTool};

#[derive(Parser)]
#[command(name = "dygram")]
#[command(about = "Run and inspect DyGram executable state-machine graphs", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run (or resume) a machine, one granularity unit at a time or to completion.
    Execute {
        /// Path to the machine definition JSON. Defaults to `machine.json`.
        file: Option<PathBuf>,

        #[arg(long)]
        interactive: bool,
        #[arg(long)]
        step: bool,
        #[arg(long = "step-turn")]
        step_turn: bool,
        #[arg(long = "step-path")]
        step_path: bool,

        /// Execution id to resume; a fresh id is generated if omitted.
        #[arg(long)]
        id: Option<String>,
        /// Resume despite a machine-hash mismatch against the stored execution.
        #[arg(long)]
        force: bool,
        /// Replay LLM turns from this directory instead of calling the live transport.
        #[arg(long)]
        playback: Option<PathBuf>,
        /// Record every LLM turn to this directory as it's made.
        #[arg(long)]
        record: Option<PathBuf>,
        /// Override the default model id.
        #[arg(long)]
        model: Option<String>,
    },

    /// Inspect or manage on-disk executions.
    Exec {
        #[command(subcommand)]
        command: ExecCommands,
    },
}

#[derive(Subcommand)]
enum ExecCommands {
    List,
    Status { id: String },
    Show {
        id: String,
        #[arg(long, default_value = "text")]
        format: String,
    },
    Rm { id: String },
    Clean {
        #[arg(long)]
        all: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();

    let cli = Cli::parse();
    let exit_code = match cli.command {
        Commands::Execute { file, interactive, step, step_turn, step_path, id, force, playback, record, model } => {
            run_execute(file, interactive, step, step_turn, step_path, id, force, playback, record, model).await?
        }
        Commands::Exec { command } => run_exec(command)?,
    };
    std::process::exit(exit_code);
}

fn load_config() -> Result<RuntimeConfig> {
    let mut config = RuntimeConfig::default();
    if let Ok(raw) = std::fs::read_to_string("dygram.toml") {
        let partial: PartialRuntimeConfig = toml::from_str(&raw).context("parsing dygram.toml")?;
        config = config.merge_project_file(partial);
    }
    Ok(config)
}

#[allow(clippy::too_many_arguments)]
async fn run_execute(
    file: Option<PathBuf>,
    interactive: bool,
    step: bool,
    step_turn: bool,
    step_path: bool,
    id: Option<String>,
    force: bool,
    playback: Option<PathBuf>,
    record: Option<PathBuf>,
    model: Option<String>,
) -> Result<i32> {
    if playback.is_some() && record.is_some() {
        bail!("cannot pass both --playback and --record for the same session");
    }

    let mut config = load_config()?;
    if let Some(model) = model {
        config.default_model = model;
    }

    let machine_path = file.unwrap_or_else(|| PathBuf::from("machine.json"));
    let machine_bytes = std::fs::read(&machine_path).with_context(|| format!("reading {}", machine_path.display()))?;
    let machine: Machine = serde_json::from_slice(&machine_bytes).context("parsing machine definition")?;
    machine.validate().map_err(|e| anyhow::anyhow!("invalid machine definition: {e}"))?;
    let machine_hash = hash_bytes(&machine_bytes);

    let mode = if step {
        RunMode::Step
    } else if step_turn {
        RunMode::StepTurn
    } else if step_path {
        RunMode::StepPath
    } else if playback.is_some() {
        RunMode::Playback
    } else {
        let _ = interactive;
        RunMode::Interactive
    };

    let store = ExecutionStore::new(&config.execution_dir);
    let execution_id = id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());

    let mut state = match store.load::<ExecutionState>(&execution_id, &machine_hash, force) {
        Ok(record) => record.state,
        Err(dygram_checkpoint::CheckpointError::NotFound(_)) => {
            let mut state = ExecutionState::new(mode, machine_hash.clone());
            let start = machine.logical_start().expect("validated machine always has a logical start");
            state.paths.push(ExecPath::new("p0", start));
            state
        }
        Err(e) => return Err(e.into()),
    };
    state.metadata.mode = mode;

    let machine_snapshot_value = serde_json::to_value(&machine)?;
    let machine_snapshot = Arc::new(Mutex::new(machine_snapshot_value.clone()));

    let vfs = Arc::new(VirtualFilesystem::new());
    let mut tools = ToolRegistry::new();
    tools.register_transition_family();
    tools.register_static(
        ToolDescriptor {
            name: "read_file".to_string(),
            description: "Read a file from the execution's virtual filesystem".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}}, "required": ["path"]}),
        },
        Arc::new(ReadFileTool::new(vfs.clone())),
    );
    tools.register_static(
        ToolDescriptor {
            name: "write_file".to_string(),
            description: "Write a file to the execution's virtual filesystem".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {"path": {"type": "string"}, "content": {"type": "string"}}, "required": ["path", "content"]}),
        },
        Arc::new(WriteFileTool::new(vfs.clone())),
    );
    tools.register_static(
        ToolDescriptor {
            name: "get_machine_definition".to_string(),
            description: "Return the machine definition currently driving this execution".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {}}),
        },
        Arc::new(GetMachineDefinitionTool::new(machine_snapshot.clone())),
    );
    tools.register_static(
        ToolDescriptor {
            name: "update_definition".to_string(),
            description: "Propose a new machine definition to replace the one driving this execution".to_string(),
            input_schema: serde_json::json!({"type": "object"}),
        },
        Arc::new(UpdateDefinitionTool),
    );
    tools.register_static(
        ToolDescriptor {
            name: "construct_tool".to_string(),
            description: "Request a new tool be made available to this machine".to_string(),
            input_schema: serde_json::json!({"type": "object", "properties": {"name": {"type": "string"}}, "required": ["name"]}),
        },
        Arc::new(ConstructToolHandler::new()),
    );

    let transport: Box<dyn dygram_core::executor::LlmTransport> = if playback.is_some() {
        Box::new(ScriptedTransport::new(Vec::<dygram_core::executor::LlmResponsePayload>::new()))
    } else {
        Box::new(ClaudeTransport::new(AnthropicConfig::from_env().context("resolving Anthropic transport config")?.with_model(config.default_model.clone())))
    };

    let mut effect_executor = EffectExecutor::new(transport, tools).with_vfs(vfs);
    if let Some(dir) = &record {
        effect_executor = effect_executor.with_record(RecordingWriter::new(dir));
    }
    if let Some(dir) = &playback {
        effect_executor = effect_executor.with_playback(RecordingReader::new(dir));
    }

    let runtime = Runtime::new(machine, config.clone());
    let mut machine_executor = MachineExecutor::new(runtime, effect_executor).with_machine_snapshot(machine_snapshot);

    let (next_state, suspension) = machine_executor.advance(state, &|| false).await;
    state = next_state;

    let checkpoint_mode = match mode {
        RunMode::Interactive => CheckpointMode::Interactive,
        RunMode::Step => CheckpointMode::Step,
        RunMode::StepTurn => CheckpointMode::StepTurn,
        RunMode::StepPath => CheckpointMode::StepPath,
        RunMode::Playback => CheckpointMode::Playback,
    };
    let mut metadata = CheckpointMetadata::new(execution_id.clone(), checkpoint_mode, machine_hash);
    metadata.machine_file = Some(machine_path.display().to_string());
    metadata.turn_count = state.metadata.turn_count;
    metadata.step_count = state.metadata.step_count;
    metadata.status = match &suspension {
        Suspension::ExecutionFinished if state.paths.iter().all(|p| p.status == dygram_core::state::PathStatus::Completed) => {
            ExecutionStatus::Completed
        }
        Suspension::ExecutionFinished => ExecutionStatus::Failed { reason: "one or more paths failed".to_string() },
        Suspension::Cancelled => ExecutionStatus::Failed { reason: "cancelled".to_string() },
        other => ExecutionStatus::Suspended { reason: format!("{other:?}") },
    };
    metadata.touch();
    store.save(&state, &metadata, &machine_snapshot_value)?;

    println!("execution {execution_id}: {:?}", suspension);
    Ok(match suspension {
        Suspension::ExecutionFinished => {
            if matches!(metadata.status, ExecutionStatus::Completed) {
                2
            } else {
                1
            }
        }
        Suspension::Cancelled => 1,
        _ => 0,
    })
}

fn run_exec(command: ExecCommands) -> Result<i32> {
    let config = load_config()?;
    let store = ExecutionStore::new(&config.execution_dir);

    match command {
        ExecCommands::List => {
            for metadata in store.list()? {
                println!("{}\t{:?}\t{:?}", metadata.id, metadata.status, metadata.mode);
            }
            Ok(0)
        }
        ExecCommands::Status { id } => {
            let metadata = store.list()?.into_iter().find(|m| m.id == id).context("execution not found")?;
            println!("{}", serde_json::to_string_pretty(&metadata)?);
            Ok(0)
        }
        ExecCommands::Show { id, format } => {
            let record = store.load::<ExecutionState>(&id, "", true)?;
            let machine: Machine = serde_json::from_value(record.machine_snapshot)?;
            let descriptors = descriptor::build(&machine);
            let snapshot = dygram_core::visualization::project(&record.state, &descriptors);
            let viz_format = if format == "svg" {
                dygram_core::visualization::VisualizationFormat::Dot
            } else {
                format.parse().map_err(|e: String| anyhow::anyhow!(e))?
            };
            println!("{}", dygram_core::visualization::render(&snapshot, viz_format));
            Ok(0)
        }
        ExecCommands::Rm { id } => {
            store.remove(&id)?;
            println!("removed {id}");
            Ok(0)
        }
        ExecCommands::Clean { all } => {
            let removed = store.clean(all)?;
            println!("removed {removed} execution(s)");
            Ok(0)
        }
    }
}
