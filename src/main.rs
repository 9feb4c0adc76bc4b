use std::io::Write;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::{bail, Result};
use clap::{Args, Parser, Subcommand};
use futures::StreamExt;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use llm_api_launcher::bench::{self, BenchPlan, DEFAULT_PLANS};
use llm_api_launcher::v1::document::{DEFAULT_MAX_TOKENS, DEFAULT_TEMPERATURE};
use llm_api_launcher::v1::{ContextMode, DocumentQuestion, GenerateRequest};
use llm_api_launcher::{
    has_model, ApiClient, ApiConfig, LaunchOptions, Launcher, LauncherConfig, RuntimeConfig,
    RuntimeProbe,
};

#[derive(Parser)]
#[command(
    name = "llm-api",
    version,
    about = "Launch and query the document question-answering LLM API"
)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// API base URL, e.g. http://localhost:8001/llm-api/v1
    #[arg(long, global = true)]
    api_url: Option<String>,

    /// Ollama base URL
    #[arg(long, global = true)]
    ollama_url: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check Ollama, prepare the virtual environment and run the server in the foreground
    Start(LaunchArgs),

    /// Stop any running server and start a new one in the background
    Restart {
        #[command(flatten)]
        launch: LaunchArgs,

        /// Server log file
        #[arg(long)]
        log_file: Option<PathBuf>,

        /// Seconds to wait between stopping and starting
        #[arg(long)]
        grace: Option<u64>,

        /// Poll the health endpoint for up to this many seconds after starting
        #[arg(long)]
        wait: Option<u64>,
    },

    /// Stop running servers by command-line match
    Stop {
        /// Substring of the command line to match (default: "python <entry point>")
        #[arg(long)]
        pattern: Option<String>,

        #[arg(long)]
        entry_point: Option<String>,
    },

    /// Report whether Ollama is installed and running, and which models it has
    Doctor {
        #[arg(long)]
        require_model: Option<String>,
    },

    /// Ask a question about a PDF document
    Ask {
        /// Path to the PDF file
        file: PathBuf,

        /// Question about the document
        question: String,

        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value_t = DEFAULT_TEMPERATURE)]
        temperature: f32,

        #[arg(long, default_value_t = DEFAULT_MAX_TOKENS)]
        max_tokens: u32,

        #[arg(long, value_enum, default_value_t = ContextMode::Full)]
        context_mode: ContextMode,

        /// Nucleus sampling (server default when omitted)
        #[arg(long)]
        top_p: Option<f32>,

        /// Top-k sampling (server default when omitted)
        #[arg(long)]
        top_k: Option<u32>,
    },

    /// Query the server health endpoint
    Health,

    /// Show the model the server is configured with
    ModelInfo,

    /// Generate text from a prompt
    Generate {
        prompt: String,

        #[arg(long)]
        model: Option<String>,

        #[arg(long, default_value_t = 512)]
        max_tokens: u32,

        #[arg(long, default_value_t = 0.7)]
        temperature: f32,

        #[arg(long, default_value_t = 0.9)]
        top_p: f32,

        #[arg(long, default_value_t = 40)]
        top_k: u32,

        /// Stop sequence (repeatable)
        #[arg(long = "stop")]
        stop_sequences: Vec<String>,

        /// Stream the answer as it is generated
        #[arg(long)]
        stream: bool,
    },

    /// Send concurrent generate requests and report response times
    Bench {
        /// Total requests (runs the built-in plans when omitted)
        #[arg(long)]
        requests: Option<usize>,

        #[arg(long, default_value_t = 1)]
        concurrency: usize,

        /// Seconds to pause between plans
        #[arg(long, default_value_t = 2)]
        pause: u64,
    },
}

#[derive(Args)]
struct LaunchArgs {
    #[arg(long)]
    project_dir: Option<PathBuf>,

    /// Interpreter used to create the virtual environment
    #[arg(long)]
    python: Option<String>,

    #[arg(long)]
    venv: Option<PathBuf>,

    #[arg(long)]
    entry_point: Option<String>,

    /// Fail unless Ollama has this model pulled
    #[arg(long)]
    require_model: Option<String>,

    /// Do not run `pip install -e .`
    #[arg(long)]
    skip_install: bool,
}

impl LaunchArgs {
    fn apply(&self, config: &mut LauncherConfig) {
        if let Some(dir) = &self.project_dir {
            config.project_dir = dir.clone();
        }
        if let Some(python) = &self.python {
            config.python = python.clone();
        }
        if let Some(venv) = &self.venv {
            config.venv_dir = venv.clone();
        }
        if let Some(entry) = &self.entry_point {
            config.entry_point = entry.clone();
        }
    }

    fn options(&self) -> LaunchOptions {
        LaunchOptions {
            require_model: self.require_model.clone(),
            skip_install: self.skip_install,
        }
    }
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("info"),
        2 => EnvFilter::new("debug"),
        _ => EnvFilter::new("trace"),
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn runtime_config(ollama_url: Option<&str>) -> RuntimeConfig {
    let mut runtime = RuntimeConfig::from_env();
    if let Some(url) = ollama_url {
        runtime.base_url = url.trim_end_matches('/').to_string();
    }
    runtime
}

fn print_json<T: serde::Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

async fn wait_until_healthy(api: &ApiClient, timeout: Duration) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        match api.health().await {
            Ok(health) if health.is_healthy() => return true,
            Ok(health) => debug!("Server answered with status '{}'", health.status),
            Err(e) => debug!("Server not ready yet: {e}"),
        }
        tokio::time::sleep(Duration::from_secs(1)).await;
    }
    false
}

#[tokio::main]
async fn main() -> Result<()> {
    // Variables may also come from the container environment.
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let api_config = ApiConfig::from_env();
    let api = match &cli.api_url {
        Some(url) => ApiClient::new(url.clone(), api_config.request_timeout),
        None => ApiClient::from_config(&api_config),
    };

    let mut launcher_config = LauncherConfig::from_env();
    launcher_config.runtime = runtime_config(cli.ollama_url.as_deref());

    match cli.command {
        Command::Start(args) => {
            args.apply(&mut launcher_config);
            let launcher = Launcher::new(launcher_config);
            let opts = args.options();

            let tags = launcher.preflight(&opts).await?;
            println!("Ollama is running ({} model(s) available)", tags.models.len());

            let status = launcher.prepare(&opts).await?;
            info!("Virtual environment: {status:?}");

            println!("Starting server: {}", launcher.config().entry_point);
            launcher.run_foreground().await?;
        }

        Command::Restart {
            launch,
            log_file,
            grace,
            wait,
        } => {
            launch.apply(&mut launcher_config);
            if let Some(log_file) = log_file {
                launcher_config.log_file = log_file;
            }
            if let Some(secs) = grace {
                launcher_config.restart_grace = Duration::from_secs(secs);
            }

            let launcher = Launcher::new(launcher_config);
            let detached = launcher.restart(&launch.options()).await?;
            if detached.stopped > 0 {
                println!("Stopped {} running instance(s)", detached.stopped);
            }
            println!(
                "Server started in background (pid {}), logs: {}",
                detached.pid,
                detached.log_file.display()
            );

            if let Some(secs) = wait {
                if wait_until_healthy(&api, Duration::from_secs(secs)).await {
                    println!("Server is healthy at {}", api.base_url());
                } else {
                    bail!(
                        "Server did not become healthy within {secs}s, check {}",
                        detached.log_file.display()
                    );
                }
            }
        }

        Command::Stop {
            pattern,
            entry_point,
        } => {
            if let Some(entry) = entry_point {
                launcher_config.entry_point = entry;
            }
            if pattern.is_some() {
                launcher_config.match_pattern = pattern;
            }

            let launcher = Launcher::new(launcher_config);
            let stopped = launcher.stop_existing().await?;
            println!("Stopped {stopped} process(es)");
        }

        Command::Doctor { require_model } => {
            let probe = RuntimeProbe::new(launcher_config.runtime);
            let path = probe.check_installed()?;
            println!("Ollama binary: {}", path.display());

            let tags = probe.check_running().await?;
            println!("Ollama is running at {}", probe.config().base_url);
            if tags.models.is_empty() {
                println!("No models pulled yet. Run: ollama pull <model>");
            }
            for name in tags.names() {
                println!("  - {name}");
            }

            if let Some(model) = require_model {
                if !has_model(&tags, &model) {
                    return Err(llm_api_launcher::LaunchError::ModelMissing { model }.into());
                }
                println!("Model '{model}' is available");
            }
        }

        Command::Ask {
            file,
            question,
            model,
            temperature,
            max_tokens,
            context_mode,
            top_p,
            top_k,
        } => {
            let request = DocumentQuestion {
                file,
                question,
                temperature,
                max_tokens,
                context_mode,
                top_p,
                top_k,
                model,
            };
            let answer = api.ask_document(request).await?;
            print_json(&answer)?;
        }

        Command::Health => {
            let health = api.health().await?;
            print_json(&health)?;
            if !health.is_healthy() {
                bail!("Service reported status '{}'", health.status);
            }
        }

        Command::ModelInfo => {
            print_json(&api.model_info().await?)?;
        }

        Command::Generate {
            prompt,
            model,
            max_tokens,
            temperature,
            top_p,
            top_k,
            stop_sequences,
            stream,
        } => {
            let mut request = GenerateRequest::new(prompt)
                .with_max_tokens(max_tokens)
                .with_temperature(temperature);
            request.top_p = top_p;
            request.top_k = top_k;
            request.model = model;
            if !stop_sequences.is_empty() {
                request.stop_sequences = Some(stop_sequences);
            }

            if stream {
                let mut chunks = api.generate_stream(&request).await?;
                let mut stdout = std::io::stdout();
                while let Some(chunk) = chunks.next().await {
                    stdout.write_all(chunk?.as_bytes())?;
                    stdout.flush()?;
                }
                println!();
            } else {
                print_json(&api.generate(&request).await?)?;
            }
        }

        Command::Bench {
            requests,
            concurrency,
            pause,
        } => {
            match api.health().await {
                Ok(health) => println!("Health check passed ({})", health.status),
                Err(e) => bail!("{e}. Please ensure the API is running (python main.py)"),
            }

            let plans: Vec<BenchPlan> = match requests {
                Some(total) => vec![BenchPlan { total, concurrency }],
                None => DEFAULT_PLANS.to_vec(),
            };

            for (i, plan) in plans.iter().enumerate() {
                if i > 0 {
                    tokio::time::sleep(Duration::from_secs(pause)).await;
                }
                println!(
                    "\nLoad Test: {} requests with {} concurrent",
                    plan.total, plan.concurrency
                );
                let samples = bench::run(&api, *plan, |done, total| {
                    println!("Progress: {done}/{total} requests completed");
                })
                .await;
                print!("\n{}", bench::summarize(&samples));
            }
        }
    }

    Ok(())
}
