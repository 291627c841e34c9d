//! `conclaved` — the server's CLI entrypoint: `start` / `stop` / `status`.

use std::path::PathBuf;
use std::time::Duration;

use conclave::conclave::checkpoint_controller::PauseController;
use conclave::conclave::context_bus::ContextBus;
use conclave::conclave::conversation::ConversationHistory;
use conclave::conclave::registry::AgentRegistry;
use conclave::conclave::supervisor::Supervisor;
use conclave::{AgentDescriptor, AppConfig, CredentialValidator};

const EXIT_OK: i32 = 0;
const EXIT_USAGE: i32 = 2;
const EXIT_CREDENTIAL: i32 = 3;
const EXIT_ALREADY_RUNNING: i32 = 4;
const EXIT_GENERIC: i32 = 1;

#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let code = match args.get(1).map(String::as_str) {
        Some("start") => cmd_start().await,
        Some("stop") => cmd_stop(),
        Some("status") => cmd_status(),
        _ => {
            eprintln!("usage: conclaved <start|stop|status>");
            EXIT_USAGE
        }
    };
    std::process::exit(code);
}

fn pid_file(config: &AppConfig) -> PathBuf {
    config.cache_dir().join("conclaved.pid")
}

async fn cmd_start() -> i32 {
    env_logger::init();
    let config = AppConfig::from_env(default_agents(), Vec::new());
    if let Err(err) = config.ensure_dirs() {
        eprintln!("failed to prepare {}: {err}", config.home.display());
        return EXIT_GENERIC;
    }

    let pid_path = pid_file(&config);
    if pid_path.exists() {
        eprintln!("conclaved already appears to be running (found {})", pid_path.display());
        return EXIT_ALREADY_RUNNING;
    }

    let validator = CredentialValidator::new();
    if let Err(err) = validator.validate_all(&config.credentials).await {
        eprintln!("{err}");
        return EXIT_CREDENTIAL;
    }

    if std::fs::write(&pid_path, std::process::id().to_string()).is_err() {
        log::warn!("could not write pid file at {}", pid_path.display());
    }

    let registry = std::sync::Arc::new(AgentRegistry::new(config.agents.clone()));
    let permissions: std::collections::HashMap<_, _> =
        config.agents.iter().map(|a| (a.name.clone(), a.allowed_tools.clone())).collect();
    registry
        .set_permissions(std::sync::Arc::new(conclave::conclave::permission::PermissionRegistry::new(permissions)))
        .await;
    for agent in &config.agents {
        if let Err(err) = registry.start(&agent.name).await {
            log::error!("failed to start agent {}: {err}", agent.name);
        }
    }

    let context = std::sync::Arc::new(ContextBus::new());
    let history = std::sync::Arc::new(tokio::sync::Mutex::new(ConversationHistory::new()));
    let memory = std::sync::Arc::new(conclave_memory::store::VectorMemoryStore::new(10_000));
    let pause_controller = std::sync::Arc::new(PauseController::new());

    let supervisor = std::sync::Arc::new(Supervisor {
        registry: registry.clone(),
        context: context.clone(),
        history: history.clone(),
        memory,
        checkpoint_dir: config.checkpoints_dir(),
        fallback_agents: Default::default(),
        classifier_agent: None,
        pause_controller: pause_controller.clone(),
        active_calls: std::sync::Mutex::new(std::collections::HashMap::new()),
        preferred_agent: tokio::sync::Mutex::new(std::collections::HashMap::new()),
    });

    #[cfg(feature = "server")]
    {
        let gateway_state = std::sync::Arc::new(conclave::conclave::gateway::GatewayState {
            supervisor: supervisor.clone(),
            pause_controller,
            context,
            history,
            system_prompt: "You are part of a multi-agent development team.".to_string(),
            active_sessions: tokio::sync::Mutex::new(std::collections::HashSet::new()),
            thinking_enabled: tokio::sync::Mutex::new(std::collections::HashMap::new()),
        });
        let app = conclave::conclave::gateway::router(gateway_state);
        let addr = config.socket_addr.clone();
        tokio::spawn(async move {
            match tokio::net::TcpListener::bind(&addr).await {
                Ok(listener) => {
                    if let Err(err) = axum::serve(listener, app).await {
                        log::error!("gateway server stopped: {err}");
                    }
                }
                Err(err) => log::error!("failed to bind gateway on {addr}: {err}"),
            }
        });
    }

    log::info!("conclaved listening on {}", config.socket_addr);

    loop {
        registry.health_tick().await;
        tokio::time::sleep(Duration::from_secs(15)).await;
    }
}

fn cmd_stop() -> i32 {
    let config = AppConfig::from_env(Vec::new(), Vec::new());
    let pid_path = pid_file(&config);
    match std::fs::read_to_string(&pid_path) {
        Ok(_) => {
            let _ = std::fs::remove_file(&pid_path);
            EXIT_OK
        }
        Err(_) => {
            eprintln!("conclaved is not running");
            EXIT_GENERIC
        }
    }
}

fn cmd_status() -> i32 {
    let config = AppConfig::from_env(Vec::new(), Vec::new());
    if pid_file(&config).exists() {
        println!("running");
        EXIT_OK
    } else {
        println!("stopped");
        EXIT_GENERIC
    }
}

fn default_agents() -> Vec<AgentDescriptor> {
    ["architect", "codesmith", "reviewer", "researcher", "responder"]
        .into_iter()
        .map(|name| AgentDescriptor {
            name: name.into(),
            command: format!("conclave-agent-{name}"),
            args: Vec::new(),
            allowed_tools: vec!["run".to_string()],
            max_restarts: 5,
            restart_window: Duration::from_secs(300),
            default_model: "claude-sonnet-4".to_string(),
            max_concurrency: 1,
            environment: Vec::new(),
            restart_policy: conclave::conclave::data::RestartPolicy::OnCrash,
        })
        .collect()
}
