//! Application configuration. Constructed programmatically from environment
//! variables and caller-supplied descriptors — no config-file parser is introduced,
//! matching the no-parsing-dependency approach this codebase has always taken.

use std::env;
use std::path::PathBuf;

use crate::conclave::credential::CredentialSpec;
use crate::conclave::data::AgentDescriptor;

const APP_DIR_NAME: &str = ".conclave";
const WORKSPACE_DIR_NAME: &str = ".conclave_ws";

pub struct AppConfig {
    pub home: PathBuf,
    pub workspace: PathBuf,
    pub socket_addr: String,
    pub log_level: String,
    pub agents: Vec<AgentDescriptor>,
    pub credentials: Vec<CredentialSpec>,
}

impl AppConfig {
    pub fn from_env(agents: Vec<AgentDescriptor>, credentials: Vec<CredentialSpec>) -> Self {
        let home = env::var("APP_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home());
        let workspace = env::current_dir().unwrap_or_default().join(WORKSPACE_DIR_NAME);
        let socket_addr = env::var("APP_SOCKET_ADDR").unwrap_or_else(|_| "127.0.0.1:7420".to_string());
        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());
        Self { home, workspace, socket_addr, log_level, agents, credentials }
    }

    pub fn config_dir(&self) -> PathBuf {
        self.home.join("config")
    }

    pub fn memory_dir(&self) -> PathBuf {
        self.home.join("memory")
    }

    pub fn sessions_dir(&self) -> PathBuf {
        self.home.join("sessions")
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    pub fn checkpoints_dir(&self) -> PathBuf {
        self.home.join("checkpoints")
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        for dir in [self.config_dir(), self.memory_dir(), self.sessions_dir(), self.cache_dir(), self.checkpoints_dir(), self.workspace.clone()] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(())
    }
}

fn default_home() -> PathBuf {
    dirs_home().join(APP_DIR_NAME)
}

fn dirs_home() -> PathBuf {
    env::var("HOME").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("."))
}
