// SPDX-License-Identifier: PMPL-1.0-or-later

//! Runtime configuration.
//!
//! Defaults are derived from the install home (the directory holding the
//! `faultline` binary, or `FAULTLINE_HOME`). An optional `faultline.yaml`,
//! `faultline.yml` or `faultline.json` in the home overrides them, and a few
//! environment variables override the file.

use anyhow::{anyhow, Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const HOME_ENV: &str = "FAULTLINE_HOME";
pub const BIN_ENV: &str = "FAULTLINE_BIN";
pub const DB_ENV: &str = "FAULTLINE_DB";

const CONFIG_FILES: [&str; 3] = ["faultline.yaml", "faultline.yml", "faultline.json"];

#[derive(Debug, Clone)]
pub struct Config {
    pub home: PathBuf,
    pub bin_dir: PathBuf,
    pub log_dir: PathBuf,
    pub db_path: PathBuf,
    /// Binary re-invoked by scheduled destroys.
    pub program: PathBuf,
    pub exec_timeout: Duration,
    pub docker: DockerConfig,
    pub kubernetes: KubernetesConfig,
    pub agent: AgentConfig,
}

#[derive(Debug, Clone)]
pub struct DockerConfig {
    /// Image for helper containers; must carry the chaos_* binaries.
    pub image: String,
    pub script_path: PathBuf,
}

#[derive(Debug, Clone)]
pub struct KubernetesConfig {
    pub kubectl: String,
    pub agent_namespace: String,
    pub agent_label: String,
    pub script_path: PathBuf,
    pub sidecar_image: String,
    pub waiting_time: Duration,
    pub poll_interval: Duration,
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub host: String,
    pub http_timeout: Duration,
    pub sandbox_script: PathBuf,
    pub sandbox_namespace: String,
    pub attach_wait: Duration,
    pub cplus_jar: PathBuf,
    pub cplus_script_dir: PathBuf,
    pub cplus_wait: Duration,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct ConfigFile {
    bin_dir: Option<PathBuf>,
    log_dir: Option<PathBuf>,
    db_path: Option<PathBuf>,
    exec_timeout_secs: Option<u64>,
    docker: DockerFile,
    kubernetes: KubernetesFile,
    agent: AgentFile,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct DockerFile {
    image: Option<String>,
    script_path: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct KubernetesFile {
    kubectl: Option<String>,
    agent_namespace: Option<String>,
    agent_label: Option<String>,
    script_path: Option<PathBuf>,
    sidecar_image: Option<String>,
    waiting_time: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct AgentFile {
    host: Option<String>,
    http_timeout_secs: Option<u64>,
    sandbox_script: Option<PathBuf>,
    cplus_jar: Option<PathBuf>,
    cplus_script_dir: Option<PathBuf>,
    cplus_wait_secs: Option<u64>,
}

impl Config {
    /// Defaults for an install rooted at `home`.
    pub fn for_home(home: &Path) -> Self {
        let lib = home.join("lib");
        Self {
            home: home.to_path_buf(),
            bin_dir: home.join("bin"),
            log_dir: home.join("logs"),
            db_path: home.join("faultline.dat"),
            program: home.join("faultline"),
            exec_timeout: Duration::from_secs(60),
            docker: DockerConfig {
                image: format!("faultline/faultline-tool:{}", env!("CARGO_PKG_VERSION")),
                script_path: PathBuf::from("/opt/faultline/bin"),
            },
            kubernetes: KubernetesConfig {
                kubectl: "kubectl".to_string(),
                agent_namespace: "faultline".to_string(),
                agent_label: "app=faultline-agent".to_string(),
                script_path: PathBuf::from("/opt/faultline/bin"),
                sidecar_image: "busybox:1.36".to_string(),
                waiting_time: Duration::from_secs(20),
                poll_interval: Duration::from_secs(1),
            },
            agent: AgentConfig {
                host: "127.0.0.1".to_string(),
                http_timeout: Duration::from_secs(10),
                sandbox_script: lib.join("sandbox").join("bin").join("sandbox.sh"),
                sandbox_namespace: "default".to_string(),
                attach_wait: Duration::from_secs(5),
                cplus_jar: lib.join("cplus").join("faultline-exec-cplus.jar"),
                cplus_script_dir: lib.join("cplus").join("script"),
                cplus_wait: Duration::from_secs(5),
            },
        }
    }

    /// Resolves the home, applies the optional config file, then the environment.
    pub fn load() -> Result<Self> {
        let home = match env::var_os(HOME_ENV) {
            Some(home) => PathBuf::from(home),
            None => program_home()?,
        };
        let mut config = Self::for_home(&home);
        if let Ok(exe) = env::current_exe() {
            config.program = exe;
        }
        if let Some(path) = CONFIG_FILES
            .iter()
            .map(|name| home.join(name))
            .find(|path| path.is_file())
        {
            config.apply_file(&path)?;
        }
        if let Some(bin) = env::var_os(BIN_ENV) {
            config.bin_dir = PathBuf::from(bin);
        } else if !config.bin_dir.is_dir() {
            // Unpacked builds keep the chaos_* binaries next to `faultline`.
            if let Some(dir) = config.program.parent() {
                config.bin_dir = dir.to_path_buf();
            }
        }
        if let Some(db) = env::var_os(DB_ENV) {
            config.db_path = PathBuf::from(db);
        }
        Ok(config)
    }

    pub fn apply_file(&mut self, path: &Path) -> Result<()> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let file: ConfigFile = match path.extension().and_then(|ext| ext.to_str()) {
            Some("json") => serde_json::from_str(&content)
                .with_context(|| format!("parsing json config {}", path.display()))?,
            Some("yaml") | Some("yml") => serde_yaml::from_str(&content)
                .with_context(|| format!("parsing yaml config {}", path.display()))?,
            _ => return Err(anyhow!("unsupported config extension for {}", path.display())),
        };
        self.merge(file)
    }

    fn merge(&mut self, file: ConfigFile) -> Result<()> {
        if let Some(bin_dir) = file.bin_dir {
            self.bin_dir = self.resolve(bin_dir);
        }
        if let Some(log_dir) = file.log_dir {
            self.log_dir = self.resolve(log_dir);
        }
        if let Some(db_path) = file.db_path {
            self.db_path = self.resolve(db_path);
        }
        if let Some(secs) = file.exec_timeout_secs {
            self.exec_timeout = Duration::from_secs(secs);
        }

        if let Some(image) = file.docker.image {
            self.docker.image = image;
        }
        if let Some(script_path) = file.docker.script_path {
            self.docker.script_path = script_path;
        }

        let k8s = file.kubernetes;
        if let Some(kubectl) = k8s.kubectl {
            self.kubernetes.kubectl = kubectl;
        }
        if let Some(namespace) = k8s.agent_namespace {
            self.kubernetes.agent_namespace = namespace;
        }
        if let Some(label) = k8s.agent_label {
            self.kubernetes.agent_label = label;
        }
        if let Some(script_path) = k8s.script_path {
            self.kubernetes.script_path = script_path;
        }
        if let Some(image) = k8s.sidecar_image {
            self.kubernetes.sidecar_image = image;
        }
        if let Some(waiting_time) = k8s.waiting_time {
            self.kubernetes.waiting_time = crate::util::parse_duration(&waiting_time)
                .with_context(|| format!("kubernetes.waiting_time {:?}", waiting_time))?;
        }

        let agent = file.agent;
        if let Some(host) = agent.host {
            self.agent.host = host;
        }
        if let Some(secs) = agent.http_timeout_secs {
            self.agent.http_timeout = Duration::from_secs(secs);
        }
        if let Some(script) = agent.sandbox_script {
            self.agent.sandbox_script = self.resolve(script);
        }
        if let Some(jar) = agent.cplus_jar {
            self.agent.cplus_jar = self.resolve(jar);
        }
        if let Some(dir) = agent.cplus_script_dir {
            self.agent.cplus_script_dir = self.resolve(dir);
        }
        if let Some(secs) = agent.cplus_wait_secs {
            self.agent.cplus_wait = Duration::from_secs(secs);
        }
        Ok(())
    }

    fn resolve(&self, path: PathBuf) -> PathBuf {
        if path.is_absolute() {
            path
        } else {
            self.home.join(path)
        }
    }
}

fn program_home() -> Result<PathBuf> {
    let exe = env::current_exe().context("locating the faultline binary")?;
    exe.parent()
        .map(Path::to_path_buf)
        .ok_or_else(|| anyhow!("binary {} has no parent directory", exe.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn defaults_follow_home() {
        let config = Config::for_home(Path::new("/opt/faultline"));
        assert_eq!(config.db_path, Path::new("/opt/faultline/faultline.dat"));
        assert_eq!(config.bin_dir, Path::new("/opt/faultline/bin"));
        assert_eq!(config.exec_timeout, Duration::from_secs(60));
        assert_eq!(config.kubernetes.waiting_time, Duration::from_secs(20));
    }

    #[test]
    fn yaml_file_overrides_defaults() {
        let dir = TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("faultline.yaml");
        fs::write(
            &path,
            "db_path: state/blade.dat\nexec_timeout_secs: 5\nkubernetes:\n  waiting_time: 90s\n",
        )
        .expect("config should be written");

        let mut config = Config::for_home(dir.path());
        config.apply_file(&path).expect("config should load");
        assert_eq!(config.db_path, dir.path().join("state/blade.dat"));
        assert_eq!(config.exec_timeout, Duration::from_secs(5));
        assert_eq!(config.kubernetes.waiting_time, Duration::from_secs(90));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let dir = TempDir::new().expect("tempdir should be created");
        let path = dir.path().join("faultline.json");
        fs::write(&path, r#"{"db": "x"}"#).expect("config should be written");
        let mut config = Config::for_home(dir.path());
        assert!(config.apply_file(&path).is_err());
    }
}
