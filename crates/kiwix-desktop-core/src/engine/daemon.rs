//! Private aria2 daemon process

use super::{Aria2Backend, EngineConfig};
use crate::error::EngineError;
use std::process::{Child, Command, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Time aria2 gets to exit after `aria2.shutdown` before it is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(3);
const EXIT_POLL: Duration = Duration::from_millis(50);

/// An `aria2c` process started with RPC enabled.
///
/// On drop the session is saved and the daemon is asked to shut down over
/// RPC; it is killed only if that fails.
pub struct Aria2Daemon {
    child: Child,
    rpc: Arc<Aria2Backend>,
}

impl Aria2Daemon {
    /// Start aria2 for `config`; `rpc` must point at the port it will listen on
    pub fn spawn(config: &EngineConfig, rpc: Arc<Aria2Backend>) -> Result<Self, EngineError> {
        let args = daemon_args(config);
        log::info!("Starting {:?} on port {}", config.aria2_path, config.rpc_port);

        let child = Command::new(&config.aria2_path)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| EngineError::Spawn(format!("{}: {}", config.aria2_path.display(), e)))?;

        Ok(Self { child, rpc })
    }
}

impl Drop for Aria2Daemon {
    fn drop(&mut self) {
        log::info!("Stopping aria2 (pid {})", self.child.id());
        if let Err(e) = self.rpc.save_session() {
            log::warn!("Failed to save aria2 session: {}", e);
        }
        let exited = match self.rpc.shutdown() {
            Ok(()) => wait_for_exit(&mut self.child, SHUTDOWN_GRACE),
            Err(e) => {
                log::warn!("aria2 did not accept shutdown: {}", e);
                false
            }
        };
        if !exited {
            if let Err(e) = self.child.kill() {
                log::warn!("Failed to stop aria2: {}", e);
            }
            let _ = self.child.wait();
        }
    }
}

fn wait_for_exit(child: &mut Child, grace: Duration) -> bool {
    let deadline = Instant::now() + grace;
    while Instant::now() < deadline {
        match child.try_wait() {
            Ok(Some(_)) => return true,
            Ok(None) => std::thread::sleep(EXIT_POLL),
            Err(_) => return false,
        }
    }
    false
}

fn daemon_args(config: &EngineConfig) -> Vec<String> {
    let session = config.session_file.to_string_lossy();
    let mut args = vec![
        "--enable-rpc".to_string(),
        "--rpc-listen-all=false".to_string(),
        format!("--rpc-listen-port={}", config.rpc_port),
        format!("--save-session={}", session),
        "--save-session-interval=5".to_string(),
        "--follow-metalink=mem".to_string(),
        "--metalink-preferred-protocol=https".to_string(),
        "--allow-overwrite=true".to_string(),
        "--auto-file-renaming=false".to_string(),
        format!("--stop-with-process={}", std::process::id()),
    ];
    if let Some(secret) = &config.secret {
        args.push(format!("--rpc-secret={}", secret));
    }
    if config.session_file.exists() {
        args.push(format!("--input-file={}", session));
    }
    args
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::testing::RpcStub;
    use crate::engine::Aria2Client;
    use std::path::PathBuf;

    fn config(session_file: PathBuf) -> EngineConfig {
        EngineConfig {
            rpc_url: None,
            secret: Some("abc".into()),
            aria2_path: PathBuf::from("aria2c"),
            rpc_port: 42042,
            session_file,
        }
    }

    fn rpc(url: String) -> Arc<Aria2Backend> {
        Arc::new(Aria2Backend::new(Aria2Client::new(url, Some("abc".into())).unwrap()).unwrap())
    }

    fn sleeper(seconds: &str) -> Child {
        Command::new("sleep").arg(seconds).spawn().unwrap()
    }

    #[test]
    fn test_daemon_args() {
        let dir = tempfile::tempdir().unwrap();
        let session = dir.path().join("kiwix.session");

        let args = daemon_args(&config(session.clone()));
        assert!(args.contains(&"--rpc-listen-port=42042".to_string()));
        assert!(args.contains(&"--rpc-secret=abc".to_string()));
        assert!(!args.iter().any(|a| a.starts_with("--input-file")));

        std::fs::write(&session, b"").unwrap();
        let args = daemon_args(&config(session.clone()));
        assert!(args.contains(&format!("--input-file={}", session.display())));
    }

    #[test]
    fn test_spawn_missing_binary() {
        let mut config = config(PathBuf::from("/nonexistent/kiwix.session"));
        config.aria2_path = PathBuf::from("/nonexistent/aria2c");
        let rpc = rpc("http://127.0.0.1:9/jsonrpc".into());
        assert!(matches!(Aria2Daemon::spawn(&config, rpc), Err(EngineError::Spawn(_))));
    }

    #[test]
    fn test_drop_saves_session_then_shuts_down() {
        let stub = RpcStub::start();
        let daemon = Aria2Daemon {
            child: sleeper("0.2"),
            rpc: rpc(stub.url()),
        };

        let started = Instant::now();
        drop(daemon);
        assert!(started.elapsed() < SHUTDOWN_GRACE);
        assert_eq!(stub.methods(), vec!["aria2.saveSession", "aria2.shutdown"]);
    }

    #[test]
    #[cfg(target_os = "linux")]
    fn test_drop_kills_unresponsive_daemon() {
        let mut child = sleeper("30");
        let pid = child.id();
        assert!(child.try_wait().unwrap().is_none());

        let started = Instant::now();
        drop(Aria2Daemon {
            child,
            rpc: rpc("http://127.0.0.1:9/jsonrpc".into()),
        });
        assert!(started.elapsed() < SHUTDOWN_GRACE);
        assert!(!std::path::Path::new(&format!("/proc/{}", pid)).exists());
    }
}
