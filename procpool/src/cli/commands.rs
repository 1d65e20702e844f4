//! CLI command execution.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use futures::StreamExt;
use tokio::task::JoinSet;

use procpool::{Manifest, ManagedProcess, OutputStream, ProcessPool, ProcessStatus};

use super::args::{Cli, Commands};

/// Execute a parsed command line.
pub async fn execute(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Run {
            manifest,
            max_concurrent,
            health_check_ms,
        } => run(&manifest, max_concurrent, health_check_ms).await,
        Commands::Validate { manifest } => validate(&manifest),
    }
}

fn validate(path: &Path) -> Result<()> {
    let manifest = Manifest::load(path)?;

    println!(
        "{}: {} process(es), max {} concurrent",
        path.display(),
        manifest.processes.len(),
        manifest.pool.max_concurrent
    );
    if manifest.processes.len() > manifest.pool.max_concurrent {
        println!(
            "warning: only the first {} will be admitted",
            manifest.pool.max_concurrent
        );
    }
    for (id, spec) in &manifest.processes {
        println!("  {id}: {} {}", spec.command, spec.args.join(" "));
    }
    Ok(())
}

async fn run(path: &Path, max_concurrent: Option<usize>, health_check_ms: Option<u64>) -> Result<()> {
    let mut manifest = Manifest::load(path)?;
    if let Some(max) = max_concurrent {
        manifest.pool.max_concurrent = max;
    }
    if let Some(ms) = health_check_ms {
        manifest.pool.health_check_interval = Some(Duration::from_millis(ms));
    }

    let pool = ProcessPool::new(manifest.pool.clone()).context("Failed to create process pool")?;
    let mut relays = JoinSet::new();
    let mut rejected = 0usize;

    for (id, spec) in manifest.processes {
        match pool.spawn(id.clone(), spec) {
            Ok(process) => {
                relays.spawn(relay(process));
            }
            Err(e) => {
                eprintln!("[{id}] not started: {e}");
                rejected += 1;
            }
        }
    }

    let mut failed = 0usize;
    tokio::select! {
        () = async {
            while let Some(joined) = relays.join_next().await {
                if !matches!(joined, Ok(ProcessStatus::Stopped)) {
                    failed += 1;
                }
            }
        } => {}
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl-C")?;
            eprintln!("Interrupted, stopping {} process(es)", pool.size());
            pool.kill_all();
            return Ok(());
        }
    }

    if failed + rejected > 0 {
        bail!("{failed} process(es) failed, {rejected} not started");
    }
    Ok(())
}

/// Relay a process's output to the terminal until it exits.
async fn relay(process: Arc<ManagedProcess>) -> ProcessStatus {
    let id = process.id().to_string();
    let stdout = process.stdout();
    let stderr = process.stderr();

    // Manifest processes get no input.
    process.close_stdin().await;

    tokio::join!(
        forward(&id, stdout, |line| println!("{line}")),
        forward(&id, stderr, |line| eprintln!("{line}")),
    );

    let status = process.wait().await;
    match process.exit_code() {
        Some(code) => eprintln!("[{id}] {status} (exit code {code})"),
        None => eprintln!("[{id}] {status}"),
    }
    status
}

async fn forward(id: &str, mut stream: OutputStream, emit: impl Fn(&str)) {
    let mut lines = LinePrefixer::new(id);

    while let Some(chunk) = stream.next().await {
        match chunk {
            Ok(text) => {
                for line in lines.push(&text) {
                    emit(line.as_str());
                }
            }
            Err(e) => {
                eprintln!("[{id}] {} error: {e}", stream.channel());
                break;
            }
        }
    }
    if let Some(rest) = lines.finish() {
        emit(&rest);
    }
}

/// Turns arbitrary output chunks into `[id] line` strings.
struct LinePrefixer {
    prefix: String,
    pending: String,
}

impl LinePrefixer {
    fn new(id: &str) -> Self {
        Self {
            prefix: format!("[{id}] "),
            pending: String::new(),
        }
    }

    /// Feed a chunk; returns every line it completed.
    fn push(&mut self, chunk: &str) -> Vec<String> {
        self.pending.push_str(chunk);

        let mut complete = Vec::new();
        while let Some(pos) = self.pending.find('\n') {
            let line: String = self.pending.drain(..=pos).collect();
            complete.push(format!("{}{}", self.prefix, line.trim_end_matches(['\n', '\r'])));
        }
        complete
    }

    /// Flush a trailing line that had no newline.
    fn finish(self) -> Option<String> {
        (!self.pending.is_empty()).then(|| format!("{}{}", self.prefix, self.pending))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefixer_joins_split_lines() {
        let mut lines = LinePrefixer::new("web");

        assert!(lines.push("hel").is_empty());
        assert_eq!(lines.push("lo\nwor"), vec!["[web] hello"]);
        assert_eq!(lines.push("ld\r\n\n"), vec!["[web] world", "[web] "]);
        assert_eq!(lines.finish(), None);
    }

    #[test]
    fn prefixer_flushes_tail() {
        let mut lines = LinePrefixer::new("job");
        assert!(lines.push("no newline").is_empty());
        assert_eq!(lines.finish().as_deref(), Some("[job] no newline"));
    }

    #[tokio::test]
    async fn relay_reports_final_status() {
        let pool = ProcessPool::new(procpool::PoolConfig::new(1)).unwrap();
        let process = pool
            .spawn("ok", procpool::ProcessSpec::new("echo").arg("hi"))
            .unwrap();

        let status = tokio::time::timeout(Duration::from_secs(5), relay(process))
            .await
            .unwrap();
        assert_eq!(status, ProcessStatus::Stopped);
    }

    #[tokio::test]
    async fn run_fails_when_a_process_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            r#"{
                "pool": {"max_concurrent": 2},
                "processes": {
                    "good": {"command": "true"},
                    "bad": {"command": "sh", "args": ["-c", "exit 1"]}
                }
            }"#,
        )
        .unwrap();

        let err = run(&path, None, None).await.unwrap_err();
        assert_eq!(err.to_string(), "1 process(es) failed, 0 not started");
    }

    #[tokio::test]
    async fn run_counts_rejections() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("pool.json");
        std::fs::write(
            &path,
            r#"{
                "pool": {"max_concurrent": 2},
                "processes": {
                    "a": {"command": "true"},
                    "b": {"command": "true"}
                }
            }"#,
        )
        .unwrap();

        assert!(run(&path, None, None).await.is_ok());
        let err = run(&path, Some(1), Some(50)).await.unwrap_err();
        assert_eq!(err.to_string(), "0 process(es) failed, 1 not started");
    }
}
