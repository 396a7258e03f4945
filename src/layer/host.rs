//! Host-side collaborators the loader reports to: user prompts and restarts.

use async_trait::async_trait;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWriteExt, BufReader, Stdin};
use tokio::sync::Mutex;

use crate::layer::loader::LoadSummary;
use crate::model::layer::LayerId;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartChoice {
    Now,
    Later,
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Show the load summary. Returns `true` once the user acknowledged it.
    async fn layers_loaded(&self, summary: &LoadSummary) -> bool;

    async fn restart_required(&self, unloaded: &[LayerId]) -> RestartChoice;
}

/// How the host comes back after a restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartMode {
    /// Come back without the layers that were just unloaded.
    Clean,
    /// Come back and load every enabled layer again.
    Reload,
}

pub trait HostControl: Send + Sync {
    /// Replace the running host process with a fresh one.
    fn restart(&self, mode: RestartMode) -> anyhow::Result<()>;
}

pub fn loaded_message(summary: &LoadSummary) -> String {
    let mut message = String::new();

    let succeeded = summary.succeeded();
    if !succeeded.is_empty() {
        message.push_str(&format!(
            "Successfully enabled {}. To disable, adjust the layer settings.",
            display_names(&succeeded)
        ));
    }

    for (layer, err) in summary.failed() {
        if !message.is_empty() {
            message.push('\n');
        }
        message.push_str(&format!("Failed to load {}: {err}", layer.display_name()));
    }

    message
}

pub fn restart_message(unloaded: &[LayerId]) -> String {
    format!(
        "Unloaded {}. To fully disable the compatibility layers, restart the host.",
        display_names(unloaded)
    )
}

fn display_names(layers: &[LayerId]) -> String {
    layers
        .iter()
        .map(LayerId::display_name)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Terminal dialogs on stderr, answered from `input` (stdin by default).
/// With `assume_yes` every prompt is answered affirmatively without reading input.
pub struct ConsoleNotifier<R = BufReader<Stdin>> {
    assume_yes: bool,
    input: Mutex<R>,
}

impl ConsoleNotifier {
    pub fn new(assume_yes: bool) -> Self {
        Self::with_input(assume_yes, BufReader::new(tokio::io::stdin()))
    }
}

impl<R> ConsoleNotifier<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    pub fn with_input(assume_yes: bool, input: R) -> Self {
        Self {
            assume_yes,
            input: Mutex::new(input),
        }
    }

    async fn ask(&self, title: &str, body: &str, prompt: &str) -> Option<String> {
        let mut stderr = tokio::io::stderr();
        let text = format!("\n== {title} ==\n{body}\n{prompt} ");
        if let Err(err) = stderr.write_all(text.as_bytes()).await {
            tracing::warn!("failed to show dialog {title:?}: {err}");
            return None;
        }
        let _ = stderr.flush().await;

        if self.assume_yes {
            let _ = stderr.write_all(b"(auto)\n").await;
            return Some(String::new());
        }

        let mut line = String::new();
        match self.input.lock().await.read_line(&mut line).await {
            Ok(0) => None,
            Ok(_) => Some(line.trim().to_ascii_lowercase()),
            Err(err) => {
                tracing::warn!("failed to read dialog answer: {err}");
                None
            }
        }
    }
}

#[async_trait]
impl<R> Notifier for ConsoleNotifier<R>
where
    R: AsyncBufRead + Unpin + Send,
{
    async fn layers_loaded(&self, summary: &LoadSummary) -> bool {
        let body = loaded_message(summary);
        self.ask("Compatibility Layers Loaded", &body, "[Enter] Okay")
            .await
            .is_some()
    }

    async fn restart_required(&self, unloaded: &[LayerId]) -> RestartChoice {
        let body = restart_message(unloaded);
        match self.ask("Restart Required", &body, "Restart now? [Y/n]").await {
            Some(answer) if answer.is_empty() || answer.starts_with('y') => RestartChoice::Now,
            _ => RestartChoice::Later,
        }
    }
}
