/// Trusted source replaying raw blocks exported by a local full node.
///
/// Every block lives in `<height>.json` inside the blocks directory. The
/// highest height present is the head. New files are picked up by `watch`
/// and pushed to the full-node orchestrator.
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use containers::{Height, RawBlock};
use networking::sync::{SourceError, TrustedSource};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct JsonFileSource {
    dir: PathBuf,
}

impl JsonFileSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn block_path(&self, height: Height) -> PathBuf {
        self.dir.join(format!("{height}.json"))
    }

    /// Poll for blocks above `pushed_height` and push them in height order.
    pub fn watch(
        self: Arc<Self>,
        mut pushed_height: Height,
        pushes: mpsc::UnboundedSender<RawBlock>,
        interval: Duration,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;

                let head_height = match self.head_height().await {
                    Ok(height) => height,
                    Err(err) => {
                        warn!(%err, "Polling trusted source failed");
                        continue;
                    }
                };

                while pushed_height < head_height {
                    let height = pushed_height + 1;
                    match self.raw_block(height).await {
                        Ok(block) => {
                            debug!(height, "Pushing new block");
                            if pushes.send(block).is_err() {
                                return;
                            }
                            pushed_height = height;
                        }
                        Err(err) => {
                            warn!(height, %err, "New block not readable yet");
                            break;
                        }
                    }
                }
            }
        })
    }
}

fn height_of(path: &Path) -> Option<Height> {
    if path.extension()? != "json" {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

#[async_trait]
impl TrustedSource for JsonFileSource {
    async fn head_height(&self) -> Result<Height, SourceError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|err| SourceError::Unreachable(format!("{}: {err}", self.dir.display())))?;

        let mut head_height = None;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|err| SourceError::Unreachable(err.to_string()))?
        {
            if let Some(height) = height_of(&entry.path()) {
                head_height = head_height.max(Some(height));
            }
        }

        head_height.ok_or_else(|| {
            SourceError::Rpc(format!("no blocks found in {}", self.dir.display()))
        })
    }

    async fn raw_block(&self, height: Height) -> Result<RawBlock, SourceError> {
        let path = self.block_path(height);
        let bytes = tokio::fs::read(&path).await.map_err(|err| match err.kind() {
            ErrorKind::NotFound => SourceError::Rpc(format!("no block at height {height}")),
            _ => SourceError::Unreachable(format!("{}: {err}", path.display())),
        })?;

        let block: RawBlock = serde_json::from_slice(&bytes)
            .map_err(|err| SourceError::Rpc(format!("{}: {err}", path.display())))?;
        if block.height != height {
            return Err(SourceError::Rpc(format!(
                "{} holds block {} instead of {height}",
                path.display(),
                block.height
            )));
        }
        Ok(block)
    }
}
