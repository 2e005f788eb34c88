use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use derive_new::new;
use serde::Deserialize;
use snafu::{ensure, ResultExt, Snafu};
use tokio::process::Command;
use tracing::instrument;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub(crate)))]
pub enum ExtractError {
    /// The extractor executable could not be started
    #[snafu(display("could not run `{}`: {source}", program.display()))]
    Spawn {
        program: PathBuf,
        source: std::io::Error,
    },

    /// The extractor ran but rejected the url (unsupported site, private video, network failure...)
    #[snafu(display("extractor exited with {}: {stderr}", code.map_or("a signal".to_string(), |code| format!("code {code}"))))]
    Exit { code: Option<i32>, stderr: String },

    #[snafu(display("extractor returned malformed metadata: {source}"))]
    MalformedOutput { source: serde_json::Error },
}

/// The subset of the extractor's metadata this service cares about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, new)]
pub struct VideoInfo {
    #[serde(default)]
    pub view_count: Option<u64>,
    #[serde(default)]
    pub like_count: Option<u64>,
    #[serde(default)]
    #[new(default)]
    pub title: Option<String>,
}

/// Something that can look up public metadata of a hosted video.
#[async_trait]
pub trait Extractor: Send + Sync {
    async fn extract(&self, url: &str) -> Result<VideoInfo, ExtractError>;
}

/// Runs `yt-dlp` as a child process in metadata-only mode.
#[derive(Debug, Clone, new)]
pub struct YtDlp {
    program: PathBuf,
    verbose: bool,
}

impl YtDlp {
    fn command(&self, url: &str) -> Command {
        let mut command = Command::new(&self.program);

        command
            .arg("--dump-single-json")
            .arg("--skip-download")
            .arg("--no-playlist");

        if !self.verbose {
            command.arg("--quiet").arg("--no-warnings");
        }

        // everything after `--` is a url, even if it starts with a dash
        command.arg("--").arg(url);

        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        command
    }
}

#[async_trait]
impl Extractor for YtDlp {
    #[instrument(skip(self))]
    async fn extract(&self, url: &str) -> Result<VideoInfo, ExtractError> {
        let output = self
            .command(url)
            .output()
            .await
            .context(SpawnSnafu {
                program: self.program.clone(),
            })?;

        ensure!(
            output.status.success(),
            ExitSnafu {
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
        );

        serde_json::from_slice(&output.stdout).context(MalformedOutputSnafu)
    }
}
