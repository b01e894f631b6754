use std::borrow::Cow;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::OnceLock;
use std::time::Duration;

use futures::future::BoxFuture;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, info, warn};

use vellora_core::config::YoutubeConfig;
use vellora_core::error::{Result, VelloraError};
use vellora_core::traits::ToolAdapter;
use vellora_core::types::{SearchQuery, TranscriptRequest, VideoHit};

const DESCRIPTION_CHARS: usize = 200;

/// Turn a bare video id into a watch URL; full URLs pass through.
pub fn video_url(video_ref: &str) -> String {
    let video_ref = video_ref.trim();
    if video_ref.starts_with("http://") || video_ref.starts_with("https://") {
        video_ref.to_string()
    } else {
        format!("https://youtu.be/{}", video_ref)
    }
}

/// Run yt-dlp with a wall-clock limit; the child is killed if the future is dropped.
async fn run_ytdlp(binary: &str, args: &[&str], timeout_secs: u64, tool: &str) -> Result<Vec<u8>> {
    let mut cmd = Command::new(binary);
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let output = tokio::time::timeout(Duration::from_secs(timeout_secs), cmd.output())
        .await
        .map_err(|_| VelloraError::ToolTimeout {
            tool: tool.to_string(),
            timeout_secs,
        })?
        .map_err(|e| VelloraError::ToolExecution {
            tool: tool.to_string(),
            message: format!("failed to spawn {}: {}", binary, e),
        })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(VelloraError::ToolExecution {
            tool: tool.to_string(),
            message: format!("yt-dlp exited with {}: {}", output.status, stderr.trim()),
        });
    }

    Ok(output.stdout)
}

// ── Video search ────────────────────────────────────────────────

/// Video search through `yt-dlp ytsearchN:` in flat-playlist mode.
pub struct YoutubeSearch {
    config: YoutubeConfig,
}

impl YoutubeSearch {
    pub fn new(config: YoutubeConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Deserialize)]
struct FlatEntry {
    #[serde(default)]
    id: String,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
}

/// One JSON object per line; malformed lines are skipped.
fn parse_search_output(stdout: &str, max_results: usize) -> Vec<VideoHit> {
    stdout
        .lines()
        .filter(|line| !line.trim().is_empty())
        .filter_map(|line| match serde_json::from_str::<FlatEntry>(line) {
            Ok(entry) => Some(entry),
            Err(e) => {
                debug!(error = %e, "Skipping unparseable yt-dlp line");
                None
            }
        })
        .filter(|entry| !entry.id.is_empty())
        .map(|entry| VideoHit {
            title: entry.title.unwrap_or_default(),
            url: entry
                .url
                .filter(|u| u.starts_with("http"))
                .unwrap_or_else(|| format!("https://www.youtube.com/watch?v={}", entry.id)),
            description: entry
                .description
                .unwrap_or_default()
                .chars()
                .take(DESCRIPTION_CHARS)
                .collect(),
            duration_secs: entry.duration.map(|d| d.max(0.0) as u64).unwrap_or(0),
        })
        .take(max_results)
        .collect()
}

impl ToolAdapter for YoutubeSearch {
    type Args = SearchQuery;
    type Output = Vec<VideoHit>;

    fn name(&self) -> &str {
        "video_search"
    }

    fn invoke(&self, args: SearchQuery) -> BoxFuture<'_, Result<Vec<VideoHit>>> {
        Box::pin(async move {
            let target = format!("ytsearch{}:{}", args.max_results, args.query);
            let stdout = run_ytdlp(
                &self.config.ytdlp_path,
                &["--dump-json", "--flat-playlist", "--no-warnings", target.as_str()],
                self.config.timeout_secs,
                self.name(),
            )
            .await?;

            let hits = parse_search_output(&String::from_utf8_lossy(&stdout), args.max_results);
            debug!(query = %args.query, hits = hits.len(), "Video search finished");
            Ok(hits)
        })
    }
}

// ── Transcript ──────────────────────────────────────────────────

/// Caption download through yt-dlp, manual subtitles preferred over automatic ones.
pub struct YoutubeTranscript {
    config: YoutubeConfig,
}

impl YoutubeTranscript {
    pub fn new(config: YoutubeConfig) -> Self {
        Self { config }
    }
}

/// Flatten SRT or WebVTT cues into plain text.
pub fn captions_to_text(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();

    for line in raw.lines() {
        let line = line.trim();
        if line.is_empty()
            || line.contains("-->")
            || line.chars().all(|c| c.is_ascii_digit())
            || line.starts_with("WEBVTT")
            || line.starts_with("Kind:")
            || line.starts_with("Language:")
            || line.starts_with("NOTE")
        {
            continue;
        }

        let text = strip_tags(line);
        let text = text.trim();
        if text.is_empty() {
            continue;
        }
        // Automatic captions repeat each line across rolling cues
        if lines.last().map(|prev| prev == text).unwrap_or(false) {
            continue;
        }
        lines.push(text.to_string());
    }

    lines.join(" ")
}

/// Drop inline markup: `<i>`, `<c.color>`, and VTT word timestamps like `<00:00:01.200>`.
fn strip_tags(line: &str) -> Cow<'_, str> {
    static TAG: OnceLock<Regex> = OnceLock::new();
    TAG.get_or_init(|| Regex::new(r"<[^<>]*>").expect("tag pattern is valid"))
        .replace_all(line, "")
}

fn subtitle_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            matches!(
                p.extension().and_then(|e| e.to_str()),
                Some("srt") | Some("vtt")
            )
        })
        .collect();
    // Prefer SRT when both were written
    files.sort_by_key(|p| p.extension().and_then(|e| e.to_str()) != Some("srt"));
    Ok(files)
}

impl ToolAdapter for YoutubeTranscript {
    type Args = TranscriptRequest;
    type Output = String;

    fn name(&self) -> &str {
        "transcript"
    }

    fn invoke(&self, args: TranscriptRequest) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move {
            let url = video_url(&args.video_url);
            let dir = tempfile::tempdir()?;
            let template = dir.path().join("%(id)s.%(ext)s");
            let template = template.to_string_lossy();

            run_ytdlp(
                &self.config.ytdlp_path,
                &[
                    "--skip-download",
                    "--write-subs",
                    "--write-auto-subs",
                    "--sub-langs",
                    args.language.as_str(),
                    "--sub-format",
                    "srt/vtt/best",
                    "--no-warnings",
                    "-o",
                    template.as_ref(),
                    url.as_str(),
                ],
                self.config.timeout_secs,
                self.name(),
            )
            .await?;

            let files = subtitle_files(dir.path())?;
            let Some(path) = files.first() else {
                info!(video = %url, "No captions available");
                return Err(VelloraError::NoCaptions(url));
            };

            let raw = tokio::fs::read_to_string(path).await?;
            let text = captions_to_text(&raw);
            if text.is_empty() {
                warn!(video = %url, "Caption file was empty");
                return Err(VelloraError::NoCaptions(url));
            }

            debug!(video = %url, chars = text.len(), "Transcript fetched");
            Ok(text)
        })
    }
}
