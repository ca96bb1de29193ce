//! `media.download_video`: download a video with the `yt-dlp` CLI.
//!
//! yt-dlp runs with `--dump-single-json`, so one JSON document describes what
//! was fetched. BrightTALK pages, which yt-dlp rejects as unsupported, fall
//! back to scraping the page for a direct MP4 or HLS URL and fetching that
//! with curl or ffmpeg.

use crate::netscape;
use crate::paths;
use crate::process::{self, CommandRunner, CommandSpec, ProcessError};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use toolbox_core::{DomainError, ErrorCode};

/// Capability name
pub const NAME: &str = "media.download_video";

const DEFAULT_FORMAT: &str = "bestvideo+bestaudio/best";
const DEFAULT_TEMPLATE: &str = "%(title)s [%(id)s].%(ext)s";
const DEFAULT_USER_AGENT: &str = "Mozilla/5.0";
const INFO_FILE: &str = "info.json";
const FALLBACK_EXTRACTOR: &str = "brighttalk_fallback";

static MEDIA_URL: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r#"(?i)https?://[^\s"'>]+\.(?:m3u8|mp4)(?:\?[^\s"'>]+)?"#));
static BARE_MEDIA_URL: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r#"(?i)//[^\s"'>]+\.(?:m3u8|mp4)(?:\?[^\s"'>]+)?"#));
static ESCAPED_SLASH: Lazy<Result<Regex, regex::Error>> = Lazy::new(|| Regex::new(r"\\+/"));
static WEBCAST_ID: Lazy<Result<Regex, regex::Error>> =
    Lazy::new(|| Regex::new(r"/webcast/(?:player|\d+)/(\d+)(?:/|$|\?)"));

/// Input
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadInput {
    /// Page or media URL
    pub url: String,
    /// Destination directory, `./downloads` by default
    #[serde(default)]
    pub output_dir: Option<String>,
    /// yt-dlp output template
    #[serde(default)]
    pub filename_template: Option<String>,
    /// yt-dlp format selector
    #[serde(default = "default_format")]
    pub format: String,
    /// Netscape cookies file for authenticated sessions
    #[serde(default)]
    pub cookies_path: Option<String>,
    /// Extra HTTP headers
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// `User-Agent` header
    #[serde(default)]
    pub user_agent: Option<String>,
    /// `Referer` header
    #[serde(default)]
    pub referer: Option<String>,
    /// Download every entry of a playlist URL
    #[serde(default)]
    pub allow_playlist: bool,
    /// Fetch media; metadata only when false
    #[serde(default = "default_true")]
    pub download: bool,
    /// Replace existing files
    #[serde(default)]
    pub overwrite: bool,
    /// Suppress warnings
    #[serde(default)]
    pub quiet: bool,
    /// Write the metadata to `info.json`
    #[serde(default = "default_true")]
    pub write_info_json: bool,
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

fn default_true() -> bool {
    true
}

/// One downloaded or described entry
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VideoFile {
    /// Extractor id
    pub id: Option<String>,
    /// Title
    pub title: Option<String>,
    /// Canonical page URL
    pub webpage_url: Option<String>,
    /// Extractor that handled the URL
    pub extractor: Option<String>,
    /// Length in seconds
    pub duration_seconds: Option<f64>,
    /// File extension
    pub ext: Option<String>,
    /// Size, exact or approximate
    pub filesize_bytes: Option<f64>,
    /// Local path
    pub path: Option<String>,
    /// File exists after a download run
    pub downloaded: bool,
}

/// Output
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadOutput {
    /// Absolute destination directory
    pub output_dir: String,
    /// URL as given
    pub requested_url: String,
    /// Metadata file, when written
    pub info_json: Option<String>,
    /// Entries
    pub files: Vec<VideoFile>,
}

/// Errors
#[derive(Debug, thiserror::Error)]
pub enum DownloadError {
    /// yt-dlp, curl or ffmpeg missing or not runnable
    #[error(transparent)]
    Process(#[from] ProcessError),
    /// Unusable input
    #[error("{0}")]
    Invalid(String),
    /// Download or extraction failed
    #[error("{0}")]
    Download(String),
    /// Output directory or metadata could not be written
    #[error("{0}")]
    Output(String),
}

impl DomainError for DownloadError {
    fn code(&self) -> &'static str {
        match self {
            Self::Process(err) => err.code(),
            Self::Invalid(_) => ErrorCode::ValidationError.as_str(),
            Self::Download(_) => "download_error",
            Self::Output(_) => "output_error",
        }
    }
}

fn pattern(lazy: &'static Lazy<Result<Regex, regex::Error>>) -> Result<&'static Regex, DownloadError> {
    lazy.as_ref()
        .map_err(|e| DownloadError::Download(format!("invalid media pattern: {e}")))
}

/// Headers sent with every request: explicit ones, then user agent and referer
fn http_headers(input: &DownloadInput) -> BTreeMap<String, String> {
    let mut headers = input.headers.clone();
    if let Some(agent) = &input.user_agent {
        headers.insert("User-Agent".to_string(), agent.clone());
    }
    if let Some(referer) = &input.referer {
        headers.insert("Referer".to_string(), referer.clone());
    }
    headers
}

fn ffmpeg_location(runner: &dyn CommandRunner) -> Option<PathBuf> {
    ["FFMPEG_BIN", "FFMPEG_PATH"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|raw| paths::expand_home(&raw))
        .find(|path| path.exists())
        .or_else(|| runner.locate("ffmpeg"))
}

struct Request<'a> {
    url: &'a str,
    out_root: &'a Path,
    cookies: Option<&'a Path>,
    headers: &'a BTreeMap<String, String>,
    ffmpeg: Option<PathBuf>,
}

/// yt-dlp argv for one request
fn ytdlp_command(input: &DownloadInput, request: &Request<'_>) -> CommandSpec {
    let mut spec = CommandSpec::new("yt-dlp").arg("--dump-single-json");
    if input.download {
        spec = spec.arg("--no-simulate");
    }
    spec = spec
        .args(["-f", input.format.as_str()])
        .arg("-P")
        .arg(request.out_root.display().to_string())
        .arg("-o")
        .arg(input.filename_template.as_deref().unwrap_or(DEFAULT_TEMPLATE))
        .arg(if input.allow_playlist { "--yes-playlist" } else { "--no-playlist" })
        .arg(if input.overwrite { "--force-overwrites" } else { "--no-overwrites" })
        .args(["--retries", "3", "--fragment-retries", "3", "--concurrent-fragments", "3"])
        .args(["--merge-output-format", "mp4", "--no-progress"]);
    if input.quiet {
        spec = spec.arg("--no-warnings");
    }
    if let Some(cookies) = request.cookies {
        spec = spec.arg("--cookies").arg(cookies.display().to_string());
    }
    for (name, value) in request.headers {
        spec = spec.arg("--add-header").arg(format!("{name}:{value}"));
    }
    if let Some(ffmpeg) = &request.ffmpeg {
        spec = spec.arg("--ffmpeg-location").arg(ffmpeg.display().to_string());
    }
    spec.arg(request.url)
}

fn number(value: Option<&Value>) -> Option<f64> {
    match value? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn string(entry: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|key| entry.get(*key))
        .find(|v| !v.is_null() && v.as_str() != Some(""))
        .map(|v| v.as_str().map_or_else(|| v.to_string(), str::to_string))
}

fn non_blank(value: Option<&Value>) -> Option<String> {
    value
        .and_then(Value::as_str)
        .filter(|s| !s.trim().is_empty())
        .map(str::to_string)
}

/// Where yt-dlp put (or would put) an entry
fn entry_path(entry: &Value) -> Option<String> {
    let requested = entry
        .get("requested_downloads")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .find_map(|item| non_blank(item.get("filepath")).or_else(|| non_blank(item.get("filename"))));
    requested
        .or_else(|| non_blank(entry.get("filepath")))
        .or_else(|| non_blank(entry.get("_filename")))
}

/// Playlist entries, or the document itself
fn entries(info: &Value) -> Vec<&Value> {
    match info.get("entries") {
        None | Some(Value::Null) => vec![info],
        Some(Value::Array(items)) => items.iter().filter(|e| e.is_object()).collect(),
        Some(_) => Vec::new(),
    }
}

/// File records from a yt-dlp info document
#[must_use]
pub fn describe_entries(info: &Value, download: bool) -> Vec<VideoFile> {
    entries(info)
        .into_iter()
        .map(|entry| {
            let path = entry_path(entry);
            let size = number(entry.get("filesize"))
                .filter(|n| *n != 0.0)
                .or_else(|| number(entry.get("filesize_approx")));
            VideoFile {
                id: string(entry, &["id"]),
                title: string(entry, &["title"]),
                webpage_url: string(entry, &["webpage_url", "original_url"]),
                extractor: string(entry, &["extractor_key", "extractor"]),
                duration_seconds: number(entry.get("duration")),
                ext: string(entry, &["ext"]),
                filesize_bytes: size,
                downloaded: download && path.as_deref().is_some_and(|p| Path::new(p).exists()),
                path,
            }
        })
        .collect()
}

fn write_info(out_root: &Path, info: &Value) -> Result<String, DownloadError> {
    let path = out_root.join(INFO_FILE);
    let text = serde_json::to_string_pretty(info).map_err(|e| DownloadError::Output(e.to_string()))?;
    std::fs::write(&path, format!("{text}\n"))
        .map_err(|e| DownloadError::Output(format!("cannot write {}: {e}", path.display())))?;
    Ok(path.display().to_string())
}

/// Last JSON line of yt-dlp stdout
fn parse_info(stdout: &str) -> Result<Value, DownloadError> {
    stdout
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .ok_or_else(|| DownloadError::Download("yt-dlp printed no metadata".to_string()))
        .and_then(|line| {
            serde_json::from_str(line).map_err(|e| DownloadError::Download(format!("invalid yt-dlp metadata: {e}")))
        })
}

/// Download `input.url`
///
/// # Errors
///
/// Returns `validation_error` for a blank URL or missing cookies file,
/// `dependency_error` without yt-dlp and `download_error` if extraction fails
pub fn download_video(runner: &dyn CommandRunner, input: DownloadInput) -> Result<DownloadOutput, DownloadError> {
    let url = input.url.trim();
    if url.is_empty() {
        return Err(DownloadError::Invalid("url is required".to_string()));
    }
    process::require(runner, "yt-dlp")?;

    let out_root = match &input.output_dir {
        Some(dir) => paths::absolute(&paths::expand_home(dir)),
        None => paths::absolute(Path::new("downloads")),
    };
    std::fs::create_dir_all(&out_root)
        .map_err(|e| DownloadError::Output(format!("cannot create {}: {e}", out_root.display())))?;

    let cookies = match &input.cookies_path {
        Some(raw) => {
            let path = paths::absolute(&paths::expand_home(raw));
            if !path.is_file() {
                return Err(DownloadError::Invalid(format!("cookies_path not found: {}", path.display())));
            }
            Some(path)
        }
        None => None,
    };
    let headers = http_headers(&input);
    let request = Request {
        url,
        out_root: &out_root,
        cookies: cookies.as_deref(),
        headers: &headers,
        ffmpeg: ffmpeg_location(runner),
    };

    tracing::info!(url, output_dir = %out_root.display(), "downloading video");
    let output = process::run(runner, &ytdlp_command(&input, &request))?;
    if !output.success() {
        let message = output.error_message("yt-dlp failed");
        if message.contains("Unsupported URL") && is_brighttalk(url) {
            tracing::info!(url, "yt-dlp does not support the page, scraping for media");
            return brighttalk(runner, &input, &request);
        }
        return Err(DownloadError::Download(message));
    }

    let info = parse_info(&output.stdout)?;
    let info_json = if input.write_info_json {
        Some(write_info(&out_root, &info)?)
    } else {
        None
    };
    Ok(DownloadOutput {
        output_dir: out_root.display().to_string(),
        requested_url: input.url.clone(),
        info_json,
        files: describe_entries(&info, input.download),
    })
}

fn is_brighttalk(url: &str) -> bool {
    url.to_ascii_lowercase().contains("brighttalk.com")
}

/// Webcast id from `/webcast/<channel>/<id>` or `/webcast/player/<id>`
#[must_use]
pub fn webcast_id(url: &str) -> Option<String> {
    let pattern = WEBCAST_ID.as_ref().ok()?;
    pattern.captures(url).and_then(|c| c.get(1)).map(|m| m.as_str().to_string())
}

/// Direct media URLs embedded in a page, sorted and unique
///
/// # Errors
///
/// Returns error if a media pattern fails to compile
pub fn media_urls(html: &str) -> Result<Vec<String>, DownloadError> {
    let unescaped = html
        .replace("\\u0026", "&")
        .replace("\\u003d", "=")
        .replace("\\u002F", "/");
    let normalized = pattern(&ESCAPED_SLASH)?.replace_all(&unescaped, "/");
    let mut urls: BTreeSet<String> = pattern(&MEDIA_URL)?
        .find_iter(&normalized)
        .map(|m| m.as_str().to_string())
        .collect();
    urls.extend(
        pattern(&BARE_MEDIA_URL)?
            .find_iter(&normalized)
            .map(|m| format!("https:{}", m.as_str())),
    );
    Ok(urls.into_iter().collect())
}

fn is_mp4(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    lower.ends_with(".mp4") || lower.contains(".mp4?")
}

/// Prefer MP4 over HLS, then the highest resolution hint
#[must_use]
pub fn best_media_url(urls: &[String]) -> Option<&String> {
    let score = |url: &&String| {
        let lower = url.to_ascii_lowercase();
        let resolution = ["2160", "1440", "1080", "720", "480", "360"]
            .iter()
            .find(|hint| lower.contains(*hint))
            .and_then(|hint| hint.parse::<u32>().ok())
            .unwrap_or(0);
        (is_mp4(url), resolution)
    };
    urls.iter().rev().max_by_key(score)
}

/// `-H` arguments, skipping headers curl gets through dedicated flags
fn curl_common(spec: CommandSpec, request: &Request<'_>, user_agent: &str) -> CommandSpec {
    let mut spec = spec.args(["-A", user_agent]);
    if let Some(referer) = request.headers.get("Referer") {
        spec = spec.args(["-e", referer.as_str()]);
    }
    if let Some(cookies) = request.cookies {
        spec = spec.arg("-b").arg(cookies.display().to_string());
    }
    for (name, value) in request.headers {
        if matches!(name.to_ascii_lowercase().as_str(), "user-agent" | "referer" | "cookie") {
            continue;
        }
        spec = spec.arg("-H").arg(format!("{name}: {value}"));
    }
    spec
}

fn ffmpeg_headers(request: &Request<'_>) -> String {
    let mut lines: Vec<String> = Vec::new();
    if let Some(referer) = request.headers.get("Referer") {
        lines.push(format!("Referer: {referer}"));
    }
    for (name, value) in request.headers {
        match name.to_ascii_lowercase().as_str() {
            "user-agent" | "referer" => {}
            "cookie" => lines.push(format!("Cookie: {value}")),
            _ => lines.push(format!("{name}: {value}")),
        }
    }
    let has_cookie = lines.iter().any(|l| l.to_ascii_lowercase().starts_with("cookie:"));
    if !has_cookie {
        let jar = request.cookies.and_then(|path| std::fs::read_to_string(path).ok());
        if let Some(header) = jar.and_then(|text| netscape::cookie_header(&text, "brighttalk.com")) {
            lines.push(format!("Cookie: {header}"));
        }
    }
    lines.iter().map(|l| format!("{l}\r\n")).collect()
}

fn brighttalk(
    runner: &dyn CommandRunner,
    input: &DownloadInput,
    request: &Request<'_>,
) -> Result<DownloadOutput, DownloadError> {
    process::require(runner, "curl")?;
    let user_agent = input.user_agent.as_deref().unwrap_or(DEFAULT_USER_AGENT);
    let id = webcast_id(request.url);

    let mut pages = vec![request.url.to_string()];
    if let Some(id) = &id {
        pages.push(format!("https://www.brighttalk.com/webcast/player/{id}"));
    }

    let mut found: BTreeSet<String> = BTreeSet::new();
    for page in &pages {
        let spec = curl_common(CommandSpec::new("curl").arg("-fsSL"), request, user_agent).arg(page.as_str());
        match process::run(runner, &spec) {
            Ok(output) if output.success() => found.extend(media_urls(&output.stdout)?),
            Ok(output) => tracing::debug!(page = %page, error = %output.error_message("fetch failed"), "page fetch failed"),
            Err(err) => tracing::debug!(page = %page, error = %err, "page fetch failed"),
        }
    }
    let found: Vec<String> = found.into_iter().collect();
    let Some(media_url) = best_media_url(&found).cloned() else {
        let hint = if request.cookies.is_none() {
            " Try again with cookies_path (BrightTALK playback often requires an authenticated session)."
        } else {
            ""
        };
        return Err(DownloadError::Download(format!(
            "no direct media URL found in BrightTALK pages.{hint}"
        )));
    };

    let dst = request
        .out_root
        .join(format!("brighttalk_{}.mp4", id.as_deref().unwrap_or("download")));
    let mut downloaded = false;
    if input.download {
        if !dst.exists() || input.overwrite {
            let spec = if is_mp4(&media_url) {
                curl_common(CommandSpec::new("curl").arg("-fL"), request, user_agent)
                    .arg("-o")
                    .arg(dst.display().to_string())
                    .arg(media_url.as_str())
            } else {
                let ffmpeg = request
                    .ffmpeg
                    .clone()
                    .ok_or_else(|| ProcessError::Missing("ffmpeg".to_string()))?;
                let mut spec = CommandSpec::new(ffmpeg.display().to_string())
                    .arg(if input.overwrite { "-y" } else { "-n" });
                if let Some(agent) = &input.user_agent {
                    spec = spec.args(["-user_agent", agent.as_str()]);
                }
                let headers = ffmpeg_headers(request);
                if !headers.is_empty() {
                    spec = spec.arg("-headers").arg(headers);
                }
                spec.args(["-i", media_url.as_str(), "-c", "copy", "-bsf:a", "aac_adtstoasc"])
                    .arg(dst.display().to_string())
            };
            let output = process::run(runner, &spec)?;
            if !output.success() {
                return Err(DownloadError::Download(format!(
                    "download failed ({}): {}",
                    if is_mp4(&media_url) { "curl" } else { "ffmpeg" },
                    output.error_message("no output")
                )));
            }
        }
        downloaded = dst.exists();
    }

    let info_json = if input.write_info_json {
        let info = json!({
            "requested_url": request.url,
            "candidate_pages": pages,
            "media_url": media_url,
            "found_media_urls": found,
        });
        Some(write_info(request.out_root, &info)?)
    } else {
        None
    };
    let filesize_bytes = std::fs::metadata(&dst).ok().map(|m| m.len() as f64);

    Ok(DownloadOutput {
        output_dir: request.out_root.display().to_string(),
        requested_url: input.url.clone(),
        info_json,
        files: vec![VideoFile {
            id,
            title: None,
            webpage_url: Some(request.url.to_string()),
            extractor: Some(FALLBACK_EXTRACTOR.to_string()),
            duration_seconds: None,
            ext: Some("mp4".to_string()),
            filesize_bytes,
            path: Some(dst.display().to_string()),
            downloaded,
        }],
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::process::fake::FakeRunner;

    fn input(value: Value) -> DownloadInput {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn test_ytdlp_command() {
        let dir = tempfile::tempdir().unwrap();
        let input = input(json!({
            "url": "https://video.example/watch?v=1",
            "quiet": true,
            "download": false,
            "user_agent": "agent/1",
            "headers": {"X-Token": "t"}
        }));
        let headers = http_headers(&input);
        let request = Request {
            url: &input.url,
            out_root: dir.path(),
            cookies: None,
            headers: &headers,
            ffmpeg: Some(PathBuf::from("/usr/bin/ffmpeg")),
        };
        let argv = ytdlp_command(&input, &request).argv();
        assert_eq!(argv[..2], ["yt-dlp", "--dump-single-json"]);
        assert!(!argv.contains(&"--no-simulate".to_string()));
        assert!(argv.contains(&"--no-playlist".to_string()));
        assert!(argv.contains(&"--no-overwrites".to_string()));
        assert!(argv.contains(&"--no-warnings".to_string()));
        assert!(argv.contains(&"User-Agent:agent/1".to_string()));
        assert!(argv.contains(&"X-Token:t".to_string()));
        assert!(argv.windows(2).any(|w| w == ["-o", DEFAULT_TEMPLATE]));
        assert!(argv.windows(2).any(|w| w == ["--ffmpeg-location", "/usr/bin/ffmpeg"]));
        assert_eq!(argv.last().unwrap(), "https://video.example/watch?v=1");
    }

    #[test]
    fn test_describe_single_and_playlist() {
        let dir = tempfile::tempdir().unwrap();
        let file = dir.path().join("clip.mp4");
        std::fs::write(&file, b"x").unwrap();
        let single = json!({
            "id": "abc", "title": "Clip", "original_url": "https://v.example/abc",
            "extractor_key": "Generic", "duration": "12.5", "ext": "mp4",
            "filesize": 0, "filesize_approx": 2048,
            "requested_downloads": [{"filepath": file.display().to_string()}]
        });
        let files = describe_entries(&single, true);
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].webpage_url.as_deref(), Some("https://v.example/abc"));
        assert_eq!(files[0].duration_seconds, Some(12.5));
        assert_eq!(files[0].filesize_bytes, Some(2048.0));
        assert!(files[0].downloaded);
        assert!(!describe_entries(&single, false)[0].downloaded);

        let playlist = json!({"entries": [{"id": "1", "_filename": "/nowhere/1.mp4"}, "junk", {"id": 2}]});
        let files = describe_entries(&playlist, true);
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path.as_deref(), Some("/nowhere/1.mp4"));
        assert!(!files[0].downloaded);
        assert_eq!(files[1].id.as_deref(), Some("2"));
    }

    #[test]
    fn test_download_writes_info_json() {
        let dir = tempfile::tempdir().unwrap();
        let info = r#"{"id":"abc","title":"Clip","webpage_url":"https://v.example/abc","ext":"mp4"}"#;
        let runner = FakeRunner::with_binaries(&["yt-dlp"]).respond(0, &format!("{info}\n"), "");
        let out = download_video(
            &runner,
            input(json!({"url": " https://v.example/abc ", "output_dir": dir.path().display().to_string()})),
        )
        .unwrap();
        assert_eq!(out.files[0].title.as_deref(), Some("Clip"));
        let written = std::fs::read_to_string(dir.path().join(INFO_FILE)).unwrap();
        assert!(written.ends_with("}\n"));
        assert_eq!(out.info_json, Some(dir.path().join(INFO_FILE).display().to_string()));
        let argv = runner.calls()[0].argv();
        assert!(argv.contains(&"--no-simulate".to_string()));
        assert_eq!(argv.last().unwrap(), "https://v.example/abc");
    }

    #[test]
    fn test_input_errors() {
        let runner = FakeRunner::with_binaries(&["yt-dlp"]);
        let err = download_video(&runner, input(json!({"url": "  "}))).unwrap_err();
        assert_eq!(err.code(), "validation_error");

        let dir = tempfile::tempdir().unwrap();
        let err = download_video(
            &runner,
            input(json!({
                "url": "https://v.example/abc",
                "output_dir": dir.path().display().to_string(),
                "cookies_path": dir.path().join("missing.txt").display().to_string()
            })),
        )
        .unwrap_err();
        assert!(err.to_string().starts_with("cookies_path not found"));

        let err = download_video(&FakeRunner::empty(), input(json!({"url": "https://v.example"}))).unwrap_err();
        assert_eq!(err.code(), "dependency_error");
    }

    #[test]
    fn test_ytdlp_failure_is_download_error() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::with_binaries(&["yt-dlp"]).respond(1, "", "ERROR: Video unavailable\n");
        let err = download_video(
            &runner,
            input(json!({"url": "https://v.example/gone", "output_dir": dir.path().display().to_string()})),
        )
        .unwrap_err();
        assert_eq!(err.code(), "download_error");
        assert_eq!(err.to_string(), "ERROR: Video unavailable");
    }

    #[test]
    fn test_media_url_extraction() {
        let html = r#"{"src":"https:\/\/cdn.example\/v\/720\/clip.mp4?token=a\u0026b=1"}
            <source src="//cdn.example/hls/master.m3u8">
            <a href="https://cdn.example/page.html">"#;
        let urls = media_urls(html).unwrap();
        assert_eq!(
            urls,
            vec![
                "https://cdn.example/hls/master.m3u8".to_string(),
                "https://cdn.example/v/720/clip.mp4?token=a&b=1".to_string(),
            ]
        );
        assert_eq!(best_media_url(&urls).map(String::as_str), Some(urls[1].as_str()));
    }

    #[test]
    fn test_best_media_url_prefers_resolution_then_first() {
        let urls: Vec<String> = [
            "https://a/360/v.mp4",
            "https://a/1080/v.m3u8",
            "https://a/1080/v.mp4",
            "https://b/1080/v.mp4",
        ]
        .iter()
        .map(|s| (*s).to_string())
        .collect();
        assert_eq!(best_media_url(&urls).map(String::as_str), Some("https://a/1080/v.mp4"));
        assert!(best_media_url(&[]).is_none());
    }

    #[test]
    fn test_webcast_id() {
        assert_eq!(webcast_id("https://www.brighttalk.com/webcast/18/612345").as_deref(), Some("612345"));
        assert_eq!(webcast_id("https://www.brighttalk.com/webcast/player/99?x=1").as_deref(), Some("99"));
        assert_eq!(webcast_id("https://www.brighttalk.com/channel/18"), None);
    }

    #[test]
    fn test_brighttalk_fallback_direct_mp4() {
        let dir = tempfile::tempdir().unwrap();
        let url = "https://www.brighttalk.com/webcast/18/612345";
        let runner = FakeRunner::with_binaries(&["yt-dlp", "curl"])
            .respond(1, "", "ERROR: Unsupported URL: https://www.brighttalk.com/webcast/18/612345\n")
            .respond(0, "<html>nothing here</html>", "")
            .respond(0, r#"{"url":"https://cdn.brighttalk.com/612345/1080/talk.mp4"}"#, "")
            .respond(0, "", "");
        let out = download_video(
            &runner,
            input(json!({"url": url, "output_dir": dir.path().display().to_string()})),
        )
        .unwrap();
        let file = &out.files[0];
        assert_eq!(file.extractor.as_deref(), Some(FALLBACK_EXTRACTOR));
        assert_eq!(file.id.as_deref(), Some("612345"));
        assert!(file.path.as_deref().unwrap().ends_with("brighttalk_612345.mp4"));
        assert!(!file.downloaded);

        let calls = runner.calls();
        assert_eq!(calls.len(), 4);
        assert_eq!(calls[2].args.last().unwrap(), "https://www.brighttalk.com/webcast/player/612345");
        assert_eq!(calls[3].args.last().unwrap(), "https://cdn.brighttalk.com/612345/1080/talk.mp4");
        assert_eq!(calls[3].args[0], "-fL");

        let info: Value = serde_json::from_str(&std::fs::read_to_string(dir.path().join(INFO_FILE)).unwrap()).unwrap();
        assert_eq!(info["media_url"], "https://cdn.brighttalk.com/612345/1080/talk.mp4");
        assert_eq!(info["candidate_pages"].as_array().unwrap().len(), 2);
    }

    #[test]
    fn test_brighttalk_without_media_suggests_cookies() {
        let dir = tempfile::tempdir().unwrap();
        let runner = FakeRunner::with_binaries(&["yt-dlp", "curl"])
            .respond(1, "", "ERROR: Unsupported URL: x\n")
            .respond(22, "", "curl: (22) 403\n");
        let err = download_video(
            &runner,
            input(json!({"url": "https://www.brighttalk.com/channel/1", "output_dir": dir.path().display().to_string()})),
        )
        .unwrap_err();
        assert_eq!(err.code(), "download_error");
        assert!(err.to_string().contains("Try again with cookies_path"));
    }

    #[test]
    fn test_ffmpeg_headers_pull_cookies_from_jar() {
        let dir = tempfile::tempdir().unwrap();
        let jar = dir.path().join("cookies.txt");
        std::fs::write(&jar, ".brighttalk.com\tTRUE\t/\tTRUE\t0\tBTSESSION\ts1\n").unwrap();
        let headers: BTreeMap<String, String> =
            [("Referer".to_string(), "https://www.brighttalk.com/".to_string())].into_iter().collect();
        let request = Request {
            url: "https://www.brighttalk.com/webcast/1/2",
            out_root: dir.path(),
            cookies: Some(&jar),
            headers: &headers,
            ffmpeg: None,
        };
        assert_eq!(
            ffmpeg_headers(&request),
            "Referer: https://www.brighttalk.com/\r\nCookie: BTSESSION=s1\r\n"
        );
    }
}
