use std::path::Path;
use std::time::Instant;

use dtm_logging::{dtm_debug, dtm_info};
use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, RANGE};
use reqwest::StatusCode;
use tokio::fs::{self, File, OpenOptions};
use tokio::io::{AsyncWriteExt, BufWriter};

use crate::{FetchError, FetchSettings, ProgressEvent, TileProgress, TileStatus};

pub trait ProgressSink: Send + Sync {
    fn emit(&self, event: ProgressEvent);
}

/// Streams tile archives to disk, resuming partial files when the server allows it.
#[derive(Debug, Clone)]
pub struct ArchiveDownloader {
    client: reqwest::Client,
    settings: FetchSettings,
}

impl ArchiveDownloader {
    pub fn new(settings: FetchSettings) -> Result<Self, FetchError> {
        let client = reqwest::Client::builder()
            .user_agent(settings.user_agent.clone())
            .connect_timeout(settings.connect_timeout)
            .read_timeout(settings.read_timeout)
            .tcp_keepalive(std::time::Duration::from_secs(30))
            .build()
            .map_err(|err| FetchError::network(err.to_string()))?;
        Ok(Self { client, settings })
    }

    /// Size announced by a HEAD request, if the server answers one.
    pub async fn expected_size(&self, url: &str) -> Option<u64> {
        let response = self.client.head(url).send().await.ok()?;
        if !response.status().is_success() {
            return None;
        }
        // HEAD bodies are empty, so read the header rather than the body size hint.
        response
            .headers()
            .get(CONTENT_LENGTH)?
            .to_str()
            .ok()?
            .parse()
            .ok()
    }

    /// Downloads `url` into `archive_path` and returns the archive size.
    pub async fn download(
        &self,
        url: &str,
        archive_path: &Path,
        tile_name: &str,
        sink: &dyn ProgressSink,
    ) -> Result<u64, FetchError> {
        if let Some(parent) = archive_path.parent() {
            fs::create_dir_all(parent)
                .await
                .map_err(|err| FetchError::write(format!("{}: {err}", parent.display())))?;
        }

        let expected = self.expected_size(url).await.unwrap_or(0);
        let on_disk = match fs::metadata(archive_path).await {
            Ok(meta) if meta.is_file() => meta.len(),
            _ => 0,
        };

        if expected > 0 && on_disk == expected {
            dtm_debug!("{} already downloaded ({} bytes)", tile_name, expected);
            sink.emit(tile_event(
                tile_name,
                expected,
                expected,
                0.0,
                None,
                TileStatus::AlreadyDownloaded,
            ));
            return Ok(expected);
        }

        if expected > 0 && on_disk > 0 && on_disk < expected {
            let response = self
                .client
                .get(url)
                .header(RANGE, format!("bytes={on_disk}-"))
                .send()
                .await
                .map_err(map_reqwest_error)?;

            if response.status() == StatusCode::PARTIAL_CONTENT {
                dtm_info!("Resuming {} at byte {}", tile_name, on_disk);
                let file = OpenOptions::new()
                    .append(true)
                    .open(archive_path)
                    .await
                    .map_err(|err| FetchError::write(err.to_string()))?;
                let transfer = Transfer {
                    offset: on_disk,
                    total: expected,
                    status: TileStatus::Resuming,
                };
                return self.stream_to_file(response, file, transfer, tile_name, sink).await;
            }

            // The server ignored the range; take the full body it sent instead.
            let response = check_status(response)?;
            let file = File::create(archive_path)
                .await
                .map_err(|err| FetchError::write(err.to_string()))?;
            let transfer = Transfer::fresh(response.content_length());
            return self.stream_to_file(response, file, transfer, tile_name, sink).await;
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(map_reqwest_error)?;
        let response = check_status(response)?;
        let file = File::create(archive_path)
            .await
            .map_err(|err| FetchError::write(err.to_string()))?;
        let transfer = Transfer::fresh(response.content_length());
        self.stream_to_file(response, file, transfer, tile_name, sink).await
    }

    async fn stream_to_file(
        &self,
        response: reqwest::Response,
        file: File,
        transfer: Transfer,
        tile_name: &str,
        sink: &dyn ProgressSink,
    ) -> Result<u64, FetchError> {
        let Transfer {
            offset,
            total,
            status,
        } = transfer;

        sink.emit(tile_event(tile_name, offset, total, 0.0, None, status));

        let mut writer = BufWriter::new(file);
        let mut downloaded = offset;
        let started = Instant::now();
        let mut last_emit = started;

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(map_reqwest_error)?;
            writer
                .write_all(&chunk)
                .await
                .map_err(|err| FetchError::write(err.to_string()))?;
            downloaded += chunk.len() as u64;

            if last_emit.elapsed() >= self.settings.progress_interval {
                let rate = throughput(downloaded - offset, started.elapsed().as_secs_f64());
                sink.emit(tile_event(
                    tile_name,
                    downloaded,
                    total,
                    rate,
                    eta_seconds(total, downloaded, rate),
                    TileStatus::Downloading,
                ));
                last_emit = Instant::now();
            }
        }

        writer
            .flush()
            .await
            .map_err(|err| FetchError::write(err.to_string()))?;

        if total > 0 && downloaded != total {
            return Err(FetchError::network(format!(
                "transfer ended after {downloaded} of {total} bytes"
            )));
        }

        let rate = throughput(downloaded - offset, started.elapsed().as_secs_f64());
        sink.emit(tile_event(
            tile_name,
            downloaded,
            downloaded,
            rate,
            None,
            TileStatus::Completed,
        ));
        dtm_info!("Downloaded {} ({} bytes)", tile_name, downloaded);
        Ok(downloaded)
    }
}

struct Transfer {
    offset: u64,
    /// Full archive size, 0 when unknown.
    total: u64,
    status: TileStatus,
}

impl Transfer {
    fn fresh(content_length: Option<u64>) -> Self {
        Self {
            offset: 0,
            total: content_length.unwrap_or(0),
            status: TileStatus::Downloading,
        }
    }
}

pub(crate) fn tile_event(
    tile_name: &str,
    bytes_done: u64,
    bytes_total: u64,
    bytes_per_second: f64,
    eta_seconds: Option<u64>,
    status: TileStatus,
) -> ProgressEvent {
    ProgressEvent::TileProgress(TileProgress {
        tile_name: tile_name.to_string(),
        bytes_done,
        bytes_total,
        bytes_per_second,
        eta_seconds,
        status,
    })
}

/// Average bytes per second since the transfer started.
fn throughput(bytes: u64, elapsed_secs: f64) -> f64 {
    if elapsed_secs > 0.0 {
        bytes as f64 / elapsed_secs
    } else {
        0.0
    }
}

fn eta_seconds(total: u64, done: u64, bytes_per_second: f64) -> Option<u64> {
    if total == 0 || bytes_per_second <= 0.0 || done >= total {
        return None;
    }
    Some(((total - done) as f64 / bytes_per_second) as u64)
}

fn check_status(response: reqwest::Response) -> Result<reqwest::Response, FetchError> {
    let status = response.status();
    if status.is_success() {
        Ok(response)
    } else {
        Err(FetchError::network(format!("http status {status}")))
    }
}

fn map_reqwest_error(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        return FetchError::network(format!("timeout: {err}"));
    }
    FetchError::network(err.to_string())
}
