use std::io::{self, Write};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use dtm_core::{
    build_options, default_key, resolve, BoundingBox, ClipBounds, Compression, CoverageMode,
    JobRequest, TileRecord,
};
use dtm_engine::{
    CatalogClient, CatalogSummary, Delivery, EngineConfig, GdalTool, JobOrchestrator,
    ProgressEvent,
};
use dtm_logging::dtm_info;
use futures_util::StreamExt;
use tokio::io::AsyncWriteExt;

use crate::render::{format_bytes, option_line, ProgressPrinter};
use crate::settings::AppSettings;

pub struct FetchArgs {
    pub bbox: BoundingBox,
    pub version: Option<String>,
    pub coverage: CoverageMode,
    pub clip: Option<ClipBounds>,
    pub compression: Option<String>,
    pub output: PathBuf,
    pub json: bool,
}

fn catalog(settings: &AppSettings, config: &EngineConfig) -> Result<CatalogClient> {
    let client = CatalogClient::new(&config.fetch)?;
    Ok(match &settings.catalog_url {
        Some(url) => client.with_base_url(url.clone()),
        None => client,
    })
}

async fn find_tiles(
    settings: &AppSettings,
    config: &EngineConfig,
    bbox: &BoundingBox,
) -> Result<Vec<TileRecord>> {
    if !bbox.is_valid() {
        bail!("bounding box must have finite coordinates with min < max");
    }
    let tiles = catalog(settings, config)?
        .query_by_extent(bbox)
        .await
        .context("catalog search failed")?;
    Ok(tiles)
}

pub async fn search(settings: &AppSettings, bbox: BoundingBox, json: bool) -> Result<()> {
    let config = settings.engine_config();
    let tiles = find_tiles(settings, &config, &bbox).await?;
    let options = build_options(&tiles);
    let default = default_key(&tiles);

    let mut out = io::stdout().lock();
    if json {
        let value = serde_json::json!({
            "tiles": tiles,
            "options": options,
            "default_key": default,
        });
        writeln!(out, "{}", serde_json::to_string_pretty(&value)?)?;
        return Ok(());
    }

    let summary = CatalogSummary::from_tiles(&tiles);
    writeln!(
        out,
        "{} tiles in {} projects, {} total",
        summary.tile_count,
        summary.projects.len(),
        format_bytes(summary.total_size_bytes)
    )?;
    for project in &summary.projects {
        writeln!(out, "  {project}")?;
    }
    if !options.is_empty() {
        writeln!(out, "Versions:")?;
        for option in &options {
            writeln!(
                out,
                "{}",
                option_line(option, default.as_deref() == Some(option.key.as_str()))
            )?;
        }
    }
    Ok(())
}

/// Resolves the requested version, runs one job and copies its output to `args.output`.
pub async fn fetch(settings: &AppSettings, args: FetchArgs) -> Result<()> {
    let config = settings.engine_config();
    let tiles = find_tiles(settings, &config, &args.bbox).await?;
    if tiles.is_empty() {
        bail!("no tiles intersect the requested area");
    }

    let options = build_options(&tiles);
    let key = match args.version {
        Some(key) => key,
        None => default_key(&tiles).ok_or_else(|| anyhow!("no version available"))?,
    };
    if !options.iter().any(|option| option.key == key) {
        let known: Vec<&str> = options.iter().map(|option| option.key.as_str()).collect();
        bail!("unknown version `{key}`; available: {}", known.join(", "));
    }

    let selected = resolve(&tiles, Some(&key), args.coverage);
    if selected.is_empty() {
        bail!("version `{key}` with coverage `{}` selects no tiles", args.coverage);
    }
    dtm_info!(
        "Fetching {} tiles for {} ({})",
        selected.len(),
        key,
        args.coverage
    );

    let compression = args
        .compression
        .as_deref()
        .or(settings.compression.as_deref())
        .map(Compression::from_keyword)
        .unwrap_or_default();
    let mut request = JobRequest::new(selected).with_compression(compression);
    if let Some(clip) = args.clip {
        request = request.with_clip_bounds(clip);
    }

    let orchestrator = JobOrchestrator::new(config)?;
    let (job_id, mut subscription) = orchestrator.start_watched(request).await;
    let mut printer = ProgressPrinter::new(io::stderr(), args.json);

    let mut completed = false;
    while let Some(delivery) = subscription.next().await {
        printer.print(&delivery)?;
        match delivery {
            Delivery::Event(ProgressEvent::Completed { .. }) => completed = true,
            Delivery::Event(ProgressEvent::Failed { reason }) => bail!("job failed: {reason}"),
            _ => {}
        }
    }
    if !completed {
        bail!("job {job_id} ended without a result");
    }

    let artifact = orchestrator.retrieve_artifact(&job_id).await?;
    let written = copy_stream(artifact.stream, &args.output).await?;
    dtm_info!("Wrote {} ({} bytes)", args.output.display(), written);
    eprintln!("Saved {} ({})", args.output.display(), format_bytes(written));
    Ok(())
}

async fn copy_stream<S, B>(mut stream: S, destination: &Path) -> Result<u64>
where
    S: futures_util::Stream<Item = io::Result<B>> + Unpin,
    B: AsRef<[u8]>,
{
    if let Some(parent) = destination.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await?;
    }
    let mut file = tokio::fs::File::create(destination)
        .await
        .with_context(|| format!("cannot create {}", destination.display()))?;
    let mut written = 0u64;
    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        let chunk = chunk.as_ref();
        file.write_all(chunk).await?;
        written += chunk.len() as u64;
    }
    file.flush().await?;
    Ok(written)
}

pub async fn check(settings: &AppSettings) -> Result<()> {
    let tool = GdalTool::new(settings.gdal_bin_dir.clone());
    let version = tool
        .check_available()
        .await
        .context("GDAL command-line tools not available")?;
    println!("{version}");
    Ok(())
}
