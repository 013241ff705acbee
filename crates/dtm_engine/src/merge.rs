use std::path::{Path, PathBuf};
use std::sync::Arc;

use dtm_core::{ClipBounds, Compression, WEB_MERCATOR};
use dtm_logging::{dtm_debug, dtm_info, dtm_warn};

use crate::fetch::ProgressSink;
use crate::raster_tool::{
    intermediate_path, is_float_raster_type, parse_band_data_type, RasterCommand, RasterTool,
};
use crate::{MergeError, ProgressEvent, Stage};

/// Mosaics extracted rasters into one cloud-optimized output through the external tool.
#[derive(Clone)]
pub struct MergeStage {
    tool: Arc<dyn RasterTool>,
    clip_srid: u32,
}

impl MergeStage {
    pub fn new(tool: Arc<dyn RasterTool>) -> Self {
        Self {
            tool,
            clip_srid: WEB_MERCATOR,
        }
    }

    pub fn with_clip_srid(mut self, clip_srid: u32) -> Self {
        self.clip_srid = clip_srid;
        self
    }

    pub async fn run(
        &self,
        raster_paths: &[PathBuf],
        clip_bounds: Option<ClipBounds>,
        compression: Compression,
        output_path: &Path,
        sink: &dyn ProgressSink,
    ) -> Result<(), MergeError> {
        if raster_paths.is_empty() {
            return Err(MergeError::NoInputs);
        }

        sink.emit(ProgressEvent::stage(
            Stage::Merging,
            0,
            format!("Merging {} rasters", raster_paths.len()),
        ));

        let predictor = self.predictor_for(&raster_paths[0]).await;
        let codec = compression.codec();
        let intermediate = intermediate_path(output_path);

        let mut warp_options = vec![
            format!("COMPRESS={codec}"),
            "BIGTIFF=YES".to_string(),
            "TILED=YES".to_string(),
            "NUM_THREADS=ALL_CPUS".to_string(),
        ];
        warp_options.extend(predictor.clone());

        sink.emit(ProgressEvent::stage(
            Stage::Merging,
            10,
            match clip_bounds {
                Some(_) => "Mosaicking and clipping",
                None => "Mosaicking",
            },
        ));
        let warp = RasterCommand::Warp {
            inputs: raster_paths.to_vec(),
            output: intermediate.clone(),
            clip: clip_bounds,
            clip_srid: self.clip_srid,
            creation_options: warp_options,
        };
        self.invoke(&warp, &intermediate).await?;
        sink.emit(ProgressEvent::stage(Stage::Merging, 55, "Mosaic written"));

        sink.emit(ProgressEvent::stage(
            Stage::CreatingOutput,
            60,
            format!("Creating cloud-optimized output ({codec})"),
        ));
        let mut translate_options = vec![
            format!("COMPRESS={codec}"),
            "BIGTIFF=YES".to_string(),
            "BLOCKSIZE=512".to_string(),
            "NUM_THREADS=ALL_CPUS".to_string(),
        ];
        translate_options.extend(predictor);
        let translate = RasterCommand::Translate {
            input: intermediate.clone(),
            output: output_path.to_path_buf(),
            creation_options: translate_options,
        };
        self.invoke(&translate, &intermediate).await?;
        sink.emit(ProgressEvent::stage(Stage::CreatingOutput, 95, "Output written"));

        if let Err(err) = tokio::fs::remove_file(&intermediate).await {
            dtm_warn!("Could not remove {}: {}", intermediate.display(), err);
        }

        sink.emit(ProgressEvent::stage(Stage::Completed, 100, "Done"));
        dtm_info!("Merged output written to {}", output_path.display());
        Ok(())
    }

    /// Runs `command`; on failure removes the intermediate and keeps the tool's diagnostic.
    async fn invoke(&self, command: &RasterCommand, intermediate: &Path) -> Result<(), MergeError> {
        let result = match self.tool.execute(command).await {
            Ok(output) if output.success => return Ok(()),
            Ok(output) => Err(MergeError::ToolFailure {
                tool: command.program().to_string(),
                diagnostic: output.diagnostic,
            }),
            Err(err) => Err(err),
        };
        discard(intermediate).await;
        result
    }

    async fn predictor_for(&self, first_input: &Path) -> Option<String> {
        let inspect = RasterCommand::Inspect {
            input: first_input.to_path_buf(),
        };
        let output = match self.tool.execute(&inspect).await {
            Ok(output) if output.success => output,
            Ok(output) => {
                dtm_debug!("Inspect failed, no predictor: {}", output.diagnostic);
                return None;
            }
            Err(err) => {
                dtm_debug!("Inspect unavailable, no predictor: {}", err);
                return None;
            }
        };
        let data_type = parse_band_data_type(&output.stdout)?;
        is_float_raster_type(&data_type).then(|| "PREDICTOR=3".to_string())
    }
}

async fn discard(path: &Path) {
    match tokio::fs::remove_file(path).await {
        Ok(()) => {}
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
        Err(err) => dtm_warn!("Could not remove {}: {}", path.display(), err),
    }
}
