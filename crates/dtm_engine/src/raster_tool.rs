use std::ffi::OsString;
use std::path::{Path, PathBuf};

use dtm_core::ClipBounds;
use dtm_logging::dtm_debug;
use serde_json::Value;
use tokio::process::Command;

use crate::MergeError;

/// One invocation of the external raster tool.
#[derive(Debug, Clone, PartialEq)]
pub enum RasterCommand {
    /// Report metadata of a raster as JSON on stdout.
    Inspect { input: PathBuf },
    /// Mosaic `inputs`, optionally clipped, into a plain tiled raster.
    Warp {
        inputs: Vec<PathBuf>,
        output: PathBuf,
        clip: Option<ClipBounds>,
        clip_srid: u32,
        creation_options: Vec<String>,
    },
    /// Repack `input` as a cloud-optimized raster.
    Translate {
        input: PathBuf,
        output: PathBuf,
        creation_options: Vec<String>,
    },
}

impl RasterCommand {
    pub fn program(&self) -> &'static str {
        match self {
            RasterCommand::Inspect { .. } => "gdalinfo",
            RasterCommand::Warp { .. } => "gdalwarp",
            RasterCommand::Translate { .. } => "gdal_translate",
        }
    }

    pub fn args(&self) -> Vec<OsString> {
        let mut args: Vec<OsString> = Vec::new();
        match self {
            RasterCommand::Inspect { input } => {
                args.push("-json".into());
                args.push(input.into());
            }
            RasterCommand::Warp {
                inputs,
                output,
                clip,
                clip_srid,
                creation_options,
            } => {
                args.extend(["-overwrite", "-of", "GTiff", "-r", "near"].map(OsString::from));
                push_creation_options(&mut args, creation_options);
                if let Some(clip) = clip {
                    args.push("-te".into());
                    for value in [clip.min_x, clip.min_y, clip.max_x, clip.max_y] {
                        args.push(value.to_string().into());
                    }
                    args.push("-te_srs".into());
                    args.push(format!("EPSG:{clip_srid}").into());
                }
                args.extend(inputs.iter().map(OsString::from));
                args.push(output.into());
            }
            RasterCommand::Translate {
                input,
                output,
                creation_options,
            } => {
                args.push(input.into());
                args.push(output.into());
                args.extend(["-of", "COG"].map(OsString::from));
                push_creation_options(&mut args, creation_options);
            }
        }
        args
    }
}

fn push_creation_options(args: &mut Vec<OsString>, options: &[String]) {
    for option in options {
        args.push("-co".into());
        args.push(option.into());
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ToolOutput {
    pub success: bool,
    pub stdout: String,
    /// Error output, kept verbatim.
    pub diagnostic: String,
}

#[async_trait::async_trait]
pub trait RasterTool: Send + Sync {
    /// Runs `command`. A tool that ran and failed is `Ok` with `success == false`;
    /// `Err` means it could not be run at all.
    async fn execute(&self, command: &RasterCommand) -> Result<ToolOutput, MergeError>;
}

/// Runs the GDAL command-line utilities as subprocesses.
#[derive(Debug, Clone, Default)]
pub struct GdalTool {
    bin_dir: Option<PathBuf>,
}

impl GdalTool {
    pub fn new(bin_dir: Option<PathBuf>) -> Self {
        Self { bin_dir }
    }

    fn program_path(&self, program: &str) -> PathBuf {
        match &self.bin_dir {
            Some(dir) => dir.join(program),
            None => PathBuf::from(program),
        }
    }

    /// Version string of the installed tools.
    pub async fn check_available(&self) -> Result<String, MergeError> {
        let output = Command::new(self.program_path("gdalinfo"))
            .arg("--version")
            .output()
            .await
            .map_err(|err| MergeError::ToolFailure {
                tool: "gdalinfo".to_string(),
                diagnostic: err.to_string(),
            })?;
        if output.status.success() {
            Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
        } else {
            Err(MergeError::ToolFailure {
                tool: "gdalinfo".to_string(),
                diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}

#[async_trait::async_trait]
impl RasterTool for GdalTool {
    async fn execute(&self, command: &RasterCommand) -> Result<ToolOutput, MergeError> {
        let program = command.program();
        let args = command.args();
        dtm_debug!("Running {} {:?}", program, args);

        let output = Command::new(self.program_path(program))
            .args(&args)
            .output()
            .await
            .map_err(|err| MergeError::ToolFailure {
                tool: program.to_string(),
                diagnostic: format!("could not run {program}: {err}"),
            })?;

        Ok(ToolOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            diagnostic: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        })
    }
}

/// Data type of the first band in `gdalinfo -json` output.
pub fn parse_band_data_type(info_json: &str) -> Option<String> {
    let value: Value = serde_json::from_str(info_json).ok()?;
    value
        .get("bands")?
        .as_array()?
        .first()?
        .get("type")?
        .as_str()
        .map(str::to_string)
}

pub fn is_float_raster_type(data_type: &str) -> bool {
    matches!(data_type, "Float32" | "Float64" | "CFloat32" | "CFloat64")
}

/// Sibling of `output` used for the warp result, e.g. `out.tif` -> `out.temp.tif`.
pub fn intermediate_path(output: &Path) -> PathBuf {
    let stem = output
        .file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "output".to_string());
    output.with_file_name(format!("{stem}.temp.tif"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn strings(args: Vec<OsString>) -> Vec<String> {
        args.into_iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn warp_args_place_clip_before_inputs() {
        let command = RasterCommand::Warp {
            inputs: vec![PathBuf::from("a.tif"), PathBuf::from("b.tif")],
            output: PathBuf::from("out.temp.tif"),
            clip: Some(ClipBounds::new(1.0, 2.0, 3.5, 4.0)),
            clip_srid: 3857,
            creation_options: vec!["COMPRESS=ZSTD".to_string()],
        };
        let args = strings(command.args());
        let te = args.iter().position(|a| a == "-te").unwrap();
        assert_eq!(&args[te + 1..te + 7], ["1", "2", "3.5", "4", "-te_srs", "EPSG:3857"]);
        assert_eq!(&args[args.len() - 3..], ["a.tif", "b.tif", "out.temp.tif"]);
        assert!(args.windows(2).any(|w| w == ["-co", "COMPRESS=ZSTD"]));
        assert_eq!(command.program(), "gdalwarp");
    }

    #[test]
    fn warp_without_clip_has_no_extent() {
        let command = RasterCommand::Warp {
            inputs: vec![PathBuf::from("a.tif")],
            output: PathBuf::from("o.tif"),
            clip: None,
            clip_srid: 3857,
            creation_options: Vec::new(),
        };
        assert!(!strings(command.args()).contains(&"-te".to_string()));
    }

    #[test]
    fn translate_targets_cog() {
        let command = RasterCommand::Translate {
            input: PathBuf::from("in.tif"),
            output: PathBuf::from("out.tif"),
            creation_options: vec!["BLOCKSIZE=512".to_string()],
        };
        assert_eq!(
            strings(command.args()),
            ["in.tif", "out.tif", "-of", "COG", "-co", "BLOCKSIZE=512"]
        );
    }

    #[test]
    fn band_type_parsing() {
        let json = r#"{"bands":[{"band":1,"type":"Float32"}]}"#;
        assert_eq!(parse_band_data_type(json), Some("Float32".to_string()));
        assert_eq!(parse_band_data_type(r#"{"bands":[]}"#), None);
        assert_eq!(parse_band_data_type("not json"), None);
        assert!(is_float_raster_type("Float64"));
        assert!(!is_float_raster_type("UInt16"));
    }

    #[test]
    fn intermediate_sits_next_to_output() {
        assert_eq!(
            intermediate_path(Path::new("/jobs/x/dtm_output_1.tif")),
            PathBuf::from("/jobs/x/dtm_output_1.temp.tif")
        );
    }
}
