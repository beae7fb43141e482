//! Timelapse video from a directory of JPEG images using `ffmpeg`.

use crate::command_args::CommandArgs;
use crate::command_runner::{CommandRunner, ExecError};
use crate::error::Result;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{error, info};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum SizeError {
    #[error("'{0}' is not in the format WIDTHxHEIGHT")]
    Format(String),
}

/// Width and height in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Size {
    pub width: u32,
    pub height: u32,
}

impl Size {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Size of an image, read from its header.
    pub fn from_image(path: &Path) -> Result<Self> {
        let (width, height) = image::image_dimensions(path)?;
        Ok(Self { width, height })
    }

    /// Largest centred region with the aspect ratio of `output`.
    pub fn resolution_crop(&self, output: Size) -> Size {
        let (width, height) = (u64::from(self.width), u64::from(self.height));
        let (out_width, out_height) = (u64::from(output.width), u64::from(output.height));
        if out_width == 0 || out_height == 0 {
            return *self;
        }
        // Results never exceed the input dimensions, so they fit in u32.
        if width * out_height > height * out_width {
            Size::new((height * out_width / out_height) as u32, self.height)
        } else {
            Size::new(self.width, (width * out_height / out_width) as u32)
        }
    }
}

impl FromStr for Size {
    type Err = SizeError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let (width, height) = s
            .split_once('x')
            .ok_or_else(|| SizeError::Format(s.to_string()))?;
        match (width.parse(), height.parse()) {
            (Ok(width), Ok(height)) => Ok(Size { width, height }),
            _ => Err(SizeError::Format(s.to_string())),
        }
    }
}

impl fmt::Display for Size {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// The `ffmpeg` invocation rendering the timelapse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FfmpegArgs {
    pub input_dir: PathBuf,
    pub framerate: u32,
    pub input_size: Size,
    pub output_size: Size,
    pub codec: String,
    pub crf: u32,
    pub output: PathBuf,
}

impl FfmpegArgs {
    fn video_filter(&self) -> String {
        let crop = self.input_size.resolution_crop(self.output_size);
        format!(
            "crop={}:{}:{}:{},scale={}:{}",
            crop.width,
            crop.height,
            (self.input_size.width - crop.width) / 2,
            (self.input_size.height - crop.height) / 2,
            self.output_size.width,
            self.output_size.height
        )
    }
}

impl CommandArgs for FfmpegArgs {
    fn program(&self) -> &'static str {
        "ffmpeg"
    }

    fn to_cli_args(&self) -> Vec<String> {
        vec![
            "-r".to_string(),
            self.framerate.to_string(),
            "-f".to_string(),
            "image2".to_string(),
            "-pattern_type".to_string(),
            "glob".to_string(),
            "-i".to_string(),
            format!("{}/*.jpg", self.input_dir.display()),
            "-filter:v".to_string(),
            self.video_filter(),
            "-vcodec".to_string(),
            self.codec.clone(),
            "-crf".to_string(),
            self.crf.to_string(),
            "-pix_fmt".to_string(),
            "yuv420p".to_string(),
            "-profile:v".to_string(),
            "high".to_string(),
            self.output.display().to_string(),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct TimelapseOptions {
    pub input_dir: PathBuf,
    pub output_dir: PathBuf,
    /// Output base name; defaults to the input directory name
    pub name: Option<String>,
    pub framerate: u32,
    pub size: Size,
    pub codec: String,
    pub crf: u32,
}

impl Default for TimelapseOptions {
    fn default() -> Self {
        Self {
            input_dir: PathBuf::from("."),
            output_dir: PathBuf::from("."),
            name: None,
            framerate: 24,
            size: Size::new(1920, 1080),
            codec: "libx264".to_string(),
            crf: 23,
        }
    }
}

impl TimelapseOptions {
    /// Input directory name with spaces replaced by underscores.
    fn base_name(&self) -> Result<String> {
        if let Some(name) = &self.name {
            return Ok(name.clone());
        }
        let absolute = std::path::absolute(&self.input_dir)?;
        let absolute = absolute.canonicalize().unwrap_or(absolute);
        Ok(absolute
            .file_name()
            .map(|name| name.to_string_lossy().replace(' ', "_"))
            .unwrap_or_else(|| "timelapse".to_string()))
    }

    /// `<name>_<size>_<fps>fps_<codec>_crf<crf>.mp4` inside the output
    /// directory.
    pub fn output_path(&self) -> Result<PathBuf> {
        let file_name = format!(
            "{}_{}_{}fps_{}_crf{}.mp4",
            self.base_name()?,
            self.size,
            self.framerate,
            self.codec,
            self.crf
        );
        if self.output_dir == Path::new(".") {
            Ok(PathBuf::from(file_name))
        } else {
            Ok(self.output_dir.join(file_name))
        }
    }
}

/// clap value parser accepting only existing directories.
pub fn existing_directory(value: &str) -> std::result::Result<PathBuf, String> {
    let path = PathBuf::from(value);
    if path.is_dir() {
        Ok(path)
    } else {
        Err(format!("'{}' is not a directory", value))
    }
}

/// Input images in sorted order.
pub fn input_images(input_dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.jpg",
        glob::Pattern::escape(&input_dir.to_string_lossy())
    );
    let mut images = glob::glob(&pattern)
        .map_err(|e| crate::error::ToolsError::validation(e.to_string()))?
        .filter_map(|entry| entry.ok())
        .collect::<Vec<_>>();
    images.sort();
    Ok(images)
}

/// Run `ffmpeg`; returns its exit code, or 1 when it is not installed.
pub fn generate<R: CommandRunner + ?Sized>(runner: &R, args: &FfmpegArgs) -> Result<i32> {
    let invocation = args.to_invocation().foreground();
    info!("Running: {}", invocation.display());
    match runner.run(&invocation) {
        Ok(output) => Ok(output.exit_code()),
        Err(ExecError::NotFound { .. }) => {
            error!("ffmpeg not found. Please install ffmpeg!");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

/// Run the timelapse tool; returns the process exit code.
pub fn run<R: CommandRunner + ?Sized>(runner: &R, options: &TimelapseOptions) -> Result<i32> {
    let output = options.output_path()?;
    if output.exists() {
        info!("Output video {} already exists.", output.display());
        return Ok(0);
    }

    let images = input_images(&options.input_dir)?;
    let Some(first) = images.first() else {
        error!("No *.jpg images found in {}.", options.input_dir.display());
        return Ok(1);
    };
    let input_size = Size::from_image(first)?;
    info!(
        "Found {} images of size {} in {}",
        images.len(),
        input_size,
        options.input_dir.display()
    );

    generate(
        runner,
        &FfmpegArgs {
            input_dir: options.input_dir.clone(),
            framerate: options.framerate,
            input_size,
            output_size: options.size,
            codec: options.codec.clone(),
            crf: options.crf,
            output,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_size_from_str() {
        assert_eq!("1920x1080".parse::<Size>(), Ok(Size::new(1920, 1080)));
        let err = "1024".parse::<Size>().unwrap_err();
        assert!(err.to_string().contains("is not in the format"));
        assert!("axb".parse::<Size>().is_err());
    }

    #[test]
    fn test_size_display() {
        assert_eq!(Size::new(1920, 1080).to_string(), "1920x1080");
    }

    #[test]
    fn test_crop_to_portrait() {
        assert_eq!(
            Size::new(6000, 4000).resolution_crop(Size::new(1080, 1920)),
            Size::new(2250, 4000)
        );
    }

    #[test]
    fn test_crop_to_landscape() {
        assert_eq!(
            Size::new(6000, 4000).resolution_crop(Size::new(1920, 1080)),
            Size::new(6000, 3375)
        );
    }

    #[test]
    fn test_ffmpeg_args() {
        let args = FfmpegArgs {
            input_dir: PathBuf::from("."),
            framerate: 24,
            input_size: Size::new(6000, 4000),
            output_size: Size::new(1920, 1080),
            codec: "libx264".to_string(),
            crf: 23,
            output: PathBuf::from("output_name"),
        };
        assert_eq!(
            args.to_argv(),
            [
                "ffmpeg",
                "-r",
                "24",
                "-f",
                "image2",
                "-pattern_type",
                "glob",
                "-i",
                "./*.jpg",
                "-filter:v",
                "crop=6000:3375:0:312,scale=1920:1080",
                "-vcodec",
                "libx264",
                "-crf",
                "23",
                "-pix_fmt",
                "yuv420p",
                "-profile:v",
                "high",
                "output_name"
            ]
        );
    }

    #[test]
    fn test_existing_directory() {
        assert!(existing_directory("/").is_ok());
        assert!(existing_directory("/non-existing").is_err());
    }
}
