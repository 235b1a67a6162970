//! Image loading
//!
//! `ImageArchiveLoaded` unpacks the target's image archive into the run's
//! working directory and stores it in the image slot for the checks after it.
//! An `http://` or `https://` archive location is downloaded first.

use super::{ensure_docker_config, knowledge_base};
use preflight_base::check::{
    Check, CheckContext, CheckError, CheckHelp, CheckInitError, CheckMetadata,
};
use preflight_base::fsutil::download_file;
use preflight_base::image::LoadedImage;
use preflight_base::registry::CommonCheckConfig;
use std::fs;
use std::path::{Path, PathBuf};

const DEFAULT_DOWNLOAD_NAME: &str = "image.tar";

pub struct ImageArchiveLoaded;

impl ImageArchiveLoaded {
    pub const NAME: &'static str = "ImageArchiveLoaded";

    pub fn new(config: &CommonCheckConfig) -> Result<Self, CheckInitError> {
        ensure_docker_config(Self::NAME, config)?;
        Ok(Self)
    }
}

fn remote_url(archive: &Path) -> Option<&str> {
    archive
        .to_str()
        .filter(|s| s.starts_with("http://") || s.starts_with("https://"))
}

/// Local path of the archive, downloading remote ones into the workdir
fn fetch_archive(archive: &Path, ctx: &CheckContext<'_>) -> Result<PathBuf, CheckError> {
    let Some(url) = remote_url(archive) else {
        return Ok(archive.to_path_buf());
    };

    // Keep the file name so a `.bz2` suffix is still recognised.
    let name = url
        .rsplit('/')
        .next()
        .filter(|s| !s.is_empty())
        .unwrap_or(DEFAULT_DOWNLOAD_NAME);
    fs::create_dir_all(ctx.workdir()).map_err(|e| CheckError::io(ctx.workdir(), e))?;
    let local = ctx.workdir().join(name);

    ctx.logger()
        .log_info_with_context("downloading image archive", vec![("url", url)]);
    download_file(&local, url)?;
    Ok(local)
}

impl Check for ImageArchiveLoaded {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn validate(&self, ctx: &CheckContext<'_>) -> Result<bool, CheckError> {
        let target = ctx.target();
        let archive = target.image_archive.as_ref().ok_or_else(|| {
            CheckError::failed(format!(
                "no image archive configured for {}; pass --image-archive",
                target
            ))
        })?;

        ctx.ensure_not_cancelled()?;

        let archive_path = archive.display().to_string();
        ctx.logger().log_debug_with_context(
            "loading image archive",
            vec![("archive", archive_path.as_str()), ("platform", target.platform.as_str())],
        );

        let archive = fetch_archive(archive, ctx)?;
        let image = LoadedImage::from_archive(&archive, ctx.workdir())?;
        let image = ctx.set_image(image)?;

        let layers = image.layer_count.to_string();
        let rootfs = image.rootfs.display().to_string();
        ctx.logger().log_debug_with_context(
            "image archive loaded",
            vec![("layers", layers.as_str()), ("rootfs", rootfs.as_str())],
        );

        if !image.config.architecture.is_empty() && image.config.architecture != target.platform {
            ctx.logger().log_warning_with_context(
                "image architecture does not match the requested platform",
                vec![
                    ("architecture", image.config.architecture.as_str()),
                    ("platform", target.platform.as_str()),
                ],
            );
        }

        Ok(true)
    }

    fn metadata(&self) -> CheckMetadata {
        CheckMetadata::new("Loading the image archive so its contents can be inspected")
            .with_knowledge_base(knowledge_base(Self::NAME))
    }

    fn help(&self) -> CheckHelp {
        CheckHelp::new(
            "Check ImageArchiveLoaded encountered an error. The image could not be unpacked.",
            "Provide a readable `docker save` archive for this platform",
        )
    }
}
