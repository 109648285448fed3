use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use symphonia::core::codecs::{CodecType, CODEC_TYPE_MP1, CODEC_TYPE_MP2, CODEC_TYPE_MP3, CODEC_TYPE_NULL};
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::debug;

use crate::error::Result;
use crate::models::{IncomingFile, MPEG_AUDIO_MIME};

/// Regular files directly inside `dir`, sorted by path.
pub fn scan_directory(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
        .into_iter()
        .flatten()
        .filter_map(|e| e.ok())
        .map(|e| e.path())
        .filter(|p| p.is_file())
        .collect();
    files.sort();
    files
}

/// Expand each argument (file or directory) into intake candidates, keeping argument order.
/// Filtering by media type happens at registration, not here.
pub fn collect_inputs(paths: &[PathBuf]) -> Result<Vec<IncomingFile>> {
    let mut inputs = Vec::new();
    for path in paths {
        if path.is_dir() {
            for file in scan_directory(path) {
                inputs.push(IncomingFile::from_path(&file)?);
            }
        } else if path.is_file() {
            inputs.push(IncomingFile::from_path(path)?);
        } else {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("'{}' is not a file or directory", path.display()),
            )
            .into());
        }
    }
    Ok(inputs)
}

impl IncomingFile {
    /// Describe a file on disk: name, size, modification time and declared media type.
    pub fn from_path(path: &Path) -> io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let modified_ms = metadata
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0);
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        let (media_type, duration_secs) = sniff_media(path);

        Ok(Self {
            path: path.to_path_buf(),
            name,
            size: metadata.len(),
            modified_ms,
            media_type,
            duration_secs,
        })
    }
}

fn mime_for_codec(codec: CodecType) -> Option<&'static str> {
    if codec == CODEC_TYPE_MP3 || codec == CODEC_TYPE_MP2 || codec == CODEC_TYPE_MP1 {
        Some(MPEG_AUDIO_MIME)
    } else {
        None
    }
}

/// Probe the container for its audio codec and length. Anything unreadable yields `None`.
fn sniff_media(path: &Path) -> (Option<String>, Option<f64>) {
    let Ok(file) = File::open(path) else {
        return (None, None);
    };
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = match symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    ) {
        Ok(probed) => probed,
        Err(e) => {
            debug!(path = %path.display(), error = %e, "media probe failed");
            return (None, None);
        }
    };

    let Some(track) = probed
        .format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
    else {
        return (None, None);
    };

    let params = &track.codec_params;
    let duration = match (params.n_frames, params.sample_rate) {
        (Some(frames), Some(rate)) if rate > 0 => Some(frames as f64 / rate as f64),
        _ => None,
    };
    (mime_for_codec(params.codec).map(String::from), duration)
}
