use crate::error::{PupilError, Result};
use crate::record::EyeId;
use std::fs::File;
use std::io::{Read, Seek};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};

const NPY_MAGIC: &[u8; 6] = b"\x93NUMPY";

/// Locates eye videos in a recording and tells how many frames they hold
pub trait VideoSourceResolver: Send + Sync {
    /// Existing candidate videos for an eye, most preferred first
    fn candidates(&self, rec_dir: &Path, eye_id: EyeId) -> Vec<PathBuf>;

    /// Number of decodable frames in a source video
    fn frame_count(&self, source: &Path) -> Result<usize>;
}

/// Resolver for on-disk recordings: `eye<N><ext>` videos with
/// `eye<N>_timestamps.npy` frame timestamps next to them
#[derive(Debug, Clone)]
pub struct FileSystemResolver {
    extensions: Vec<String>,
}

impl FileSystemResolver {
    pub fn new<I, S>(extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            extensions: extensions.into_iter().map(Into::into).collect(),
        }
    }

    /// Timestamp file that belongs to a video, e.g. `eye0.mp4` -> `eye0_timestamps.npy`
    pub fn timestamps_path(source: &Path) -> Option<PathBuf> {
        let stem = source.file_stem()?.to_str()?;
        Some(source.with_file_name(format!("{}_timestamps.npy", stem)))
    }
}

impl Default for FileSystemResolver {
    fn default() -> Self {
        Self::new([".mjpeg", ".mp4", ".mkv"])
    }
}

impl VideoSourceResolver for FileSystemResolver {
    fn candidates(&self, rec_dir: &Path, eye_id: EyeId) -> Vec<PathBuf> {
        self.extensions
            .iter()
            .map(|ext| rec_dir.join(format!("eye{}{}", eye_id, ext)))
            .filter(|path| {
                let exists = path.is_file();
                trace!("Probing {}: {}", path.display(), exists);
                exists
            })
            .collect()
    }

    fn frame_count(&self, source: &Path) -> Result<usize> {
        let Some(ts_path) = Self::timestamps_path(source) else {
            return Ok(0);
        };
        match npy_len(&ts_path) {
            Ok(count) => {
                debug!("{} has {} frames", source.display(), count);
                Ok(count)
            }
            Err(PupilError::NotFound { .. }) => {
                warn!("No frame timestamps for {}", source.display());
                Ok(0)
            }
            Err(e) => Err(e),
        }
    }
}

/// Number of elements along the first axis of a `.npy` array
pub fn npy_len(path: &Path) -> Result<usize> {
    let mut file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PupilError::NotFound {
                path: path.to_path_buf(),
            })
        }
        Err(e) => return Err(e.into()),
    };

    let mut preamble = [0u8; 8];
    file.read_exact(&mut preamble)
        .map_err(|_| PupilError::corrupt(path, "truncated npy preamble"))?;
    if &preamble[..6] != NPY_MAGIC {
        return Err(PupilError::corrupt(path, "not an npy file"));
    }

    let major = preamble[6];
    let header_len = match major {
        1 => {
            let mut len = [0u8; 2];
            file.read_exact(&mut len)
                .map_err(|_| PupilError::corrupt(path, "truncated npy header length"))?;
            u16::from_le_bytes(len) as usize
        }
        2 | 3 => {
            let mut len = [0u8; 4];
            file.read_exact(&mut len)
                .map_err(|_| PupilError::corrupt(path, "truncated npy header length"))?;
            u32::from_le_bytes(len) as usize
        }
        other => {
            return Err(PupilError::corrupt(
                path,
                format!("unsupported npy version {}", other),
            ))
        }
    };

    let file_len = file.metadata()?.len();
    let header_end = file.stream_position()? + header_len as u64;
    if header_end > file_len {
        return Err(PupilError::corrupt(
            path,
            format!("npy header of {} bytes exceeds the file", header_len),
        ));
    }

    let mut header = vec![0u8; header_len];
    file.read_exact(&mut header)
        .map_err(|_| PupilError::corrupt(path, "truncated npy header"))?;
    let header = String::from_utf8_lossy(&header);

    let data_len = file_len - header_end;

    let shape = parse_shape(&header)
        .ok_or_else(|| PupilError::corrupt(path, "npy header without shape"))?;
    let itemsize = parse_itemsize(&header)
        .ok_or_else(|| PupilError::corrupt(path, "npy header without descr"))?;

    let rows = shape.first().copied().unwrap_or(1);
    let expected = shape
        .iter()
        .try_fold(itemsize as u64, |bytes, dim| bytes.checked_mul(*dim as u64))
        .ok_or_else(|| PupilError::corrupt(path, "npy shape overflows"))?;
    if data_len < expected {
        return Err(PupilError::corrupt(
            path,
            format!("npy payload holds {} bytes, expected {}", data_len, expected),
        ));
    }

    Ok(rows)
}

fn parse_shape(header: &str) -> Option<Vec<usize>> {
    let start = header.find("'shape'")?;
    let rest = &header[start..];
    let open = rest.find('(')?;
    let close = rest[open..].find(')')? + open;
    rest[open + 1..close]
        .split(',')
        .map(str::trim)
        .filter(|dim| !dim.is_empty())
        .map(|dim| dim.parse().ok())
        .collect()
}

fn parse_itemsize(header: &str) -> Option<usize> {
    let start = header.find("'descr'")?;
    let rest = &header[start + "'descr'".len()..];
    let open = rest.find('\'')?;
    let close = rest[open + 1..].find('\'')? + open + 1;
    let descr = &rest[open + 1..close];
    descr
        .trim_start_matches(|c: char| !c.is_ascii_digit())
        .parse()
        .ok()
}
