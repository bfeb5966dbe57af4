//! Post-run workspace capture.

use std::fs;
use std::io::{Cursor, Write};
use std::path::Path;

use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

/// What came back from the workspace after a run.
#[derive(Clone, Debug)]
pub enum ArtifactCapture {
    /// ZIP archive of the workspace contents.
    Zip(Vec<u8>),
    /// The archive exceeded the size limit; a human-readable note instead.
    Note(String),
}

/// Archives `dir` and applies the size cap. Returns `None` when the
/// directory cannot be read or archived; artifact capture is best-effort
/// and must never fail the run itself.
pub fn capture_artifacts(dir: &Path, max_bytes: u64) -> Option<ArtifactCapture> {
    let archive = match zip_directory(dir) {
        Ok(bytes) => bytes,
        Err(err) => {
            tracing::warn!(error = %err, dir = %dir.display(), "artifact capture failed");
            return None;
        }
    };
    if archive.len() as u64 > max_bytes {
        return Some(ArtifactCapture::Note(format!(
            "artifacts omitted: archive is {} bytes, limit is {} bytes",
            archive.len(),
            max_bytes
        )));
    }
    Some(ArtifactCapture::Zip(archive))
}

fn zip_directory(dir: &Path) -> std::io::Result<Vec<u8>> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);
    add_directory(&mut writer, dir, Path::new(""), options)?;
    let cursor = writer.finish().map_err(std::io::Error::other)?;
    Ok(cursor.into_inner())
}

fn add_directory(
    writer: &mut ZipWriter<Cursor<Vec<u8>>>,
    dir: &Path,
    prefix: &Path,
    options: SimpleFileOptions,
) -> std::io::Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let relative = prefix.join(entry.file_name());
        let name = relative.to_string_lossy().replace('\\', "/");
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(std::io::Error::other)?;
            add_directory(writer, &path, &relative, options)?;
        } else if file_type.is_file() {
            writer
                .start_file(name, options)
                .map_err(std::io::Error::other)?;
            writer.write_all(&fs::read(&path)?)?;
        }
    }
    Ok(())
}
