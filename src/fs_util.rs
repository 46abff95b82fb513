use std::fs::File;
use std::io::{self, BufReader, Write};

use camino::Utf8Path;
use flate2::read::MultiGzDecoder;

use crate::error::IngestError;

/// Streams the gzip archive at `source` into `out`, returning the decompressed byte count.
pub fn gunzip_into<W: Write>(source: &Utf8Path, out: &mut W) -> Result<u64, IngestError> {
    let file = File::open(source.as_std_path())
        .map_err(|err| IngestError::Filesystem(format!("open {source}: {err}")))?;
    let mut decoder = MultiGzDecoder::new(BufReader::new(file));
    let written = io::copy(&mut decoder, out).map_err(|err| IngestError::Decompression {
        file: source.file_name().unwrap_or(source.as_str()).to_string(),
        message: err.to_string(),
    })?;
    out.flush()
        .map_err(|err| IngestError::Filesystem(err.to_string()))?;
    Ok(written)
}
