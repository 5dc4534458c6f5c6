use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use hex::encode as hex_encode;
use sha2::{Digest, Sha256};

use crate::error::{IngestError, IngestResult};

const CHUNK_SIZE: usize = 64 * 1024;

/// SHA-256 of the file content, hex encoded. Memory use is bounded by one
/// chunk regardless of file size; the path does not influence the digest.
pub fn content_hash(path: &Path) -> IngestResult<String> {
    let read_error = |source| IngestError::Read {
        path: path.to_path_buf(),
        source,
    };
    let file = File::open(path).map_err(read_error)?;
    let mut reader = BufReader::with_capacity(CHUNK_SIZE, file);
    let mut hasher = Sha256::new();
    let mut buffer = vec![0u8; CHUNK_SIZE];
    loop {
        let read = reader.read(&mut buffer).map_err(read_error)?;
        if read == 0 {
            break;
        }
        hasher.update(&buffer[..read]);
    }
    Ok(hex_encode(hasher.finalize()))
}
