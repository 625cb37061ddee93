//! Transparent decompression of input files

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{self, BufRead, BufReader};
use std::path::Path;

/// Buffered reader over `path`, gunzipping files that end in `.gz`
pub fn open_reader(path: &Path, buffer_size: usize) -> io::Result<Box<dyn BufRead + Send>> {
    let file = File::open(path)?;

    if is_gzip(path) {
        Ok(Box::new(BufReader::with_capacity(
            buffer_size,
            MultiGzDecoder::new(file),
        )))
    } else {
        Ok(Box::new(BufReader::with_capacity(buffer_size, file)))
    }
}

pub fn is_gzip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("gz"))
        .unwrap_or(false)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::{Read, Write};

    #[test]
    fn test_reads_plain_and_gzip() {
        let dir = tempfile::tempdir().unwrap();

        let plain = dir.path().join("a.csv");
        std::fs::write(&plain, "id\n1\n").unwrap();

        let gz = dir.path().join("a.csv.gz");
        let mut encoder = GzEncoder::new(File::create(&gz).unwrap(), Compression::default());
        encoder.write_all(b"id\n1\n").unwrap();
        encoder.finish().unwrap();

        for path in [&plain, &gz] {
            let mut text = String::new();
            open_reader(path, 64).unwrap().read_to_string(&mut text).unwrap();
            assert_eq!(text, "id\n1\n");
        }
        assert!(is_gzip(&gz));
        assert!(!is_gzip(&plain));
    }

    #[test]
    fn test_missing_file_is_not_found() {
        let dir = tempfile::tempdir().unwrap();
        let err = open_reader(&dir.path().join("gone.csv"), 64).err().unwrap();
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
    }
}
