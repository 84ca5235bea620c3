//! File opening with env resolution, access logging, and transparent gzip.

use std::fs::{File, OpenOptions};
use std::io::{BufReader, BufWriter, Read, Write};
use std::path::Path;

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::info;

use crate::env::resolve_env;
use crate::error::{Result, ShellError};

/// Compression applied on top of the raw file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compression {
    /// Raw bytes, whatever the extension says.
    None,
    Gzip,
    /// Pick by extension: `.gz` (case-insensitive) means gzip, anything
    /// else is raw.
    Auto,
}

/// How [`writer`] treats an existing file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Create or overwrite.
    Truncate,
    /// Create or extend.
    Append,
    /// Fail if the file already exists.
    ExclusiveCreate,
}

fn effective(path: &str, compression: Compression) -> Compression {
    match compression {
        Compression::Auto => {
            let is_gz = Path::new(path)
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case("gz"))
                .unwrap_or(false);
            if is_gz {
                Compression::Gzip
            } else {
                Compression::None
            }
        }
        other => other,
    }
}

fn codec_label(codec: Compression) -> &'static str {
    match codec {
        Compression::Gzip => " (gzip compression)",
        _ => "",
    }
}

/// Open a file for reading, decompressing transparently.
pub fn reader(path: &str, compression: Compression) -> Result<Box<dyn Read>> {
    let resolved = resolve_env(path)?;
    let codec = effective(&resolved, compression);
    info!("Opening '{path}' for read{}", codec_label(codec));

    let file = BufReader::new(File::open(&resolved).map_err(ShellError::Io)?);
    Ok(match codec {
        Compression::Gzip => Box::new(GzDecoder::new(file)),
        _ => Box::new(file),
    })
}

/// Open a file for writing, compressing transparently.
///
/// Dropping the writer finalizes a gzip stream but loses any I/O error
/// doing so; flush first when that matters.
pub fn writer(path: &str, compression: Compression, mode: WriteMode) -> Result<Box<dyn Write>> {
    let resolved = resolve_env(path)?;
    let codec = effective(&resolved, compression);
    let mode_label = match mode {
        WriteMode::Truncate => "write",
        WriteMode::Append => "append",
        WriteMode::ExclusiveCreate => "exclusive create",
    };
    info!("Opening '{path}' for {mode_label}{}", codec_label(codec));

    let mut options = OpenOptions::new();
    match mode {
        WriteMode::Truncate => options.write(true).create(true).truncate(true),
        WriteMode::Append => options.append(true).create(true),
        WriteMode::ExclusiveCreate => options.write(true).create_new(true),
    };
    let file = BufWriter::new(options.open(&resolved).map_err(ShellError::Io)?);
    Ok(match codec {
        Compression::Gzip => Box::new(GzEncoder::new(file, flate2::Compression::default())),
        _ => Box::new(file),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use std::path::PathBuf;

    fn scratch(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!("rshell-open-{}", std::process::id()));
        fs::create_dir_all(&dir).expect("create scratch dir");
        dir.join(name)
    }

    fn read_back(path: &str, compression: Compression) -> Vec<u8> {
        let mut data = Vec::new();
        reader(path, compression)
            .expect("open reader")
            .read_to_end(&mut data)
            .expect("read");
        data
    }

    #[test]
    fn plain_round_trip() {
        let path = scratch("plain.txt");
        let path = path.to_string_lossy();
        let mut out = writer(&path, Compression::Auto, WriteMode::Truncate).expect("writer");
        out.write_all(b"plain contents").expect("write");
        out.flush().expect("flush");
        drop(out);
        assert_eq!(read_back(&path, Compression::Auto), b"plain contents");
    }

    #[test]
    fn gzip_round_trip_via_auto_detection() {
        let path = scratch("auto.txt.gz");
        let path = path.to_string_lossy();
        let mut out = writer(&path, Compression::Auto, WriteMode::Truncate).expect("writer");
        out.write_all(b"compressed contents").expect("write");
        drop(out);

        // On-disk form is gzip, not the raw payload.
        let raw = fs::read(&*path).expect("raw read");
        assert_eq!(&raw[..2], &[0x1f, 0x8b], "gzip magic expected");
        assert_eq!(read_back(&path, Compression::Auto), b"compressed contents");
    }

    #[test]
    fn explicit_codec_overrides_the_extension() {
        let path = scratch("misnamed.dat");
        let path = path.to_string_lossy();
        let mut out = writer(&path, Compression::Gzip, WriteMode::Truncate).expect("writer");
        out.write_all(b"payload").expect("write");
        drop(out);
        assert_eq!(read_back(&path, Compression::Gzip), b"payload");
    }

    #[test]
    fn append_extends_instead_of_truncating() {
        let path = scratch("append.log");
        let path = path.to_string_lossy();
        writer(&path, Compression::None, WriteMode::Truncate)
            .expect("writer")
            .write_all(b"first|")
            .expect("write");
        writer(&path, Compression::None, WriteMode::Append)
            .expect("writer")
            .write_all(b"second")
            .expect("write");
        assert_eq!(read_back(&path, Compression::None), b"first|second");
    }

    #[test]
    fn exclusive_create_refuses_existing_files() {
        let path = scratch("exclusive.txt");
        fs::write(&path, b"taken").expect("precreate");
        let err = writer(
            &path.to_string_lossy(),
            Compression::None,
            WriteMode::ExclusiveCreate,
        )
        .err()
        .expect("must fail");
        assert!(matches!(err, ShellError::Io(_)));
    }

    #[test]
    fn reader_resolves_env_in_the_path() {
        let path = scratch("env-resolved.txt");
        fs::write(&path, b"found").expect("write");
        std::env::set_var(
            "RSHELL_OPEN_DIR",
            path.parent().expect("parent").to_string_lossy().to_string(),
        );
        assert_eq!(
            read_back("$RSHELL_OPEN_DIR/env-resolved.txt", Compression::Auto),
            b"found"
        );
        std::env::remove_var("RSHELL_OPEN_DIR");
    }
}
