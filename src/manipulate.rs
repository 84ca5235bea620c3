//! Whole-file manipulation built on the transparent-compression opener.

use std::io::{Read, Write};

use tracing::info;

use crate::error::{Result, ShellError};
use crate::open::{reader, writer, Compression, WriteMode};

/// Concatenate `inputs` into `output`, the equivalent of
/// `cat inputs... > output`.
///
/// Every file is opened with [`Compression::Auto`], so a `.gz` input lands
/// decompressed in a plain output and vice versa, and inputs may mix
/// codecs freely. With `ensure_newline` an input that does not end in
/// `\n` gets one appended, so text files never fuse across the boundary.
pub fn concatenate(
    inputs: &[&str],
    output: &str,
    mode: WriteMode,
    ensure_newline: bool,
) -> Result<()> {
    info!("Appending files: {inputs:?} to: {output}");

    let mut out = writer(output, Compression::Auto, mode)?;
    for input in inputs {
        let mut data = Vec::new();
        reader(input, Compression::Auto)?
            .read_to_end(&mut data)
            .map_err(ShellError::Io)?;
        if ensure_newline && !data.is_empty() && data.last() != Some(&b'\n') {
            data.push(b'\n');
        }
        out.write_all(&data).map_err(ShellError::Io)?;
    }
    out.flush().map_err(ShellError::Io)
}
