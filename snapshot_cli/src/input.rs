//! Reading snapshot bytes from files or stdin, undoing text encodings and
//! gzip wrapping on the way.

use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use base64::{engine::general_purpose::STANDARD, Engine};
use clap::ValueEnum;
use flate2::read::GzDecoder;
use thiserror::Error;
use tracing::debug;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum InputEncoding {
    /// Binary FlatBuffer bytes.
    #[default]
    Raw,
    Base64,
    /// Hex digits, optional `0x` prefix; whitespace and `-` are ignored.
    Hex,
}

#[derive(Debug, Error)]
pub enum InputError {
    #[error("failed to read input from {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: io::Error,
    },
    #[error("input is not valid base64: {0}")]
    Base64(#[from] base64::DecodeError),
    #[error("input is not valid hex: {0}")]
    Hex(#[from] hex::FromHexError),
}

/// Where snapshot bytes come from; `-` on the command line means stdin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputSource {
    Stdin,
    File(PathBuf),
}

impl InputSource {
    pub fn from_arg(arg: &Path) -> Self {
        if arg == Path::new("-") {
            InputSource::Stdin
        } else {
            InputSource::File(arg.to_path_buf())
        }
    }

    pub fn display(&self) -> String {
        match self {
            InputSource::Stdin => "<stdin>".to_string(),
            InputSource::File(path) => path.display().to_string(),
        }
    }

    fn read_all(&self) -> Result<Vec<u8>, InputError> {
        let result = match self {
            InputSource::Stdin => {
                let mut bytes = Vec::new();
                io::stdin().lock().read_to_end(&mut bytes).map(|_| bytes)
            }
            InputSource::File(path) => fs::read(path),
        };
        result.map_err(|source| InputError::Read {
            path: self.display(),
            source,
        })
    }
}

/// Read and decode one input into FlatBuffer bytes.
pub fn load(source: &InputSource, encoding: InputEncoding) -> Result<Vec<u8>, InputError> {
    let raw = source.read_all()?;
    debug!(
        target: "snapshot_cli::input",
        source = %source.display(),
        bytes = raw.len(),
        "input.read"
    );
    prepare(raw, encoding)
}

/// Undo the text encoding, then transparently inflate gzip payloads.
pub fn prepare(raw: Vec<u8>, encoding: InputEncoding) -> Result<Vec<u8>, InputError> {
    let decoded = match encoding {
        InputEncoding::Raw => raw,
        InputEncoding::Base64 => {
            let text = String::from_utf8_lossy(&raw);
            STANDARD.decode(text.trim())?
        }
        InputEncoding::Hex => {
            let text = String::from_utf8_lossy(&raw);
            let trimmed = text.trim();
            let digits = trimmed
                .strip_prefix("0x")
                .or_else(|| trimmed.strip_prefix("0X"))
                .unwrap_or(trimmed);
            let digits: String = digits
                .chars()
                .filter(|c| !c.is_whitespace() && *c != '-')
                .collect();
            hex::decode(digits)?
        }
    };
    Ok(maybe_gunzip(decoded))
}

fn maybe_gunzip(bytes: Vec<u8>) -> Vec<u8> {
    if !bytes.starts_with(&GZIP_MAGIC) {
        return bytes;
    }
    let mut inflated = Vec::new();
    match GzDecoder::new(bytes.as_slice()).read_to_end(&mut inflated) {
        Ok(_) => {
            debug!(
                target: "snapshot_cli::input",
                compressed = bytes.len(),
                inflated = inflated.len(),
                "input.gunzipped"
            );
            inflated
        }
        Err(err) => {
            debug!(
                target: "snapshot_cli::input",
                error = %err,
                "input.gzip_passthrough"
            );
            bytes
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use flate2::write::GzEncoder;
    use flate2::Compression;
    use std::io::Write;

    const PAYLOAD: &[u8] = &[0x0c, 0x00, 0x00, 0x00, b'F', b'B', b'P', b'P'];

    #[test]
    fn decodes_text_encodings() {
        assert_eq!(prepare(PAYLOAD.to_vec(), InputEncoding::Raw).expect("raw"), PAYLOAD);
        assert_eq!(
            prepare(b"DAAAAEZCUFA=\n".to_vec(), InputEncoding::Base64).expect("base64"),
            PAYLOAD
        );
        assert_eq!(
            prepare(b"0x0C000000 4642-5050\n".to_vec(), InputEncoding::Hex).expect("hex"),
            PAYLOAD
        );
        assert!(matches!(
            prepare(b"zz".to_vec(), InputEncoding::Hex),
            Err(InputError::Hex(_))
        ));
        assert!(matches!(
            prepare(b"!!!".to_vec(), InputEncoding::Base64),
            Err(InputError::Base64(_))
        ));
    }

    #[test]
    fn gzip_payloads_are_inflated() {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(PAYLOAD).expect("compress");
        let compressed = encoder.finish().expect("finish gzip");
        assert_eq!(prepare(compressed.clone(), InputEncoding::Raw).expect("gzip"), PAYLOAD);

        let hex_text = hex::encode(&compressed);
        assert_eq!(
            prepare(hex_text.into_bytes(), InputEncoding::Hex).expect("hex gzip"),
            PAYLOAD
        );
    }

    #[test]
    fn broken_gzip_passes_through() {
        let bytes = vec![0x1f, 0x8b, 0x00, 0x01, 0x02];
        assert_eq!(prepare(bytes.clone(), InputEncoding::Raw).expect("raw"), bytes);
    }

    #[test]
    fn reads_files_and_reports_missing_ones() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("snapshot.bin");
        fs::write(&path, PAYLOAD).expect("write input");
        let source = InputSource::from_arg(&path);
        assert_eq!(load(&source, InputEncoding::Raw).expect("load"), PAYLOAD);

        let missing = InputSource::from_arg(&dir.path().join("missing.bin"));
        assert!(matches!(
            load(&missing, InputEncoding::Raw),
            Err(InputError::Read { .. })
        ));
        assert_eq!(InputSource::from_arg(Path::new("-")), InputSource::Stdin);
    }
}
