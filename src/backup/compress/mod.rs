pub mod gzip;
pub mod xz;

use crate::backup::file_ext::FileExtProvider;
use crate::backup::finish::Finish;
use crate::backup::result_error::error::Error;
use crate::backup::result_error::result::Result;
use crate::backup::result_error::WithDebugObjectAndFnName;
use flate2::write::GzEncoder;
use io_enum::Write;
use liblzma::write::XzEncoder;
use serde::{Deserialize, Serialize};
use std::io;
use std::io::Write;
use std::result;
use std::str::FromStr;
use std::sync::{Arc, OnceLock};
use validator::{Validate, ValidationErrors};

#[derive(Write)]
pub enum Compressor<W: Write> {
    None(W),
    GzEncoder(GzEncoder<W>),
    XzEncoder(XzEncoder<W>),
}

/// Compression applied to streamed archives.
#[derive(Clone, Default, Serialize, Deserialize, Debug, PartialEq, Eq)]
#[serde(tag = "compression_type")]
#[serde(rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum Compression {
    #[default]
    None,
    Gzip(gzip::GzipConfig),
    Xz(xz::XzConfig),
}

impl Validate for Compression {
    fn validate(&self) -> result::Result<(), ValidationErrors> {
        match self {
            Compression::None => Ok(()),
            Compression::Gzip(gzip) => gzip.validate(),
            Compression::Xz(xz) => xz.validate(),
        }
    }
}

impl FromStr for Compression {
    type Err = Error;

    fn from_str(s: &str) -> result::Result<Self, Self::Err> {
        match s {
            "" | "none" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gzip(gzip::GzipConfig::default())),
            "xz" => Ok(Compression::Xz(xz::XzConfig::default())),
            other => Err(Error::Config(format!(
                "Unknown compression {other:?}, expected one of none, gzip, xz"
            ))),
        }
    }
}

pub trait CompressorBuilder<W: Write> {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>>;
}

impl<W: Write> Finish<W> for Compressor<W> {
    fn finish(self) -> io::Result<W> {
        match self {
            Compressor::None(w) => Ok(w),
            Compressor::GzEncoder(w) => w.finish(),
            Compressor::XzEncoder(w) => w.finish(),
        }
    }
}

impl<W: Write> CompressorBuilder<W> for Compression {
    fn build_compressor(&self, writer: W) -> Result<Compressor<W>> {
        match self {
            Compression::None => Ok(Compressor::None(writer)),
            Compression::Gzip(gzip) => gzip.build_compressor(writer),
            Compression::Xz(xz) => xz.build_compressor(writer),
        }
        .with_debug_object_and_fn_name(self.clone(), "build_compressor")
    }
}

static GZ_FILE_EXT: OnceLock<Arc<str>> = OnceLock::new();
static XZ_FILE_EXT: OnceLock<Arc<str>> = OnceLock::new();

impl FileExtProvider for Compression {
    fn file_ext(&self) -> Option<Arc<str>> {
        match self {
            Compression::None => None,
            Compression::Gzip(_) => Some(GZ_FILE_EXT.get_or_init(|| "gz".into()).clone()),
            Compression::Xz(_) => Some(XZ_FILE_EXT.get_or_init(|| "xz".into()).clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compression_from_str() {
        assert_eq!("none".parse::<Compression>().unwrap(), Compression::None);
        assert!(matches!("gz".parse::<Compression>().unwrap(), Compression::Gzip(_)));
        assert!(matches!("xz".parse::<Compression>().unwrap(), Compression::Xz(_)));
        assert!("bz2".parse::<Compression>().is_err());
    }

    #[test]
    fn test_compression_serialization() {
        let serialized = serde_json::to_string(&Compression::None).unwrap();
        assert_eq!(serialized, "{\"compression_type\":\"none\"}");

        let gzip: Compression =
            serde_json::from_str("{\"compression_type\":\"gzip\",\"level\":9}").unwrap();
        assert!(matches!(gzip, Compression::Gzip(_)));
        assert!(gzip.validate().is_ok());
    }

    #[test]
    fn test_compression_file_ext() {
        assert!(Compression::None.file_ext().is_none());
        assert_eq!(
            Compression::Gzip(Default::default()).file_ext().unwrap().as_ref(),
            "gz"
        );
        assert_eq!(
            Compression::Xz(Default::default()).file_ext().unwrap().as_ref(),
            "xz"
        );
    }

    #[test]
    fn test_none_compressor_passes_bytes_through() {
        let mut compressor = Compression::None.build_compressor(Vec::new()).unwrap();
        compressor.write_all(b"plain").unwrap();
        assert_eq!(compressor.finish().unwrap(), b"plain");
    }
}
