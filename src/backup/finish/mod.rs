use flate2::write::GzEncoder;
use liblzma::write::XzEncoder;
use std::io::{Error, Write};

/// Flushes trailing stream data (compression footers) and hands back the
/// wrapped writer.
pub trait Finish<O> {
    fn finish(self) -> Result<O, Error>;
}

impl<W: Write> Finish<W> for XzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

impl<W: Write> Finish<W> for GzEncoder<W> {
    fn finish(self) -> Result<W, Error> {
        self.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn test_xz_encoder_finish_impl() {
        let encoder = XzEncoder::new(Cursor::new(Vec::new()), 1);
        let cursor = Finish::finish(encoder).unwrap();
        assert!(!cursor.get_ref().is_empty());
    }

    #[test]
    fn test_gz_encoder_finish_impl() {
        let encoder = GzEncoder::new(Cursor::new(Vec::new()), flate2::Compression::fast());
        let cursor = Finish::finish(encoder).unwrap();
        // gzip header and footer are written even for empty input
        assert!(cursor.get_ref().len() >= 18);
    }
}
