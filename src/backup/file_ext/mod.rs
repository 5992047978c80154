use itertools::Itertools;
use std::sync::Arc;

pub trait FileExtProvider {
    fn file_ext(&self) -> Option<Arc<str>>;
}

/// Full archive extension for a compression, e.g. `tar.gz`.
pub fn tar_file_ext<P: FileExtProvider>(compression: &P) -> Arc<str> {
    std::iter::once(Arc::from("tar"))
        .chain(compression.file_ext())
        .join(".")
        .into()
}
