pub mod backup_config;
pub mod byte_fifo;
pub mod compress;
pub mod file_ext;
pub mod finish;
pub mod hook;
pub mod lock;
pub mod result_error;
pub mod retention;
pub mod roll;
pub mod rotation;
pub mod runner;
pub mod select;
pub mod store;
pub mod sync;
pub mod tar;
pub mod validate;

macro_rules! function_path {
    () => {
        concat!(module_path!(), "::", function_name!(), " ", file!(), ":", line!())
    };
}

pub(crate) use function_path;
