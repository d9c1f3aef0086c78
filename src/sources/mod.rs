mod source;
mod tarball;

pub use source::ImageSource;
pub use tarball::TarballSource;
