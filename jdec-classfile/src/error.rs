use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Malformed type descriptor: {0:?}")]
    BadDescriptor(String),

    #[error("Constant pool index {0} out of range or wrong kind")]
    BadConstIndex(u16),

    #[error("Exception table entry [{0:#x}, {1:#x}) is inverted")]
    InvertedRange(u32, u32),
}

pub type Result<T> = std::result::Result<T, Error>;
