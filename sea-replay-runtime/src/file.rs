//! File access used by local byte readers.

pub use std::io::SeekFrom;
use std::{io::Error as IoError, path::Path};

#[cfg(feature = "runtime-tokio")]
pub use tokio::{
    fs::File,
    io::{AsyncReadExt, AsyncSeekExt},
};

#[cfg(feature = "runtime-async-std")]
pub use async_std::{
    fs::File,
    io::{prelude::SeekExt as AsyncSeekExt, ReadExt as AsyncReadExt},
};

#[cfg(any(feature = "runtime-tokio", feature = "runtime-async-std"))]
pub async fn open(path: impl AsRef<Path>) -> Result<(File, u64), IoError> {
    let file = File::open(path.as_ref()).await?;
    let size = file.metadata().await?.len();
    Ok((file, size))
}

/// Reads exactly `len` bytes at `offset`, or fewer if the file ends before.
#[cfg(any(feature = "runtime-tokio", feature = "runtime-async-std"))]
pub async fn read_at(file: &mut File, offset: u64, len: usize) -> Result<Vec<u8>, IoError> {
    file.seek(SeekFrom::Start(offset)).await?;
    let mut buffer = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let read = file.read(&mut buffer[filled..]).await?;
        if read == 0 {
            break;
        }
        filled += read;
    }
    buffer.truncate(filled);
    Ok(buffer)
}

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
#[derive(Debug)]
pub struct File;

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
pub async fn open(_: impl AsRef<Path>) -> Result<(File, u64), IoError> {
    Err(no_runtime())
}

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
pub async fn read_at(_: &mut File, _: u64, _: usize) -> Result<Vec<u8>, IoError> {
    Err(no_runtime())
}

#[cfg(not(any(feature = "runtime-tokio", feature = "runtime-async-std")))]
fn no_runtime() -> IoError {
    IoError::new(std::io::ErrorKind::Other, "Please enable a runtime")
}

#[cfg(all(test, feature = "runtime-tokio"))]
mod test {
    use super::*;

    #[tokio::test]
    async fn test_read_at() -> Result<(), IoError> {
        let path = std::env::temp_dir().join(format!("sea-replay-runtime-{}", std::process::id()));
        std::fs::write(&path, b"0123456789")?;

        let (mut file, size) = open(&path).await?;
        assert_eq!(size, 10);
        assert_eq!(read_at(&mut file, 2, 3).await?, b"234".to_vec());
        assert_eq!(read_at(&mut file, 8, 5).await?, b"89".to_vec());
        assert_eq!(read_at(&mut file, 10, 5).await?, Vec::<u8>::new());

        std::fs::remove_file(&path)?;
        Ok(())
    }
}
