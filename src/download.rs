use std::{
    fs::{create_dir_all, File},
    io::Write,
    path::PathBuf,
};

use burn::data::network::downloader;

/// Download a checkpoint into the local cache directory, once.
pub(crate) fn download(url: &str) -> Result<PathBuf, std::io::Error> {
    let cache_dir = dirs::cache_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join(".cache")))
        .ok_or_else(|| {
            std::io::Error::new(
                std::io::ErrorKind::NotFound,
                "no cache or home directory to store checkpoints in",
            )
        })?
        .join("unet3d-burn");

    if !cache_dir.exists() {
        create_dir_all(&cache_dir)?;
    }

    let file_base_name = url.rsplit_once('/').map_or(url, |(_, name)| name);
    let file_name = cache_dir.join(file_base_name);
    if !file_name.exists() {
        tracing::info!(url, path = %file_name.display(), "downloading checkpoint");
        let bytes = downloader::download_file_as_bytes(url, file_base_name);

        let mut output_file = File::create(&file_name)?;
        let bytes_written = output_file.write(&bytes)?;

        if bytes_written != bytes.len() {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "failed to write the whole checkpoint file",
            ));
        }
    }

    Ok(file_name)
}
