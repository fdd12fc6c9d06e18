use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

use crate::classifier::NamingConventions;

/// Naming conventions as stored on disk.
/// If the data structure changes, it should be versioned to maintain compatibility with files
/// written by older versions of celltrace.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub enum PersistedConventions {
    V1(NamingConventions),
}

impl Default for PersistedConventions {
    fn default() -> Self {
        PersistedConventions::V1(NamingConventions::default())
    }
}

impl From<PersistedConventions> for NamingConventions {
    fn from(data: PersistedConventions) -> Self {
        match data {
            PersistedConventions::V1(conventions) => conventions,
        }
    }
}

/// Reads the conventions from `path`, or from the user's config directory when no path is given.
/// A missing file in the config directory means the defaults are used, a missing explicit file
/// is an error.
pub fn load_conventions(path: Option<&Path>) -> Result<NamingConventions> {
    match path {
        Some(path) => read_data(path),
        None => {
            let Some(path) = conventions_file_path() else {
                tracing::debug!("No config directory, using default conventions");
                return Ok(NamingConventions::default());
            };
            if !path.try_exists()? {
                tracing::debug!(path = %path.display(), "File not found, using default conventions");
                return Ok(NamingConventions::default());
            }
            read_data(&path)
        }
    }
}

/// Writes the conventions to `path`, or to the user's config directory when no path is given.
/// Returns the path that was written.
pub fn save_conventions(conventions: &NamingConventions, path: Option<&Path>) -> Result<PathBuf> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => conventions_file_path()
            .ok_or_else(|| anyhow::anyhow!("Unable to determine the config directory"))?,
    };
    write_data(&PersistedConventions::V1(conventions.clone()), &path)?;
    Ok(path)
}

fn write_data(data: &PersistedConventions, path: &Path) -> Result<()> {
    tracing::info!(path = %path.display(), "Writing naming conventions");

    let folder = path
        .parent()
        .filter(|folder| !folder.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(folder)?;

    // First write the data to a temporary file
    let write_file_path = temporary_write_file_path(folder);
    let mut file = std::fs::File::create(&write_file_path)?;
    serde_json::to_writer_pretty(&mut file, &data)?;
    file.sync_all()?;

    // Then move the temporary file to the final location
    // Makes things more robust against crashes
    std::fs::rename(&write_file_path, path)?;

    Ok(())
}

fn read_data(path: &Path) -> Result<NamingConventions> {
    tracing::info!(path = %path.display(), "Reading naming conventions");
    let file = std::fs::File::open(path)
        .with_context(|| format!("Failed to open {}", path.display()))?;
    let data: PersistedConventions = serde_json::from_reader(file)
        .with_context(|| format!("Invalid naming conventions in {}", path.display()))?;
    Ok(data.into())
}

fn conventions_folder() -> Option<PathBuf> {
    directories::ProjectDirs::from("org", "wso2", "celltrace")
        .map(|dirs| dirs.config_dir().to_path_buf())
}

pub fn conventions_file_path() -> Option<PathBuf> {
    conventions_folder().map(|folder| folder.join("conventions.json"))
}

fn temporary_write_file_path(folder: &Path) -> PathBuf {
    let random_number: u64 = rand::random();
    folder.join(format!("temporary_conventions{}.json", random_number))
}
