use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use wherigo_core::CartridgeResources;

/// Cartridge payload read from disk: the script from one file, media from
/// `<index>.<ext>` files in an optional directory.
pub struct DirectoryResources {
    script: PathBuf,
    media_dir: Option<PathBuf>,
}

impl DirectoryResources {
    pub fn new(script: PathBuf, media_dir: Option<PathBuf>) -> Result<Self> {
        if !script.is_file() {
            anyhow::bail!("cartridge script {} does not exist", script.display());
        }
        if let Some(dir) = &media_dir {
            if !dir.is_dir() {
                anyhow::bail!("media directory {} does not exist", dir.display());
            }
        }
        Ok(DirectoryResources { script, media_dir })
    }

    fn media_path(&self, index: i64) -> Result<Option<PathBuf>> {
        let Some(dir) = &self.media_dir else {
            return Ok(None);
        };
        let wanted = index.to_string();
        for entry in fs::read_dir(dir).with_context(|| format!("listing {}", dir.display()))? {
            let path = entry?.path();
            if path.is_file() && path.file_stem().and_then(|stem| stem.to_str()) == Some(&wanted) {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

impl CartridgeResources for DirectoryResources {
    fn script(&self) -> Result<Vec<u8>> {
        read(&self.script)
    }

    fn media(&self, index: i64) -> Result<Option<Vec<u8>>> {
        match self.media_path(index)? {
            Some(path) => read(&path).map(Some),
            None => Ok(None),
        }
    }

    fn chunk_name(&self) -> String {
        self.script
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "cartridge".to_string())
    }
}

fn read(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("reading {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::DirectoryResources;
    use std::fs;
    use tempfile::tempdir;
    use wherigo_core::CartridgeResources;

    #[test]
    fn media_is_found_by_index_stem() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let script = dir.path().join("cart.lua");
        fs::write(&script, "return nil")?;
        let media = dir.path().join("media");
        fs::create_dir(&media)?;
        fs::write(media.join("3.jpg"), b"jpeg")?;
        fs::write(media.join("13.wav"), b"wave")?;

        let resources = DirectoryResources::new(script, Some(media))?;
        assert_eq!(resources.media(3)?, Some(b"jpeg".to_vec()));
        assert_eq!(resources.media(13)?, Some(b"wave".to_vec()));
        assert_eq!(resources.media(4)?, None);
        assert_eq!(resources.chunk_name(), "cart.lua");
        Ok(())
    }

    #[test]
    fn missing_script_is_reported() {
        let dir = tempdir().expect("tempdir");
        assert!(DirectoryResources::new(dir.path().join("absent.lua"), None).is_err());
    }
}
