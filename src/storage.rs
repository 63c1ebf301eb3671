use std::fs::{self, File};
use std::io::{self, ErrorKind};
use std::path::{Component, Path, PathBuf};

use updater_core::Storage;

/// SPIFFS mount point on the device
pub const SPIFFS_BASE_PATH: &str = "/spiffs";

/// Staged files land under `root`, keyed by their server-relative path
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `/images/logo.png` → `<root>/images/logo.png`.
    ///
    /// Paths come from the server, so anything that could leave `root`
    /// (`..`, a drive prefix) or names no file is refused.
    pub fn local_path(&self, path: &str) -> io::Result<PathBuf> {
        let relative = Path::new(path.trim_start_matches('/'));
        let mut named = false;
        for component in relative.components() {
            match component {
                Component::Normal(_) => named = true,
                Component::CurDir => {}
                _ => {
                    return Err(io::Error::new(
                        ErrorKind::InvalidInput,
                        format!("{} escapes the storage root", path),
                    ))
                }
            }
        }
        if !named {
            return Err(io::Error::new(
                ErrorKind::InvalidInput,
                format!("{:?} is not a file path", path),
            ));
        }
        Ok(self.root.join(relative))
    }

    /// Register the SPIFFS partition with the VFS, formatting it if it will not mount
    #[cfg(target_os = "espidf")]
    pub fn mount_spiffs() -> anyhow::Result<Self> {
        use esp_idf_sys::{esp, esp_vfs_spiffs_conf_t, esp_vfs_spiffs_register};

        let conf = esp_vfs_spiffs_conf_t {
            base_path: c"/spiffs".as_ptr(),
            partition_label: std::ptr::null(),
            max_files: 5,
            format_if_mount_failed: true,
        };
        esp!(unsafe { esp_vfs_spiffs_register(&conf) })?;
        log::info!("SPIFFS filesystem mounted at {}", SPIFFS_BASE_PATH);
        Ok(Self::new(SPIFFS_BASE_PATH))
    }
}

impl Storage for FsStorage {
    type File = File;

    #[cfg(target_os = "espidf")]
    fn format(&mut self) -> io::Result<()> {
        log::warn!("Formatting SPIFFS");
        let err = unsafe { esp_idf_sys::esp_spiffs_format(std::ptr::null()) };
        esp_idf_sys::EspError::convert(err)
            .map_err(|e| io::Error::new(ErrorKind::Other, e))
    }

    #[cfg(not(target_os = "espidf"))]
    fn format(&mut self) -> io::Result<()> {
        log::warn!("Clearing {}", self.root.display());
        match fs::read_dir(&self.root) {
            Ok(entries) => {
                for entry in entries {
                    let path = entry?.path();
                    if path.is_dir() {
                        fs::remove_dir_all(&path)?;
                    } else {
                        fs::remove_file(&path)?;
                    }
                }
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => fs::create_dir_all(&self.root),
            Err(e) => Err(e),
        }
    }

    fn remove(&mut self, path: &str) -> io::Result<()> {
        match fs::remove_file(self.local_path(path)?) {
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            other => other,
        }
    }

    fn create(&mut self, path: &str) -> io::Result<File> {
        let local = self.local_path(path)?;
        // SPIFFS is flat; directories only exist in the file names there
        #[cfg(not(target_os = "espidf"))]
        if let Some(parent) = local.parent() {
            fs::create_dir_all(parent)?;
        }
        File::create(local)
    }
}
