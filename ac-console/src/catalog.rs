use std::{
    fmt,
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use rpc_abi::DEFAULT_EDITOR;
use tracing::info;

use crate::{
    logging::category_rpc,
    rpc::ScriptSummary,
    script::{ScriptNameError, has_script_extension, normalize_script_name, validate_rename},
    store::{ScriptStore, StoreError},
};

#[derive(Debug)]
pub enum CatalogError {
    Store(StoreError),
    Name(ScriptNameError),
    InvalidExtension(String),
    Io { path: PathBuf, source: std::io::Error },
}

impl fmt::Display for CatalogError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CatalogError::Store(err) => write!(f, "{err}"),
            CatalogError::Name(err) => write!(f, "{err}"),
            CatalogError::InvalidExtension(name) => {
                write!(f, "only python files (.py) can be uploaded, got '{name}'")
            }
            CatalogError::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl std::error::Error for CatalogError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            CatalogError::Store(err) => Some(err),
            CatalogError::Name(err) => Some(err),
            CatalogError::InvalidExtension(_) => None,
            CatalogError::Io { source, .. } => Some(source),
        }
    }
}

impl From<StoreError> for CatalogError {
    fn from(err: StoreError) -> Self {
        CatalogError::Store(err)
    }
}

impl From<ScriptNameError> for CatalogError {
    fn from(err: ScriptNameError) -> Self {
        CatalogError::Name(err)
    }
}

/// Script list of the module plus the operations of its config page.
pub struct ScriptCatalog<S: ScriptStore> {
    store: Arc<S>,
    scripts: Mutex<Vec<ScriptSummary>>,
}

impl<S: ScriptStore> ScriptCatalog<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self {
            store,
            scripts: Mutex::new(Vec::new()),
        }
    }

    pub async fn refresh(&self) -> Result<Vec<ScriptSummary>, CatalogError> {
        let config = self.store.module_config().await?;
        let mut scripts = self.scripts.lock().expect("catalog lock poisoned");
        *scripts = config.scripts;
        Ok(scripts.clone())
    }

    /// Last list fetched by `refresh`.
    pub fn scripts(&self) -> Vec<ScriptSummary> {
        self.scripts.lock().expect("catalog lock poisoned").clone()
    }

    pub async fn create(&self, name: &str) -> Result<String, CatalogError> {
        let script = normalize_script_name(name)?;
        self.store
            .save_script(&script, DEFAULT_EDITOR, "", "")
            .await?;
        info!("{} created script={script}", category_rpc());
        self.refresh().await?;
        Ok(script)
    }

    pub async fn delete(&self, name: &str) -> Result<(), CatalogError> {
        self.store.delete_script(name).await?;
        info!("{} deleted script={name}", category_rpc());
        self.refresh().await?;
        Ok(())
    }

    pub async fn set_disabled(&self, name: &str, disabled: bool) -> Result<(), CatalogError> {
        self.store.disable_script(name, disabled).await?;
        self.refresh().await?;
        Ok(())
    }

    pub async fn rename(&self, old_name: &str, new_name: &str) -> Result<String, CatalogError> {
        let target = validate_rename(old_name, new_name)?;
        self.store.rename_script(old_name, &target).await?;
        self.refresh().await?;
        Ok(target)
    }

    /// Uploads a local `.py` file; its file name becomes the script name.
    pub async fn upload(&self, path: &Path) -> Result<String, CatalogError> {
        let file_name = path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string();
        if !has_script_extension(&file_name) {
            return Err(CatalogError::InvalidExtension(file_name));
        }
        let script = normalize_script_name(&file_name)?;
        let content = tokio::fs::read(path)
            .await
            .map_err(|source| CatalogError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        self.store.upload_script(&script, content).await?;
        self.refresh().await?;
        Ok(script)
    }

    /// Writes the script's bytes to `destination`, returning the byte count.
    pub async fn download(&self, name: &str, destination: &Path) -> Result<usize, CatalogError> {
        let content = self.store.download_script(name).await?;
        tokio::fs::write(destination, &content)
            .await
            .map_err(|source| CatalogError::Io {
                path: destination.to_path_buf(),
                source,
            })?;
        Ok(content.len())
    }
}
