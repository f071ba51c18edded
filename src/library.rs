//! The services a running photoshelf instance shares: catalog, indexer,
//! thumbnail cache and pregeneration engine, built once from the config.

use anyhow::{Context, Result};
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::Config;
use crate::db::Database;
use crate::pregen::{PregenEngine, PregenOptions, PregenResult};
use crate::scanner::{Indexer, MediaExtensions, ScanError, ScanSummary};
use crate::tasks::CancelToken;
use crate::thumbnails::{SizeClass, ThumbnailError, Thumbnailer};

#[derive(Debug, thiserror::Error)]
pub enum ThumbnailRequestError {
    #[error("no media with id {0}")]
    NotFound(i64),
    #[error(transparent)]
    Thumbnail(#[from] ThumbnailError),
    #[error(transparent)]
    Catalog(#[from] anyhow::Error),
}

pub struct Library {
    config: Config,
    db: Arc<Database>,
    indexer: Indexer,
    thumbs: Arc<Thumbnailer>,
    pregen: PregenEngine,
}

impl Library {
    /// Open the catalog and thumbnail cache under `config.cache.dir`.
    /// Either failing is fatal.
    pub fn open(config: Config) -> Result<Self> {
        let db = Database::open(&config.db_path())?;
        db.initialize().context("Failed to initialize catalog schema")?;
        let thumbs = Thumbnailer::new(config.thumbs_dir(), &config.thumbnails)?;
        Ok(Self::from_parts(config, Arc::new(db), Arc::new(thumbs)))
    }

    pub fn from_parts(config: Config, db: Arc<Database>, thumbs: Arc<Thumbnailer>) -> Self {
        let extensions = MediaExtensions::new(
            &config.library.image_extensions,
            &config.library.video_extensions,
        );
        let indexer = Indexer::new(Arc::clone(&db), config.library.roots.clone(), extensions);
        let pregen = PregenEngine::new(Arc::clone(&thumbs), PregenOptions::from(&config.pregen));
        Self {
            config,
            db,
            indexer,
            thumbs,
            pregen,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn db(&self) -> &Database {
        &self.db
    }

    pub fn indexer(&self) -> &Indexer {
        &self.indexer
    }

    pub fn thumbnails(&self) -> &Thumbnailer {
        &self.thumbs
    }

    pub fn pregen(&self) -> &PregenEngine {
        &self.pregen
    }

    pub fn scan(&self, cancel: &CancelToken) -> Result<ScanSummary, ScanError> {
        self.indexer.scan(cancel)
    }

    /// Pregenerate over a fresh snapshot of the catalog.
    pub fn run_pregen(&self, cancel: &CancelToken) -> Result<PregenResult> {
        let items = self.db.all_pregen_items()?;
        Ok(self.pregen.run(&items, cancel)?)
    }

    /// Resolve a catalog id to its thumbnail, generating it if needed.
    pub fn thumbnail_for(&self, id: i64, size: SizeClass) -> Result<PathBuf, ThumbnailRequestError> {
        let record = self
            .db
            .get_media(id)?
            .ok_or(ThumbnailRequestError::NotFound(id))?;
        Ok(self.thumbs.get_or_create(&record.path, size, record.media_type)?)
    }
}
