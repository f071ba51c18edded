use anyhow::{Context, Result};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use super::{CancelToken, TaskState};
use crate::library::Library;
use crate::pregen::{PregenError, PregenState};
use crate::scanner::ScanError;

#[derive(Debug, Clone, Copy)]
pub struct PipelineOptions {
    pub index_on_startup: bool,
    pub pregen_enabled: bool,
}

impl From<&crate::config::Config> for PipelineOptions {
    fn from(config: &crate::config::Config) -> Self {
        Self {
            index_on_startup: config.watch.index_on_startup,
            pregen_enabled: config.pregen.enabled,
        }
    }
}

/// A background thread and the state it last reported.
pub struct PipelineHandle {
    thread: JoinHandle<()>,
    state: Arc<Mutex<TaskState>>,
}

impl PipelineHandle {
    fn spawn<F>(name: &str, body: F) -> Result<Self>
    where
        F: FnOnce() -> TaskState + Send + 'static,
    {
        let state = Arc::new(Mutex::new(TaskState::Running));
        let shared = Arc::clone(&state);
        let thread = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                let end = body();
                *shared.lock().unwrap_or_else(|e| e.into_inner()) = end;
            })
            .with_context(|| format!("Failed to spawn {name} thread"))?;
        Ok(Self { thread, state })
    }

    pub fn state(&self) -> TaskState {
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn is_finished(&self) -> bool {
        self.thread.is_finished()
    }

    /// Wait for the thread and return its final state.
    pub fn join(self) -> TaskState {
        if self.thread.join().is_err() {
            return TaskState::Failed("background thread panicked".to_string());
        }
        self.state.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

/// Startup chain: scan, then drop hidden files that slipped into the
/// catalog, then pregenerate small thumbnails. Each stage starts only after
/// the previous one returns.
pub struct Pipeline;

impl Pipeline {
    pub fn start(
        library: Arc<Library>,
        options: PipelineOptions,
        cancel: CancelToken,
    ) -> Result<PipelineHandle> {
        PipelineHandle::spawn("photoshelf-pipeline", move || {
            if options.index_on_startup {
                if let Some(end) = scan_stage(&library, &cancel) {
                    return end;
                }
            }
            cleanup_stage(&library, false);
            if options.pregen_enabled {
                return pregen_stage(&library, &cancel);
            }
            TaskState::Completed
        })
    }
}

/// Periodic re-scan. Sleeps first, so it never races the startup pipeline.
pub struct Watcher;

impl Watcher {
    pub fn spawn(
        library: Arc<Library>,
        interval: Duration,
        pregen_enabled: bool,
        cancel: CancelToken,
    ) -> Result<PipelineHandle> {
        PipelineHandle::spawn("photoshelf-watcher", move || {
            tracing::info!("Re-scan scheduled every {}s", interval.as_secs());
            while cancel.sleep(interval) {
                tracing::info!("Periodic re-scan starting");
                match scan_stage(&library, &cancel) {
                    Some(TaskState::Cancelled) => return TaskState::Cancelled,
                    Some(_) => continue,
                    None => {}
                }
                cleanup_stage(&library, true);
                if pregen_enabled {
                    if let TaskState::Cancelled = pregen_stage(&library, &cancel) {
                        return TaskState::Cancelled;
                    }
                }
            }
            TaskState::Cancelled
        })
    }
}

/// Returns a terminal state if the caller should stop here.
fn scan_stage(library: &Library, cancel: &CancelToken) -> Option<TaskState> {
    match library.scan(cancel) {
        Ok(_) => None,
        Err(ScanError::AlreadyRunning) => {
            tracing::info!("Scan already running, skipping");
            Some(TaskState::Completed)
        }
        Err(ScanError::Cancelled) => Some(TaskState::Cancelled),
    }
}

fn cleanup_stage(library: &Library, remove_missing: bool) {
    if remove_missing {
        match library.db().remove_missing() {
            Ok(0) => {}
            Ok(n) => tracing::info!(removed = n, "Removed records for deleted files"),
            Err(e) => tracing::warn!("Failed to prune deleted files: {:#}", e),
        }
    }
    match library.db().remove_dotfiles() {
        Ok(0) => {}
        Ok(n) => tracing::info!(removed = n, "Removed hidden-file records"),
        Err(e) => tracing::warn!("Failed to prune hidden files: {:#}", e),
    }
}

fn pregen_stage(library: &Library, cancel: &CancelToken) -> TaskState {
    match library.run_pregen(cancel) {
        Ok(result) if result.outcome == PregenState::Aborted => TaskState::Cancelled,
        Ok(_) => TaskState::Completed,
        Err(e) if e.downcast_ref::<PregenError>().is_some() => {
            tracing::info!("Pregeneration already running, skipping");
            TaskState::Completed
        }
        Err(e) => {
            tracing::error!("Pregeneration failed: {:#}", e);
            TaskState::Failed(e.to_string())
        }
    }
}
