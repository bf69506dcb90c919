// Shader hot reload
//
// A notify watcher runs on its own thread and only raises a flag; the render
// loop polls the flag between frames and rebuilds the pipeline itself.

use anyhow::{Context, Result};
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub struct ShaderWatcher {
    pending: Arc<AtomicBool>,
    // Watching stops when this is dropped
    _watcher: RecommendedWatcher,
}

impl ShaderWatcher {
    /// Watch the directories containing `shader_paths` for SPIR-V changes
    pub fn new(shader_paths: &[&Path]) -> Result<Self> {
        let pending = Arc::new(AtomicBool::new(false));
        let flag = pending.clone();

        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) if is_shader_change(&event) => {
                log::debug!("Shader change: {:?}", event.paths);
                flag.store(true, Ordering::Release);
            }
            Ok(_) => {}
            Err(e) => log::warn!("Shader watcher error: {}", e),
        })
        .context("Failed to create shader watcher")?;

        for dir in watch_dirs(shader_paths) {
            watcher
                .watch(&dir, RecursiveMode::NonRecursive)
                .with_context(|| format!("Failed to watch {:?}", dir))?;
            log::info!("Watching {:?} for shader changes", dir);
        }

        Ok(Self {
            pending,
            _watcher: watcher,
        })
    }

    /// True once per burst of changes since the last call
    pub fn take_pending(&self) -> bool {
        self.pending.swap(false, Ordering::AcqRel)
    }
}

/// Parent directories of the shader files, without duplicates
fn watch_dirs(shader_paths: &[&Path]) -> Vec<PathBuf> {
    let mut dirs: Vec<PathBuf> = Vec::new();
    for path in shader_paths {
        let dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !dirs.contains(&dir) {
            dirs.push(dir);
        }
    }
    dirs
}

fn is_shader_change(event: &Event) -> bool {
    let relevant_kind = matches!(event.kind, EventKind::Create(_) | EventKind::Modify(_));
    relevant_kind
        && event
            .paths
            .iter()
            .any(|p| p.extension().is_some_and(|ext| ext == "spv"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, ModifyKind};

    #[test]
    fn spv_writes_trigger_reload() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("shaders/quad.frag.spv"));
        assert!(is_shader_change(&event));

        let event = Event::new(EventKind::Create(CreateKind::File))
            .add_path(PathBuf::from("shaders/quad.vert.spv"));
        assert!(is_shader_change(&event));
    }

    #[test]
    fn glsl_sources_and_reads_are_ignored() {
        let event = Event::new(EventKind::Modify(ModifyKind::Data(DataChange::Content)))
            .add_path(PathBuf::from("shaders/quad.frag"));
        assert!(!is_shader_change(&event));

        let event = Event::new(EventKind::Access(AccessKind::Read))
            .add_path(PathBuf::from("shaders/quad.frag.spv"));
        assert!(!is_shader_change(&event));
    }

    #[test]
    fn shared_directory_is_watched_once() {
        let vert = Path::new("shaders/quad.vert.spv");
        let frag = Path::new("shaders/quad.frag.spv");
        assert_eq!(watch_dirs(&[vert, frag]), vec![PathBuf::from("shaders")]);
    }

    #[test]
    fn bare_file_names_watch_the_working_directory() {
        assert_eq!(watch_dirs(&[Path::new("quad.vert.spv")]), vec![PathBuf::from(".")]);
    }
}
