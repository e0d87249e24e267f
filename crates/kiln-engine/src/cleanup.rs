//! Cleanup actions run after a workflow exits.

use std::fs;
use std::path::Path;

use tracing::{info, warn};

use crate::context::WorkflowContext;
use crate::recipe::CleanupAction;
use crate::resolver;
use crate::tools::file_ops::move_path;

/// Process a cleanup list in order. Individual failures are logged and do
/// not block later actions; cleanup never changes the run outcome.
pub fn run_cleanup(actions: &[CleanupAction], ctx: &WorkflowContext) {
    for action in actions {
        if let Err(e) = apply_action(action, ctx) {
            warn!("cleanup error: {e}");
        }
    }
}

fn apply_action(action: &CleanupAction, ctx: &WorkflowContext) -> std::io::Result<()> {
    match action {
        CleanupAction::Delete { path } => {
            let path = resolver::resolve_str(path, ctx);
            let path = Path::new(&path);
            if path.is_dir() {
                fs::remove_dir_all(path)?;
            } else if path.exists() {
                fs::remove_file(path)?;
            } else {
                return Ok(());
            }
            info!("cleaned up: {}", path.display());
        }
        CleanupAction::Move {
            source,
            destination,
        } => {
            let source = resolver::resolve_str(source, ctx);
            let destination = resolver::resolve_str(destination, ctx);
            let source = Path::new(&source);
            let destination = Path::new(&destination);
            if source.exists() {
                if let Some(parent) = destination.parent() {
                    fs::create_dir_all(parent)?;
                }
                move_path(source, destination)?;
                info!("moved {} -> {}", source.display(), destination.display());
            }
        }
        CleanupAction::Preserve { path, reason } => {
            let path = resolver::resolve_str(path, ctx);
            info!("preserved for {reason}: {path}");
        }
    }
    Ok(())
}
