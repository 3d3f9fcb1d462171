use indicatif::{ProgressBar, ProgressStyle};

const TEMPLATE: &str = "{spinner} [{elapsed_precise}] {bar:40} {pos}/{len} voxels (ETA {eta})";

/// Progress bar for a voxel sweep. Safe to advance from worker threads.
pub(crate) fn voxel_progress(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    match ProgressStyle::with_template(TEMPLATE) {
        Ok(style) => bar.set_style(style),
        Err(e) => tracing::debug!("Falling back to default progress style: {}", e),
    }
    bar
}
