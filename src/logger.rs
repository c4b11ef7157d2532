use std::path::{Path, PathBuf};

use tracing_core::{Level, LevelFilter, Metadata};
use tracing_subscriber::{filter::filter_fn, prelude::*, registry, Layer};

/// Crates whose `info` events would flood the experiment log.
const NOISY_TARGETS: [&str; 3] = ["wgpu", "naga", "cubecl"];

/// Route `log` and `tracing` events of a training run to the terminal and to `file_path`.
///
/// Only the first call in a process installs anything; later runs keep logging to the first file.
/// Returns whether this call installed the subscriber.
pub fn install_file_logger<P: AsRef<Path>>(file_path: P) -> bool {
    let path = file_path.as_ref().to_path_buf();
    let directory = path.parent().map(Path::to_path_buf).unwrap_or_default();
    let file_name = path.file_name().unwrap_or("experiment.log".as_ref());

    let file_layer = tracing_subscriber::fmt::layer()
        .with_ansi(false)
        .with_writer(tracing_appender::rolling::never(directory, file_name))
        .with_filter(LevelFilter::INFO)
        .with_filter(filter_fn(keep_event));
    let terminal_layer = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false)
        .without_time()
        .with_filter(LevelFilter::INFO)
        .with_filter(filter_fn(keep_event));

    let installed = registry()
        .with(file_layer)
        .with(terminal_layer)
        .try_init()
        .is_ok();

    if installed {
        report_panics_to(path);
    }

    installed
}

fn keep_event(metadata: &Metadata<'_>) -> bool {
    let noisy = metadata
        .module_path()
        .is_some_and(|module| NOISY_TARGETS.iter().any(|target| module.starts_with(target)));

    !noisy || *metadata.level() < Level::INFO
}

fn report_panics_to(log_path: PathBuf) {
    let previous = std::panic::take_hook();

    std::panic::set_hook(Box::new(move |info| {
        log::error!("Training aborted: {info}");
        eprintln!(
            "Training aborted, see '{}' for the run log",
            log_path.display()
        );
        previous(info);
    }));
}
