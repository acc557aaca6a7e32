use console::style;
use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};
use std::time::Duration;
use tokio::sync::broadcast;

use crate::events::PreviewEvent;
use crate::ui::icons::{ABANDONED, BOOT, CHECK, CROSS, FILE_NEW, PLAN, SPARKLE, WARN};

/// Terminal progress for a streaming build, driven by [`PreviewEvent`]s.
///
/// Two bars are stacked: the file bar counts completed planned files, the
/// chunk bar is a spinner naming the file currently streaming and the
/// bytes received for it.
pub struct BuildProgressUI {
    multi: MultiProgress,
    file_bar: ProgressBar,
    chunk_bar: ProgressBar,
    verbose: bool,
}

impl BuildProgressUI {
    pub fn new(verbose: bool) -> Self {
        Self::with_target(ProgressDrawTarget::stderr(), verbose)
    }

    /// A UI that draws nothing, for tests and non-interactive runs.
    pub fn hidden() -> Self {
        Self::with_target(ProgressDrawTarget::hidden(), false)
    }

    fn with_target(target: ProgressDrawTarget, verbose: bool) -> Self {
        let multi = MultiProgress::with_draw_target(target);

        let file_style = ProgressStyle::default_bar()
            .template("{prefix:.bold.dim} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .map(|s| s.progress_chars("█▓▒░"))
            .unwrap_or_else(|_| ProgressStyle::default_bar());
        let file_bar = multi.add(ProgressBar::new(0));
        file_bar.set_style(file_style);
        file_bar.set_prefix(" Files");

        let chunk_style = ProgressStyle::default_spinner()
            .template("{prefix:.bold.dim} {spinner} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner());
        let chunk_bar = multi.add(ProgressBar::new_spinner());
        chunk_bar.set_style(chunk_style);
        chunk_bar.set_prefix("Stream");

        Self {
            multi,
            file_bar,
            chunk_bar,
            verbose,
        }
    }

    fn print_line(&self, msg: impl AsRef<str>) {
        if self.multi.println(msg.as_ref()).is_err() {
            eprintln!("{}", msg.as_ref());
        }
    }

    pub fn files_done(&self) -> u64 {
        self.file_bar.position()
    }

    pub fn files_planned(&self) -> u64 {
        self.file_bar.length().unwrap_or(0)
    }

    /// Apply one event. Returns `true` once a boot has finished, which ends
    /// a replay.
    pub fn handle(&self, event: &PreviewEvent) -> bool {
        match event {
            PreviewEvent::BuildStarted { paths, .. } => {
                self.file_bar.set_length(paths.len() as u64);
                self.file_bar.set_position(0);
                self.file_bar.set_message("");
                self.print_line(format!(
                    "{} Plan: {} file(s)",
                    PLAN,
                    style(paths.len()).cyan()
                ));
                self.chunk_bar.enable_steady_tick(Duration::from_millis(100));
            }
            PreviewEvent::FileAnnounced { index, path, .. } => {
                self.chunk_bar.set_message(format!(
                    "#{} {} {}",
                    index + 1,
                    style(path).yellow(),
                    style("(0 bytes)").dim()
                ));
            }
            PreviewEvent::FileChunk { path, bytes, .. } => {
                self.chunk_bar.set_message(format!(
                    "{} {}",
                    style(path).yellow(),
                    style(format!("({} bytes)", bytes)).dim()
                ));
            }
            PreviewEvent::FileCompleted { path, bytes, .. } => {
                self.file_bar.inc(1);
                if self.verbose {
                    self.print_line(format!(
                        "    {} {} {}",
                        FILE_NEW,
                        style(path).green(),
                        style(format!("{} bytes", bytes)).dim()
                    ));
                }
            }
            PreviewEvent::BuildSettled { files, .. } => {
                self.chunk_bar.finish_and_clear();
                self.file_bar
                    .finish_with_message(format!("{} settled ({} files in registry)", CHECK, files));
            }
            PreviewEvent::BuildAbandoned { build_id } => {
                self.print_line(format!(
                    "{} Build {} abandoned",
                    ABANDONED,
                    style(build_id).dim()
                ));
            }
            PreviewEvent::BuildFaulted { reason, .. } => {
                self.chunk_bar.finish_and_clear();
                self.file_bar
                    .abandon_with_message(format!("{} {}", CROSS, style(reason).red()));
            }
            PreviewEvent::SnapshotLoaded { files, .. } => {
                self.print_line(format!("{} Loaded {} file(s)", SPARKLE, files));
            }
            PreviewEvent::BootStarted { version } => {
                self.print_line(format!(
                    "{} Booting snapshot v{}",
                    BOOT,
                    style(version).cyan()
                ));
            }
            PreviewEvent::Fault { signal } => {
                let location = signal
                    .path
                    .as_deref()
                    .map(|p| format!(" [{}]", p))
                    .unwrap_or_default();
                self.print_line(format!(
                    "    {} {} fault{}: {}",
                    WARN,
                    signal.kind,
                    location,
                    style(&signal.message).red()
                ));
            }
            PreviewEvent::BootFinished {
                version,
                rendered,
                faults,
            } => {
                if *rendered {
                    self.print_line(format!("{} Snapshot v{} rendered", CHECK, version));
                } else {
                    self.print_line(format!(
                        "{} Snapshot v{} failed with {} fault(s)",
                        CROSS, version, faults
                    ));
                }
                return true;
            }
            PreviewEvent::StateChanged { state } => {
                if self.verbose {
                    self.print_line(format!("    {}", style(state.label()).dim()));
                }
            }
        }
        false
    }

    /// Render events until the build is over: the first boot after the
    /// plan settles, a build fault, or a closed channel.
    pub async fn follow(&self, mut rx: broadcast::Receiver<PreviewEvent>) {
        let mut settled = false;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let booted = self.handle(&event);
                    match event {
                        PreviewEvent::BuildSettled { .. } | PreviewEvent::SnapshotLoaded { .. } => {
                            settled = true
                        }
                        PreviewEvent::BuildFaulted { .. } => break,
                        _ => {}
                    }
                    if booted && settled {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    }

    pub fn clear(&self) {
        let _ = self.multi.clear();
    }
}
