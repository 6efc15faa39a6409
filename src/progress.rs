use std::io::IsTerminal;
use std::time::Duration;

use indicatif::{MultiProgress, ProgressBar, ProgressDrawTarget, ProgressStyle};

/// Controls how step output is rendered. Everything goes to stderr.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// Spinners with a checkmark or cross on completion.
    Normal,
    /// No ANSI, one line per step start and end (for piped/non-TTY).
    Plain,
    /// Nothing at all (`--json`).
    Silent,
}

impl OutputMode {
    pub fn detect(json: bool) -> Self {
        if json {
            OutputMode::Silent
        } else if std::io::stderr().is_terminal() {
            OutputMode::Normal
        } else {
            OutputMode::Plain
        }
    }
}

/// Numbered remote steps with spinners.
pub struct StepProgress {
    multi: MultiProgress,
    total_steps: usize,
    current_step: usize,
    mode: OutputMode,
}

fn spinner_style() -> ProgressStyle {
    ProgressStyle::default_spinner()
        .template("[{prefix}] {spinner:.cyan} {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

fn done_style(ok: bool) -> ProgressStyle {
    let template = if ok {
        "[{prefix}] \u{2713} {msg:.green}"
    } else {
        "[{prefix}] \u{2717} {msg:.red}"
    };
    ProgressStyle::default_spinner()
        .template(template)
        .unwrap_or_else(|_| ProgressStyle::default_spinner())
}

impl StepProgress {
    pub fn new(total_steps: usize, mode: OutputMode) -> Self {
        let multi = match mode {
            OutputMode::Normal => MultiProgress::new(),
            OutputMode::Plain | OutputMode::Silent => {
                MultiProgress::with_draw_target(ProgressDrawTarget::hidden())
            }
        };
        Self {
            multi,
            total_steps,
            current_step: 0,
            mode,
        }
    }

    /// Await `fut` as the next numbered step: spinner while it runs, then a
    /// checkmark or a cross depending on the result.
    pub async fn run<Fut, T, E>(&mut self, label: &str, fut: Fut) -> Result<T, E>
    where
        Fut: Future<Output = Result<T, E>>,
    {
        self.current_step += 1;
        let prefix = format!("{}/{}", self.current_step, self.total_steps);

        if self.mode == OutputMode::Plain {
            eprintln!("[{prefix}] {label}");
        }

        let bar = self.multi.add(ProgressBar::new_spinner());
        bar.set_style(spinner_style());
        bar.set_prefix(prefix.clone());
        bar.set_message(label.to_string());
        bar.enable_steady_tick(Duration::from_millis(80));

        let result = fut.await;
        let ok = result.is_ok();

        if self.mode == OutputMode::Plain {
            let mark = if ok { '\u{2713}' } else { '\u{2717}' };
            eprintln!("[{prefix}] {mark} {label}");
        }

        bar.set_style(done_style(ok));
        bar.finish_with_message(label.to_string());
        result
    }

    /// Print an info line under the steps.
    pub fn info(&self, text: &str) {
        match self.mode {
            OutputMode::Normal => {
                self.multi.println(format!("      \u{2192} {text}")).ok();
            }
            OutputMode::Plain => eprintln!("      \u{2192} {text}"),
            OutputMode::Silent => {}
        }
    }
}
