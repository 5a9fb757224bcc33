//! Color theming for CLI output.
//!
//! One palette shared by `owo_colors` (terminal text) and `comfy_table`
//! (tables). Colors are disabled by `--no-color` or the `NO_COLOR`
//! environment variable, in which case every helper returns plain text.

use crate::pool::WorkerStatus;
use owo_colors::OwoColorize;
use std::fmt::Display;
use std::sync::atomic::{AtomicBool, Ordering};

static COLORS_ENABLED: AtomicBool = AtomicBool::new(true);

/// Disable all colors globally. Call early in main().
pub fn disable_colors() {
    COLORS_ENABLED.store(false, Ordering::Relaxed);
    owo_colors::set_override(false);
}

pub fn colors_enabled() -> bool {
    COLORS_ENABLED.load(Ordering::Relaxed)
}

/// Semantic color categories.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Semantic {
    WorkerId,
    Pid,
    Healthy,
    Pending,
    Leaving,
    Failed,
    Muted,
}

impl Semantic {
    /// Color category for a worker lifecycle state.
    pub fn for_status(status: WorkerStatus) -> Self {
        match status {
            WorkerStatus::Ready => Self::Healthy,
            WorkerStatus::Starting => Self::Pending,
            WorkerStatus::Draining => Self::Leaving,
            WorkerStatus::Dead => Self::Failed,
        }
    }
}

/// comfy_table color for a category, or None when colors are off.
pub fn table_color(semantic: Semantic) -> Option<comfy_table::Color> {
    if !colors_enabled() {
        return None;
    }
    Some(match semantic {
        Semantic::WorkerId => comfy_table::Color::Cyan,
        Semantic::Pid => comfy_table::Color::Magenta,
        Semantic::Healthy => comfy_table::Color::Green,
        Semantic::Pending => comfy_table::Color::Yellow,
        Semantic::Leaving => comfy_table::Color::DarkYellow,
        Semantic::Failed => comfy_table::Color::Red,
        Semantic::Muted => comfy_table::Color::Reset,
    })
}

pub trait ThemedCell {
    fn themed(self, semantic: Semantic) -> Self;
}

impl ThemedCell for comfy_table::Cell {
    fn themed(self, semantic: Semantic) -> Self {
        match table_color(semantic) {
            Some(color) => self.fg(color),
            None => self,
        }
    }
}

fn styled<T: Display>(value: &T, paint: impl FnOnce(&T) -> String) -> String {
    if colors_enabled() {
        paint(value)
    } else {
        value.to_string()
    }
}

/// Semantic text styles, all respecting [`disable_colors`].
pub trait Themed: Display + Sized {
    fn warning(&self) -> String {
        styled(self, |v| v.yellow().to_string())
    }

    fn success(&self) -> String {
        styled(self, |v| v.green().bold().to_string())
    }

    fn label(&self) -> String {
        styled(self, |v| v.yellow().to_string())
    }

    fn count(&self) -> String {
        styled(self, |v| v.cyan().to_string())
    }
}

impl Themed for String {}
impl Themed for &str {}
impl Themed for u64 {}
impl Themed for usize {}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    fn reset_colors() {
        COLORS_ENABLED.store(true, Ordering::Relaxed);
        owo_colors::set_override(true);
    }

    #[test]
    #[serial(colors)]
    fn test_disable_colors() {
        reset_colors();
        assert!(colors_enabled());
        disable_colors();
        assert!(!colors_enabled());
        reset_colors();
    }

    #[test]
    #[serial(colors)]
    fn test_themed_with_colors() {
        reset_colors();
        let colored = "draining".warning();
        assert!(colored.contains("\x1b["), "Expected ANSI escape codes");
        assert!(colored.contains("draining"));
    }

    #[test]
    #[serial(colors)]
    fn test_themed_without_colors() {
        reset_colors();
        disable_colors();
        assert_eq!("x".success(), "x");
        assert_eq!(42usize.count(), "42");
        assert_eq!(table_color(Semantic::Healthy), None);
        reset_colors();
    }

    #[test]
    #[serial(colors)]
    fn test_status_palette() {
        reset_colors();
        assert_eq!(
            table_color(Semantic::for_status(WorkerStatus::Ready)),
            Some(comfy_table::Color::Green)
        );
        assert_eq!(
            table_color(Semantic::for_status(WorkerStatus::Starting)),
            Some(comfy_table::Color::Yellow)
        );
        assert_eq!(
            table_color(Semantic::for_status(WorkerStatus::Dead)),
            Some(comfy_table::Color::Red)
        );
    }
}
