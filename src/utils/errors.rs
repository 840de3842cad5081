use crate::cli::ColorMode;
use lazy_static::lazy_static;
use nu_ansi_term::{Color, Style};
use std::sync::atomic::{AtomicBool, Ordering};

pub const DEFAULT_EXIT_CODE: i32 = 1;

lazy_static! {
    static ref ERROR_INDICATOR: Style = Color::Red.bold();
    static ref WARNING_INDICATOR: Style = Color::Yellow.bold();
    static ref NOTE_INDICATOR: Style = Color::Cyan.bold();
    static ref EMPHASIS: Style = Color::Default.bold();
}

static USE_COLOR: AtomicBool = AtomicBool::new(true);

pub(crate) fn configure_color(cmode: ColorMode) {
    USE_COLOR.store(matches!(cmode, ColorMode::On), Ordering::Relaxed);
}

pub(crate) fn color_mode() -> ColorMode {
    match USE_COLOR.load(Ordering::Relaxed) {
        true => ColorMode::On,
        false => ColorMode::Off,
    }
}

fn report(label: &str, indicator: Style, text_style: Style, text: &str) {
    match color_mode() {
        ColorMode::On => {
            eprintln!("{} {}", indicator.paint(label), text_style.paint(text));
        }
        ColorMode::Off => {
            eprintln!("{} {}", label, text);
        }
    }
}

pub(crate) fn error_internal(text: &str) {
    report("error:", *ERROR_INDICATOR, *EMPHASIS, text);
}

pub(crate) fn warn_internal(text: &str) {
    report("warning:", *WARNING_INDICATOR, *EMPHASIS, text);
}

pub(crate) fn note_internal(text: &str) {
    report("note:", *NOTE_INDICATOR, Style::new(), text);
}

#[macro_export]
macro_rules! warn {
    ($($arg:tt)*) => ({
        let formatted = format!($($arg)*);
        $crate::utils::errors::warn_internal(&formatted);
    })
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => ({
        let formatted = format!($($arg)*);
        $crate::utils::errors::error_internal(&formatted);
    })
}

/// Remediation hints printed after a warning or error
#[macro_export]
macro_rules! note {
    ($($arg:tt)*) => ({
        let formatted = format!($($arg)*);
        $crate::utils::errors::note_internal(&formatted);
    })
}

#[macro_export]
macro_rules! die {
    (code = $code:expr; $($arg:tt)*) => ({
        let formatted = format!($($arg)*);
        $crate::utils::errors::error_internal(&formatted);
        ::std::process::exit($code);
    });
}
