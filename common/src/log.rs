use std::{panic, path::Path, thread};

use anyhow::{Context, Result};
use backtrace::Backtrace;
use log::LevelFilter;
use log4rs::{
    append::console::{ConsoleAppender, Target},
    config::{Appender, Root},
    encode::pattern::PatternEncoder,
    Config,
};

pub const LOG_INFO: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/log/info.yml");
pub const LOG_DEBUG: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/log/debug.yml");
pub const LOG_TRACE: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/log/trace.yml");

const FALLBACK_PATTERN: &str = "{d(%Y-%m-%d %H:%M:%S)} {h({l:<5})} {t} > {m}{n}";

pub fn init_log(log_config: &Path) -> Result<()> {
    set_panic_log_hook();

    // installed binaries may not ship the yaml configs
    if !log_config.is_file() {
        init_fallback_log(LevelFilter::Info)?;
        log::warn!(
            "log config {:?} not found, falling back to stderr logging",
            log_config
        );
        return Ok(());
    }

    log4rs::init_file(log_config, Default::default()).with_context(|| {
        format!(
            "Failed to initialize logger with config from {:?}",
            &log_config
        )
    })
}

pub fn init_fallback_log(level: LevelFilter) -> Result<()> {
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new(FALLBACK_PATTERN)))
        .build();
    let config = Config::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level))
        .context("Failed to build fallback log config")?;

    log4rs::init_config(config)
        .map(|_| ())
        .context("Failed to initialize fallback logger")
}

fn set_panic_log_hook() {
    panic::set_hook(Box::new(|info| {
        let thread = thread::current();
        let payload = info.payload();
        let msg = payload
            .downcast_ref::<&'static str>()
            .copied()
            .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
            .unwrap_or("Box<dyn Any>");
        let location = info
            .location()
            .map(|location| format!(": {}:{}", location.file(), location.line()))
            .unwrap_or_default();

        log::error!(
            target: "panic",
            "thread '{}' panicked at '{}'{}",
            thread.name().unwrap_or("<unnamed>"),
            msg,
            location
        );
        log::error!(target: "panic::backtrace", "{:?}", Backtrace::new());
    }));
}
