//! Process-wide slog setup, grounded on the teacher's root `src/logging.rs`:
//! JSON (mozlog) output in production, human-readable terminal output
//! otherwise, both wrapped in `slog_envlogger` + `slog_async`.

use std::io;

use slog::{self, slog_o, Drain};

pub fn init_logging(json: bool) -> Result<(), String> {
    let logger = if json {
        let hostname = hostname::get()
            .ok()
            .and_then(|h| h.into_string().ok())
            .ok_or_else(|| "could not determine hostname".to_owned())?;

        let drain = slog_mozlog_json::MozLogJson::new(io::stdout())
            .logger_name(format!("{}-{}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION")))
            .msg_type(format!("{}:log", env!("CARGO_PKG_NAME")))
            .hostname(hostname)
            .build()
            .fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    } else {
        let decorator = slog_term::TermDecorator::new().build();
        let drain = slog_term::FullFormat::new(decorator).build().fuse();
        let drain = slog_envlogger::new(drain);
        let drain = slog_async::Async::new(drain).build().fuse();
        slog::Logger::root(drain, slog_o!())
    };

    slog_scope::set_global_logger(logger).cancel_reset();
    slog_stdlog::init().map_err(|e| e.to_string())?;
    Ok(())
}

pub fn reset_logging() {
    let logger = slog::Logger::root(slog::Discard, slog_o!());
    slog_scope::set_global_logger(logger).cancel_reset();
}
