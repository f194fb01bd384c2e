// Copyright (c) 2024 The Runtime Proxy Authors
//
// SPDX-License-Identifier: Apache-2.0
//

use std::io::Write;
use std::process;

use slog::{o, Drain};

const LOG_LEVELS: &[(&str, slog::Level)] = &[
    ("trace", slog::Level::Trace),
    ("debug", slog::Level::Debug),
    ("info", slog::Level::Info),
    ("warn", slog::Level::Warning),
    ("error", slog::Level::Error),
    ("critical", slog::Level::Critical),
];

const DEFAULT_SUBSYSTEM: &str = "root";

/// Expands to a local `$name!()` macro returning the scoped logger tagged
/// with the given subsystem. Each crate calls this once in its root.
#[macro_export]
macro_rules! logger_with_subsystem {
    ($name: ident, $subsystem: expr) => {
        macro_rules! $name {
            () => {
                slog_scope::logger().new(slog::o!("subsystem" => $subsystem))
            };
        }
    };
}

// Creates a logger which prints output as human readable text to the terminal
pub fn create_term_logger(level: slog::Level) -> (slog::Logger, slog_async::AsyncGuard) {
    let term_drain = slog_term::term_compact().fuse();
    let filter_drain = slog::LevelFilter::new(term_drain, level).fuse();

    // Ensure the logger is thread-safe
    let (async_drain, guard) = slog_async::Async::new(filter_drain)
        .thread_name("slog-async-logger".into())
        .build_with_guard();

    let logger = slog::Logger::root(async_drain.fuse(), o!("subsystem" => DEFAULT_SUBSYSTEM));

    (logger, guard)
}

// Creates a logger which prints output as JSON
// XXX: 'writer' param used to make testing possible.
pub fn create_logger<W>(
    name: &str,
    level: slog::Level,
    writer: W,
) -> (slog::Logger, slog_async::AsyncGuard)
where
    W: Write + Send + Sync + 'static,
{
    let json_drain = slog_json::Json::new(writer)
        .add_default_keys()
        .build()
        .fuse();
    let filter_drain = slog::LevelFilter::new(json_drain, level).fuse();

    // Ensure the logger is thread-safe
    let (async_drain, guard) = slog_async::Async::new(filter_drain)
        .thread_name("slog-async-logger".into())
        .build_with_guard();

    // Add some "standard" fields
    let logger = slog::Logger::root(
        async_drain.fuse(),
        o!("version" => env!("CARGO_PKG_VERSION"),
            "subsystem" => DEFAULT_SUBSYSTEM,
            "pid" => process::id().to_string(),
            "name" => name.to_string()),
    );

    (logger, guard)
}

pub fn get_log_levels() -> Vec<&'static str> {
    LOG_LEVELS.iter().map(|value| value.0).collect()
}

pub fn level_name_to_slog_level(level_name: &str) -> Result<slog::Level, String> {
    for tuple in LOG_LEVELS {
        if tuple.0 == level_name {
            return Ok(tuple.1);
        }
    }

    Err("invalid level name".to_string())
}

pub fn slog_level_to_level_name(level: slog::Level) -> Result<&'static str, &'static str> {
    for tuple in LOG_LEVELS {
        if tuple.1 == level {
            return Ok(tuple.0);
        }
    }

    Err("invalid slog level")
}

#[cfg(test)]
mod tests {
    use super::*;
    use slog::{info, warn};
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct SharedBuf {
        buf: Arc<Mutex<Vec<u8>>>,
    }

    impl Write for SharedBuf {
        fn write(&mut self, data: &[u8]) -> io::Result<usize> {
            self.buf.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_level_name_round_trip() {
        for name in get_log_levels() {
            let level = level_name_to_slog_level(name).unwrap();
            assert_eq!(slog_level_to_level_name(level).unwrap(), name);
        }
        assert!(level_name_to_slog_level("verbose").is_err());
    }

    #[test]
    fn test_create_logger_json_output() {
        let writer = SharedBuf::default();
        let (logger, guard) = create_logger("test-proxy", slog::Level::Info, writer.clone());

        info!(logger, "hello"; "key" => "value");
        // records below the filter level are dropped
        warn!(logger, "kept");
        drop(logger);
        drop(guard);

        let buf = writer.buf.lock().unwrap();
        let output = String::from_utf8_lossy(&buf);
        let first = output.lines().next().unwrap();
        let parsed: serde_json::Value = serde_json::from_str(first).unwrap();
        assert_eq!(parsed["msg"], "hello");
        assert_eq!(parsed["key"], "value");
        assert_eq!(parsed["name"], "test-proxy");
    }
}
