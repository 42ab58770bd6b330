// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log line format shared by both binaries.
//!
//! ```text
//! METRICS_AGENT | WARN | flush{attempt=2}: Attempt 2/3 failed: 503, backing off for 3s
//! ```

use crate::config::LogLevel;
use std::fmt;
use tracing_core::{Event, Subscriber};
use tracing_subscriber::fmt::{
    format::{self, FormatEvent, FormatFields},
    FmtContext, FormattedFields,
};
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::EnvFilter;

/// Prefixes every line with a fixed component name and the level.
#[derive(Debug, Clone, Copy)]
pub struct Formatter {
    prefix: &'static str,
}

impl Formatter {
    #[must_use]
    pub const fn new(prefix: &'static str) -> Self {
        Self { prefix }
    }
}

impl<S, N> FormatEvent<S, N> for Formatter
where
    S: Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: format::Writer<'_>,
        event: &Event<'_>,
    ) -> fmt::Result {
        write!(
            &mut writer,
            "{} | {} | ",
            self.prefix,
            event.metadata().level()
        )?;

        if let Some(scope) = ctx.event_scope() {
            for span in scope.from_root() {
                write!(writer, "{}", span.name())?;
                let ext = span.extensions();
                if let Some(fields) = ext.get::<FormattedFields<N>>() {
                    if !fields.is_empty() {
                        write!(writer, "{{{fields}}}")?;
                    }
                }
                write!(writer, ": ")?;
            }
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

/// Noisy transport crates are silenced regardless of the configured level.
#[must_use]
pub fn env_filter_directive(level: LogLevel) -> String {
    format!("h2=off,hyper=off,rustls=off,sqlx=warn,{}", level.as_filter())
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init(prefix: &'static str, level: LogLevel) -> Result<(), String> {
    let filter = EnvFilter::try_new(env_filter_directive(level))
        .map_err(|e| format!("could not parse log level: {e}"))?;

    let subscriber = tracing_subscriber::fmt::Subscriber::builder()
        .with_env_filter(filter)
        .event_format(Formatter::new(prefix))
        .finish();

    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| format!("setting default subscriber failed: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    #[derive(Clone, Default)]
    struct Buffer(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Buffer {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Buffer {
        type Writer = Buffer;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture(level: LogLevel, f: impl FnOnce()) -> String {
        let buffer = Buffer::default();
        let subscriber = tracing_subscriber::fmt::Subscriber::builder()
            .with_env_filter(EnvFilter::new(env_filter_directive(level)))
            .with_ansi(false)
            .event_format(Formatter::new("METRICS_TEST"))
            .with_writer(buffer.clone())
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = buffer.0.lock().unwrap().clone();
        String::from_utf8(bytes).unwrap()
    }

    #[test]
    fn test_prefix_level_and_span() {
        let output = capture(LogLevel::Debug, || {
            let span = tracing::debug_span!("flush", attempt = 2);
            let _guard = span.enter();
            tracing::warn!(status = 503, "Request failed");
        });
        assert_eq!(
            output,
            "METRICS_TEST | WARN | flush{attempt=2}: Request failed status=503\n"
        );
    }

    #[test]
    fn test_level_filters_events() {
        let output = capture(LogLevel::Error, || {
            tracing::info!("hidden");
            tracing::error!("shown");
        });
        assert_eq!(output, "METRICS_TEST | ERROR | shown\n");
    }

    #[test]
    fn test_filter_directive() {
        assert_eq!(
            env_filter_directive(LogLevel::Info),
            "h2=off,hyper=off,rustls=off,sqlx=warn,info"
        );
    }
}
