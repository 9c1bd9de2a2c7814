//! Logger configuration and structured output formatting.
//! 
//! This module provides a comprehensive logging system with structured output,
//! color formatting, and configurable alignment. Designed for both development
//! debugging and production observability.

use chrono::Local;
use env_logger::Builder;
use log::LevelFilter;
use std::env;
use std::io::Write;

/// Width for the level field column including padding.
/// 
/// Controls the alignment of log level indicators in the structured output.
/// Increase this value if log level names don't align properly.
const LEVEL_FIELD_WIDTH: usize = 8; // visible width for the '[LEVEL]' column including padding

/// Width for the file:line field column including padding.
/// 
/// Controls the alignment of source location information in structured output.
/// Adjust based on your typical file path lengths for optimal readability.
const FILE_LINE_FIELD_WIDTH: usize = 22; // visible width for the 'file:line' column including padding

/// Compute the visible length of a string while stripping ANSI escape sequences.
/// 
/// This function calculates the actual display width of a string by ignoring
/// ANSI color codes and control sequences. Essential for proper column alignment
/// in colored terminal output.
/// 
/// # Arguments
/// * `s` - The string to measure, potentially containing ANSI escape sequences
/// 
/// # Returns
/// The visible character count excluding ANSI sequences
/// 
/// # ANSI Sequence Handling
/// - Detects escape sequences starting with `\x1b[`
/// - Skips all characters until 'm' terminator
/// - Properly handles UTF-8 multi-byte characters
/// - Counts each Unicode code point as one visible character
/// 
/// # Examples
/// ```rust
/// # fn visible_len(s: &str) -> usize {
/// #     let bytes = s.as_bytes();
/// #     let mut visible = 0;
/// #     let mut i = 0;
/// #     while i < bytes.len() {
/// #         if bytes[i] == 0x1b {
/// #             i += 1;
/// #             if i < bytes.len() && bytes[i] == b'[' {
/// #                 i += 1;
/// #             }
/// #             while i < bytes.len() {
/// #                 let b = bytes[i];
/// #                 i += 1;
/// #                 if b == b'm' {
/// #                     break;
/// #                 }
/// #             }
/// #         } else {
/// #             let first = bytes[i];
/// #             let width = if first < 0x80 {
/// #                 1
/// #             } else if first >> 5 == 0b110 {
/// #                 2
/// #             } else if first >> 4 == 0b1110 {
/// #                 3
/// #             } else if first >> 3 == 0b11110 {
/// #                 4
/// #             } else {
/// #                 1
/// #             };
/// #             visible += 1;
/// #             i += width;
/// #         }
/// #     }
/// #     visible
/// # }
/// assert_eq!(visible_len("hello"), 5);
/// assert_eq!(visible_len("\x1b[31mred\x1b[0m"), 3);
/// assert_eq!(visible_len("\x1b[1;32m[INFO]\x1b[0m"), 6);
/// ```
/// 
/// # Performance
/// - Single pass algorithm with O(n) complexity
/// - Efficient UTF-8 boundary detection
/// - Minimal memory allocations
// Compute visible length of a string while stripping simple ANSI escape sequences (\x1b[...m)
fn visible_len(s: &str) -> usize {
    let bytes = s.as_bytes();
    let mut visible = 0;
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == 0x1b {
            // ESC detected, skip until 'm' or end
            i += 1;
            if i < bytes.len() && bytes[i] == b'[' {
                i += 1;
            }
            while i < bytes.len() {
                let b = bytes[i];
                i += 1;
                if b == b'm' {
                    break;
                }
            }
        } else {
            // Determine UTF-8 code point length to advance correctly, but count as one visible character
            let first = bytes[i];
            let width = if first < 0x80 {
                1
            } else if first >> 5 == 0b110 {
                2
            } else if first >> 4 == 0b1110 {
                3
            } else if first >> 3 == 0b11110 {
                4
            } else {
                1
            };
            visible += 1;
            i += width;
        }
    }
    visible
}

/// Configure and initialize the application's logging system.
/// 
/// Sets up structured logging with color support, configurable output formatting,
/// and environment-based configuration. This function should be called once
/// during application startup to establish the logging infrastructure.
/// 
/// # Logging Format
/// 
/// The structured output format includes:
/// ```text
/// [Timestamp] | [LEVEL] | file:line | Message
/// Dec 15 24 02:30:45 PM | [INFO ] | main.rs:42        | Gateway starting on port 5900
/// Dec 15 24 02:30:45 PM | [ERROR] | router.rs:156     | Failed to connect to upstream
/// ```
/// 
/// # Color Support
/// 
/// - **Automatic Detection**: Detects terminal color capabilities
/// - **Environment Override**: Honors `NO_COLOR` environment variable
/// - **Level Colors**: Different colors for each log level:
///   - ERROR: Red
///   - WARN: Yellow
///   - INFO: Green
///   - DEBUG: Blue
///   - TRACE: Magenta
/// 
/// # Environment Configuration
/// 
/// - `RUST_LOG`: Sets log level filtering (debug, info, warn, error)
/// - `NO_COLOR`: Disables colored output for structured logging systems
/// 
/// # Log Levels
/// 
/// - **ERROR**: Critical errors requiring immediate attention
/// - **WARN**: Warning conditions that should be investigated
/// - **INFO**: General application operation information
/// - **DEBUG**: Detailed debugging information for development
/// - **TRACE**: Very detailed tracing for deep debugging
/// 
/// # Thread Safety
/// 
/// This function is thread-safe and can be called from any thread, but should
/// only be called once during application initialization.
/// 
/// # Examples
/// 
/// ```rust
/// # use env_logger::Builder;
/// # use log::LevelFilter;
/// # use std::env;
/// # use std::io::Write;
/// # use chrono::Local;
/// # 
/// # fn configure_logger() {
/// #     let no_color = env::var("NO_COLOR").is_ok();
/// #     Builder::new()
/// #         .format(move |buf, record| {
/// #             writeln!(buf, "{} [{}] {}", 
/// #                 Local::now().format("%b %d %y %I:%M:%S %p"),
/// #                 record.level(),
/// #                 record.args())
/// #         })
/// #         .filter_level(LevelFilter::Debug)
/// #         .init();
/// #     log::set_max_level(LevelFilter::Trace);
/// # }
/// 
/// // Initialize logging at application startup
/// configure_logger();
/// 
/// // Use throughout application  
/// # log::info!("Application initialized successfully");
/// # // error_msg would be defined elsewhere
/// # let error_msg = "connection failed";
/// # log::error!("Failed to process request: {}", error_msg);
/// # let duration = 42;
/// # log::debug!("Request processing time: {}ms", duration);
/// ```
/// 
/// # Performance Considerations
/// 
/// - **Efficient Formatting**: Optimized string operations with minimal allocations
/// - **Early Filtering**: Log level filtering prevents unnecessary processing
/// - **Async Compatible**: Works with async runtimes and multi-threaded environments
/// - **Memory Bounded**: Efficient buffer management with controlled memory usage
/// 
/// # Production Usage
/// 
/// - Set appropriate log levels via `RUST_LOG` environment variable
/// - Disable colors in production with `NO_COLOR=1`
/// - Integrate with log aggregation systems for centralized monitoring
/// - Consider log rotation for long-running services
/// Returns `true` when `LOG_FORMAT` or `KAIROS_LOG_FORMAT` is set to `json`,
/// selecting the line-delimited JSON formatter over the human-readable one.
fn json_format_requested() -> bool {
    let value = env::var("LOG_FORMAT")
        .or_else(|_| env::var("KAIROS_LOG_FORMAT"))
        .unwrap_or_default();
    value.eq_ignore_ascii_case("json")
}

/// Configure and initialize the application's logging system, dispatching to
/// the JSON formatter when `LOG_FORMAT=json`/`KAIROS_LOG_FORMAT=json`, or the
/// ANSI human-readable formatter otherwise.
pub fn configure_logger() {
    if json_format_requested() {
        configure_json_logger();
    } else {
        configure_text_logger();
    }
}

fn configure_json_logger() {
    Builder::new()
        .format(|buf, record| {
            let line = serde_json::json!({
                "timestamp": chrono::Utc::now().to_rfc3339(),
                "level": record.level().to_string(),
                "target": record.target(),
                "file": record.file(),
                "line": record.line(),
                "message": record.args().to_string(),
            });
            writeln!(buf, "{}", line)
        })
        .filter_level(LevelFilter::Debug)
        .init();
    log::set_max_level(LevelFilter::Trace);
}

fn configure_text_logger() {
    // If NO_COLOR is set in the environment, disable coloring and bolding.
    let no_color = env::var("NO_COLOR").is_ok();

    Builder::new()
        .format(move |buf, record| {
            let level = record.level();
            let level_plain = level.to_string();

            // When colors are enabled we start bold for the whole line and color the level.
            let (prefix, colored_level, suffix) = if no_color {
                ("".to_string(), level_plain.clone(), "".to_string())
            } else {
                // Bold prefix for entire line
                let prefix = "\x1b[1m".to_string();
                // Use color for the level but reset only the foreground (39) so bold remains
                let colored = match level {
                    log::Level::Error => format!("\x1b[31m{}\x1b[39m", level_plain), // red
                    log::Level::Warn => format!("\x1b[33m{}\x1b[39m", level_plain),  // yellow
                    log::Level::Info => format!("\x1b[32m{}\x1b[39m", level_plain),  // green
                    log::Level::Debug => format!("\x1b[34m{}\x1b[39m", level_plain), // blue
                    log::Level::Trace => format!("\x1b[35m{}\x1b[39m", level_plain), // magenta
                };
                let suffix = "\x1b[0m".to_string(); // final reset of bold/color at line end
                (prefix, colored, suffix)
            };

            // Build level display like "[INFO]"
            let level_display = format!("[{}]", colored_level);
            let level_vis_len = visible_len(&level_display);
            let level_padding = if level_vis_len >= LEVEL_FIELD_WIDTH {
                1
            } else {
                LEVEL_FIELD_WIDTH - level_vis_len
            };

            // Build file:line
            let file = record.file().unwrap_or("unknown");
            let line = record.line().unwrap_or(0);
            let file_line = format!("{}:{}", file, line);
            let file_line_vis_len = visible_len(&file_line);
            let file_line_padding = if file_line_vis_len >= FILE_LINE_FIELD_WIDTH {
                1
            } else {
                FILE_LINE_FIELD_WIDTH - file_line_vis_len
            };

            writeln!(
                buf,
                "{}{} | {}{}| {}{}| {}{}",
                prefix,
                Local::now().format("%b %d %y %I:%M:%S %p"),
                level_display,
                " ".repeat(level_padding),
                file_line,
                " ".repeat(file_line_padding),
                record.args(),
                suffix,
            )
        })
        // Only show logs at Info level and above (Info, Warn, Error)
        .filter_level(LevelFilter::Debug)
        .init();

    // Enforce the max log level globally in case other code attempts to lower/raise it
    log::set_max_level(LevelFilter::Trace);
}
