//! Minimal `log4rs` wiring so this crate's own `log::{debug,info,warn,error}`
//! calls are observable when run standalone. Kept deliberately small: the
//! logging backend itself is an out-of-scope external collaborator (spec
//! §1), this just needs to make one appender pair work.

use log::LevelFilter;
use log4rs::{
    append::{
        console::ConsoleAppender,
        rolling_file::{
            policy::compound::{
                roll::fixed_window::FixedWindowRoller, trigger::size::SizeTrigger, CompoundPolicy,
            },
            RollingFileAppender,
        },
    },
    config::{Appender, Logger, Root},
    encode::pattern::PatternEncoder,
    init_config, Config,
};

const LOGGING_PATTERN: &str = "[{d} {h({l})} {M}] {m}{n}";
const LOGGING_MAX_SIZE: u64 = 1024 * 1024 * 5;
const LOGGING_MAX_FILES: u32 = 8;
const LOGGING_MODULE: &str = "gpbinary_relay";

/// Initialises logging at `level`, writing to stdout and a rolling file
/// under `log/`. Call once, near the top of `main`.
pub fn init(level: LevelFilter) {
    let pattern = Box::new(PatternEncoder::new(LOGGING_PATTERN));
    let size_trigger = SizeTrigger::new(LOGGING_MAX_SIZE);
    let roller = FixedWindowRoller::builder()
        .build("log/relay-{}.log.gz", LOGGING_MAX_FILES)
        .expect("unable to create fixed window log roller");
    let policy = CompoundPolicy::new(Box::new(size_trigger), Box::new(roller));

    let stdout_appender = ConsoleAppender::builder().encoder(pattern.clone()).build();
    let file_appender = RollingFileAppender::builder()
        .encoder(pattern)
        .build("log/relay.log", Box::new(policy))
        .expect("unable to create logging file appender");

    const APPENDERS: [&str; 2] = ["stdout", "file"];

    let config = Config::builder()
        .appender(Appender::builder().build("stdout", Box::new(stdout_appender)))
        .appender(Appender::builder().build("file", Box::new(file_appender)))
        .logger(
            Logger::builder()
                .appenders(APPENDERS)
                .additive(false)
                .build(LOGGING_MODULE, level),
        )
        .build(Root::builder().appenders(APPENDERS).build(LevelFilter::Warn))
        .expect("failed to build logging config");

    init_config(config).expect("unable to initialize logger");
}
