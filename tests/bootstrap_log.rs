mod common;

use common::{FakeInterpreter, FakeShell, fresh_bootstrap, test_settings};
use log::{Level, LevelFilter, Log, Metadata, Record};
use nbdap::DebuggerBuilder;
use nbdap::config::{DebuggerConfig, Settings};
use nbdap::log::LOG_ENV_VAR;
use serde_json::json;
use serial_test::serial;
use std::sync::{Arc, Mutex, OnceLock};

struct CapturingLogger {
    lines: Mutex<Vec<(Level, String)>>,
}

impl Log for CapturingLogger {
    fn enabled(&self, metadata: &Metadata) -> bool {
        metadata.target() == "nbdap"
    }

    fn log(&self, record: &Record) {
        if self.enabled(record.metadata()) {
            self.lines
                .lock()
                .unwrap()
                .push((record.level(), record.args().to_string()));
        }
    }

    fn flush(&self) {}
}

fn logger() -> &'static CapturingLogger {
    static LOGGER: OnceLock<&'static CapturingLogger> = OnceLock::new();
    LOGGER.get_or_init(|| {
        let logger: &'static CapturingLogger = Box::leak(Box::new(CapturingLogger {
            lines: Mutex::new(vec![]),
        }));
        log::set_logger(logger).unwrap();
        log::set_max_level(LevelFilter::Debug);
        logger
    })
}

fn start_with(shell: FakeShell, settings: Settings, config: DebuggerConfig) -> bool {
    let debugger = DebuggerBuilder::new()
        .with_settings(settings)
        .with_config(config)
        .with_bootstrap(fresh_bootstrap())
        .with_port(5678)
        .build(Arc::new(FakeInterpreter::new()), Arc::new(shell))
        .unwrap();
    let mut session = nbdap::ControlSession::new(debugger).unwrap();
    session.start().unwrap()
}

#[test]
#[serial]
fn test_bootstrap_failure_is_logged() {
    let logger = logger();
    logger.lines.lock().unwrap().clear();

    let shell = FakeShell::failing(
        "ImportError",
        "No module named 'debugpy'",
        &[
            "Traceback (most recent call last):",
            "  File \"<string>\", line 1, in <module>",
        ],
    );
    assert!(!start_with(shell, test_settings(), DebuggerConfig::default()));

    let errors: Vec<String> = logger
        .lines
        .lock()
        .unwrap()
        .iter()
        .filter(|(level, _)| *level == Level::Error)
        .map(|(_, line)| line.clone())
        .collect();
    assert_eq!(
        errors,
        vec![
            "Exception raised when trying to import debugpy".to_string(),
            "Traceback (most recent call last):".to_string(),
            "  File \"<string>\", line 1, in <module>".to_string(),
            "ImportError - No module named 'debugpy'".to_string(),
        ]
    );
}

#[test]
#[serial]
fn test_debugger_config_is_traced() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("nbdap.log");
    let settings = Settings {
        log_file: log_file.clone(),
        ..test_settings()
    };
    let config = DebuggerConfig::from_json(&json!({"python": "/opt/env/bin/python"}));

    std::env::set_var(LOG_ENV_VAR, "1");
    let shell = FakeShell::failing("ImportError", "No module named 'debugpy'", &[]);
    let started = start_with(shell.clone(), settings, config);
    std::env::remove_var(LOG_ENV_VAR);

    assert!(!started);
    assert_eq!(
        shell.codes(),
        vec![
            "import debugpy;debugpy.configure({'python': r'/opt/env/bin/python'});\
             debugpy.listen(('127.0.0.1',5678))"
                .to_string()
        ]
    );
    let trace = std::fs::read_to_string(&log_file).unwrap();
    assert_eq!(
        trace,
        "===== DEBUGGER CONFIG =====\n{\"python\":\"/opt/env/bin/python\"}\n"
    );
}

#[test]
#[serial]
fn test_no_trace_without_env() {
    let dir = tempfile::tempdir().unwrap();
    let log_file = dir.path().join("nbdap.log");
    let settings = Settings {
        log_file: log_file.clone(),
        ..test_settings()
    };

    std::env::remove_var(LOG_ENV_VAR);
    let shell = FakeShell::failing("ImportError", "No module named 'debugpy'", &[]);
    assert!(!start_with(shell, settings, DebuggerConfig::default()));
    assert!(!log_file.exists());
}
