//! The top-level driver: boot file loading, the read-eval-print loop, and
//! recovery from process-fatal faults
//!
//! The loop arms a checkpoint at the top of every iteration. A SIGSEGV or
//! SIGABRT during evaluation lands back at the checkpoint with the whole
//! construct nest abandoned mid-flight: no cleanups have run and the context
//! still holds whatever frames were live at the fault. Diagnostics are
//! captured from that wreckage first, then the context is reset to its
//! primordial frame and the loop continues.

use crate::{
    eval,
    fault::{self, Fault, checkpoint},
    reader,
    repl::Repl,
};
use anyhow::Result;
use sable_runtime::{BacktraceEntry, prelude::*};
use std::{env, fs, path::PathBuf};

/// The most backtrace entries captured after a fault
pub const MAX_BACKTRACE_FRAMES: usize = 64;

/// The boot file looked up under `SABLE_HOME`
const BOOT_FILE: &str = "boot.sbl";

/// Where the driver is in its lifecycle
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Lifecycle {
    /// Initialized, nothing run yet
    Booting,
    /// Evaluating the boot file
    Loading,
    /// Reading and evaluating top-level forms
    TopLevelLoop,
    /// Capturing diagnostics after a fault
    Recovering,
}

/// Configuration for a [Driver]
#[derive(Debug, Default)]
pub struct DriverSettings {
    /// An explicit boot file, overriding the `SABLE_HOME` lookup
    pub boot_path: Option<PathBuf>,
}

/// What the recovery path captured at the moment of a fault
#[derive(Debug)]
pub struct FaultDiagnostics {
    /// The intercepted fault
    pub fault: Fault,
    /// The evaluation stack as the fault left it
    pub stack: Vec<Value>,
    /// The control chain as the fault left it, newest first
    pub backtrace: Vec<BacktraceEntry>,
}

/// The top-level driver owning the execution context
pub struct Driver {
    context: Context,
    lifecycle: Lifecycle,
    boot_loaded: bool,
    boot_path: Option<PathBuf>,
    diagnostics: Option<FaultDiagnostics>,
}

impl Driver {
    /// Initializes a driver with a fresh context
    pub fn new(settings: DriverSettings) -> Self {
        let mut context = Context::new();
        context.install_primordial();
        Self {
            context,
            lifecycle: Lifecycle::Booting,
            boot_loaded: false,
            boot_path: settings.boot_path,
            diagnostics: None,
        }
    }

    /// Runs the interactive session until end of input
    ///
    /// The checkpoint is (re-)established directly in this function's stack
    /// frame on every pass, so the frame is guaranteed to be live whenever a
    /// fault jumps back to it.
    pub fn run(&mut self, repl: &mut Repl) -> Result<()> {
        fault::install();
        // A fault during interact() resumes execution right here, at the
        // sigsetjmp inside checkpoint!, and falls through to a fresh pass.
        if let Some(fault) = checkpoint!() {
            self.recover(fault);
        }
        self.context.reset_to_primordial();
        self.load_boot();
        self.lifecycle = Lifecycle::TopLevelLoop;
        self.interact(repl)
    }

    /// Evaluates a whole script; used for non-interactive runs, which get no
    /// fault recovery
    pub fn run_source(&mut self, source: &str) -> Result<()> {
        self.load_boot();
        self.lifecycle = Lifecycle::TopLevelLoop;
        self.eval_source(source)
    }

    /// The diagnostics captured by the most recent recovery, if any
    pub fn diagnostics(&self) -> Option<&FaultDiagnostics> {
        self.diagnostics.as_ref()
    }

    fn interact(&mut self, repl: &mut Repl) -> Result<()> {
        loop {
            if fault::interrupted() {
                eprintln!("interrupted");
            }
            let Some(form) = repl.read_form()? else {
                return Ok(());
            };
            self.eval_and_print(&form);
        }
    }

    fn eval_and_print(&mut self, form: &Value) {
        self.context.clear_values();
        match eval::eval(&mut self.context, form) {
            Ok(result) => {
                match self.context.take_values() {
                    Some(values) => {
                        if values.is_empty() {
                            println!("; no values");
                        }
                        for value in values {
                            println!("{value}");
                        }
                    }
                    None => println!("{result}"),
                }
                debug_assert_eq!(self.context.stack_len(), 0);
            }
            Err(unwind) => {
                eprintln!("error: {}", unwind.into_error());
                self.context.truncate_stack(0);
                self.context.clear_values();
            }
        }
    }

    /// Captures diagnostics from the faulted context before anything resets it
    fn recover(&mut self, fault: Fault) {
        self.lifecycle = Lifecycle::Recovering;
        let diagnostics = FaultDiagnostics {
            fault,
            stack: self.context.stack_snapshot(),
            backtrace: self.context.backtrace(MAX_BACKTRACE_FRAMES),
        };
        report_fault(&diagnostics);
        self.diagnostics = Some(diagnostics);
    }

    /// Loads the boot file on the first pass through the driver loop
    ///
    /// The latch is set before evaluating, so a fault (or error) during boot
    /// doesn't retrigger the load after recovery.
    fn load_boot(&mut self) {
        if self.boot_loaded {
            return;
        }
        self.boot_loaded = true;
        let Some(path) = self.boot_file_path() else {
            return;
        };
        self.lifecycle = Lifecycle::Loading;
        match fs::read_to_string(&path) {
            Ok(source) => {
                if let Err(error) = self.eval_source(&source) {
                    eprintln!("boot error in {}: {error}", path.display());
                }
            }
            Err(error) => {
                // Only an explicitly requested boot file is worth a warning
                if self.boot_path.is_some() {
                    eprintln!("couldn't load boot file {}: {error}", path.display());
                }
            }
        }
    }

    fn boot_file_path(&self) -> Option<PathBuf> {
        self.boot_path.clone().or_else(|| {
            env::var_os("SABLE_HOME").map(|home| {
                let mut path = PathBuf::from(home);
                path.push(BOOT_FILE);
                path
            })
        })
    }

    fn eval_source(&mut self, source: &str) -> Result<()> {
        for form in reader::read_all(source)? {
            if let Err(unwind) = eval::eval(&mut self.context, &form) {
                anyhow::bail!("{}", unwind.into_error());
            }
        }
        Ok(())
    }
}

fn report_fault(diagnostics: &FaultDiagnostics) {
    match diagnostics.fault {
        Fault::Segv { addr } => eprintln!("fatal: segmentation fault at {addr:#x}"),
        Fault::Abort => eprintln!("fatal: abort"),
    }
    if !diagnostics.backtrace.is_empty() {
        eprintln!("control chain at the fault:");
        for entry in &diagnostics.backtrace {
            eprintln!("  {entry}");
        }
    }
    if !diagnostics.stack.is_empty() {
        eprintln!(
            "{} value(s) abandoned on the evaluation stack",
            diagnostics.stack.len()
        );
    }
    eprintln!("recovering to the top level");
}

#[cfg(test)]
mod tests {
    use super::*;
    use sable_runtime::FrameKind;

    #[test]
    fn the_boot_file_defines_globals_before_the_first_form() {
        let path = env::temp_dir().join("sable_boot_test.sbl");
        fs::write(&path, "(setq booted t)").unwrap();

        let mut driver = Driver::new(DriverSettings {
            boot_path: Some(path.clone()),
        });
        driver.load_boot();
        assert_eq!(driver.lifecycle, Lifecycle::Loading);
        assert_eq!(driver.context.global("booted"), Some(&Value::Bool(true)));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn boot_runs_at_most_once_across_recoveries() {
        let path = env::temp_dir().join("sable_boot_latch_test.sbl");
        fs::write(&path, "(setq boots (+ boots 1))").unwrap();

        let mut driver = Driver::new(DriverSettings {
            boot_path: Some(path.clone()),
        });
        driver.context.set_global("boots".into(), Value::Int(0));
        driver.load_boot();
        assert_eq!(driver.context.global("boots"), Some(&Value::Int(1)));

        // A recovery pass resets the context but never re-runs the boot file
        driver.recover(Fault::Abort);
        driver.context.reset_to_primordial();
        driver.context.set_global("boots".into(), Value::Int(1));
        driver.load_boot();
        assert_eq!(driver.context.global("boots"), Some(&Value::Int(1)));

        let _ = fs::remove_file(path);
    }

    #[test]
    fn recovery_publishes_diagnostics_and_resets_cleanly() {
        let mut driver = Driver::new(DriverSettings::default());
        driver.boot_loaded = true;
        driver.context.push_value(Value::Int(7));
        driver.context.push_frame(FrameKind::Block);
        driver.context.push_frame(FrameKind::Catch);

        driver.recover(Fault::Segv { addr: 0xdead });
        assert_eq!(driver.lifecycle, Lifecycle::Recovering);
        let diagnostics = driver.diagnostics().unwrap();
        assert_eq!(diagnostics.fault, Fault::Segv { addr: 0xdead });
        // Catch, block, then the primordial frame, newest first
        assert_eq!(diagnostics.backtrace.len(), 3);
        assert_eq!(diagnostics.stack, vec![Value::Int(7)]);

        driver.context.reset_to_primordial();
        assert_eq!(driver.context.chain_head(), driver.context.primordial());
        assert_eq!(driver.context.stack_len(), 0);
    }

    #[test]
    fn run_source_reports_control_errors() {
        let mut driver = Driver::new(DriverSettings::default());
        driver.boot_loaded = true;
        assert!(driver.run_source("(throw 'nobody 1)").is_err());
        assert!(driver.run_source("(+ 1 2)").is_ok());
    }
}
