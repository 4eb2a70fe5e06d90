mod driver;
mod eval;
mod fault;
mod reader;
mod repl;

use anyhow::{Context, Result, bail};
use driver::{Driver, DriverSettings};
use repl::Repl;
use std::{fs, path::PathBuf};

#[global_allocator]
static ALLOCATOR: mimalloc::MiMalloc = mimalloc::MiMalloc;

fn version_string() -> String {
    format!("Sable {}", env!("CARGO_PKG_VERSION"))
}

fn help_string() -> String {
    format!(
        "\
{version}

USAGE:
    sable [FLAGS] [script]

FLAGS:
    -e, --eval             Evaluate the script argument as a string instead of loading it from disk
    -b, --boot PATH        Load PATH as the boot file before the first top-level form
    -v, --version          Prints version information
    -h, --help             Prints help information

ARGS:
    <script>    The script to run; without one, an interactive session starts

ENVIRONMENT:
    SABLE_HOME    Directory searched for the default boot file (boot.sbl)",
        version = version_string()
    )
}

struct SableArgs {
    help: bool,
    version: bool,
    eval_script: bool,
    boot_path: Option<PathBuf>,
    script: Option<String>,
}

fn parse_arguments() -> Result<SableArgs> {
    let mut args = pico_args::Arguments::from_env();

    let help = args.contains(["-h", "--help"]);
    let version = args.contains(["-v", "--version"]);
    let eval_script = args.contains(["-e", "--eval"]);
    let boot_path: Option<PathBuf> = args.opt_value_from_str(["-b", "--boot"])?;
    let script: Option<String> = args.opt_free_from_str()?;

    let unexpected = args.finish();
    if let Some(arg) = unexpected.first() {
        bail!("unexpected argument '{}'", arg.to_string_lossy());
    }

    Ok(SableArgs {
        help,
        version,
        eval_script,
        boot_path,
        script,
    })
}

fn main() -> Result<()> {
    let args = match parse_arguments() {
        Ok(args) => args,
        Err(error) => bail!("{error}\n\n{}", help_string()),
    };

    if args.help {
        println!("{}", help_string());
        return Ok(());
    }
    if args.version {
        println!("{}", version_string());
        return Ok(());
    }

    let mut driver = Driver::new(DriverSettings {
        boot_path: args.boot_path,
    });

    match args.script {
        Some(script) => {
            let source = if args.eval_script {
                script
            } else {
                fs::read_to_string(&script)
                    .with_context(|| format!("couldn't load the script '{script}'"))?
            };
            driver.run_source(&source)
        }
        None => {
            println!("{}", version_string());
            let mut repl = Repl::new()?;
            let result = driver.run(&mut repl);
            if let Err(error) = repl.save_history() {
                eprintln!("couldn't save the session history: {error}");
            }
            result
        }
    }
}
