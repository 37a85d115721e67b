use clap::{Parser, Subcommand};
use eapaka_tester::{run_case, Case, Config, EXIT_INFRASTRUCTURE, EXIT_PASS};
use std::path::PathBuf;
use std::process;
use tracing::debug;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// EAP-AKA/AKA' conformance tester for RADIUS authentication servers
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
#[command(name = "eapaka_tester")]
struct Cli {
    /// Path to configuration file
    #[arg(short = 'c', long = "config", value_name = "CONFIG")]
    config_path: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a single testcase session
    Run {
        /// Path to testcase file
        #[arg(value_name = "TESTCASE")]
        testcase_path: PathBuf,

        /// Output sensitive EAP data in trace
        #[arg(long)]
        unsafe_log: bool,

        /// Dump EAP hex in verbose trace
        #[arg(long)]
        trace_eap_hex: bool,

        /// Dump RADIUS attributes in verbose trace
        #[arg(long)]
        trace_radius_attrs: bool,
    },
}

fn main() {
    let cli = Cli::parse();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let config = match Config::from_file(&cli.config_path) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("{}", err);
            process::exit(EXIT_INFRASTRUCTURE);
        }
    };

    match cli.command {
        Command::Run {
            testcase_path,
            unsafe_log,
            trace_eap_hex,
            trace_radius_attrs,
        } => {
            let mut case = match Case::from_file(&testcase_path) {
                Ok(case) => case,
                Err(err) => {
                    eprintln!("{}", err);
                    process::exit(EXIT_INFRASTRUCTURE);
                }
            };
            if unsafe_log {
                case.trace.unsafe_log = true;
            }
            if trace_eap_hex {
                case.trace.dump_eap_hex = Some(true);
            }
            if trace_radius_attrs {
                case.trace.dump_radius_attrs = Some(true);
            }

            debug!(
                name = %case.name,
                identity = %case.identity,
                "running testcase"
            );
            match run_case(&config, &case) {
                Ok(()) => process::exit(EXIT_PASS),
                Err(err) => {
                    eprintln!("{}", err);
                    process::exit(err.exit_code());
                }
            }
        }
    }
}
