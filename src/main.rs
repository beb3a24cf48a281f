use std::path::Path;
use std::process;
use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::thread;
use std::time::Duration;

use clap::Parser;
use signal_hook::{consts::TERM_SIGNALS, flag};

use flowcap::agent::Agent;
use flowcap::source::ExitReason;

#[derive(Parser)]
#[clap(name = "flowcap", about = "Network forensics ingestion agent")]
struct Opts {
    /// Specify config file location
    #[clap(short = 'f', long, default_value = "/etc/flowcap.yaml")]
    config_file: String,

    /// Interface name, trace file, or "-" for stdin; overrides the config file
    #[clap(value_name = "INPUT")]
    input: Option<String>,
}

fn main() {
    let opts = Opts::parse();

    let agent = match Agent::new(&Path::new(&opts.config_file), opts.input) {
        Ok(agent) => agent,
        Err(e) => {
            eprintln!("{}", e);
            process::exit(1);
        }
    };
    agent.start();

    let term = Arc::new(AtomicBool::new(false));
    for signal in TERM_SIGNALS {
        if let Err(e) = flag::register(*signal, term.clone()) {
            eprintln!("failed to register signal {}: {}", signal, e);
        }
    }
    // Offline traces finish by themselves; live captures run until a
    // termination signal arrives.
    while !term.load(Ordering::Relaxed) && !agent.source_finished() {
        thread::sleep(Duration::from_millis(100));
    }

    match agent.stop() {
        ExitReason::Done | ExitReason::Stop => process::exit(0),
        ExitReason::Error | ExitReason::Kill => process::exit(1),
    }
}
